//! Interfaces to the backing vector store
//!
//! The pool never owns a layer. It keeps a `Weak` handle and asks the layer for a
//! [`FeatureSource`] each time it needs to read; the source yields features matching a
//! [`FeatureRequest`]. Both calls may block on I/O and poll a [`Feedback`] token for cancellation.

use crate::{Crs, Feature, FeatureRequest, GeometryType, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cooperative cancellation token
///
/// Clones share the same flag, so one thread can cancel a fetch running on another.
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    canceled: Arc<AtomicBool>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation polling this token
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Descriptive metadata of a layer, read once when a pool is built
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerMetadata {
    pub layer_id: String,
    pub geometry_type: GeometryType,
    pub crs: Crs,
}

/// A backing layer able to hand out feature sources
pub trait FeatureLayer: Send + Sync {
    fn metadata(&self) -> LayerMetadata;

    /// Open a read handle on the layer
    ///
    /// Fails with [`PoolError::SourceUnavailable`](crate::PoolError::SourceUnavailable) when the
    /// underlying store cannot be reached, or [`PoolError::Canceled`](crate::PoolError::Canceled)
    /// when `feedback` was canceled before the handle was ready.
    fn open_feature_source(&self, feedback: Option<&Feedback>) -> Result<Box<dyn FeatureSource>>;
}

/// A read handle producing features
pub trait FeatureSource: Send {
    /// Iterate over the features matching `request`
    ///
    /// Implementations stop yielding as soon as `feedback` is canceled.
    fn get_features<'a>(
        &'a self,
        request: &FeatureRequest,
        feedback: Option<&'a Feedback>,
    ) -> Box<dyn Iterator<Item = Feature> + 'a>;
}
