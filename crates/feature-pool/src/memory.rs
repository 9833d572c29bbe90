//! In-memory backing layer
//!
//! [`MemoryLayer`] stores features in a shared map and serves them through [`FeatureSource`]
//! handles. It can simulate a slow store (fixed latency per read), an unreachable store, and
//! counts how many reads were issued, which makes the pool's I/O behaviour observable.

use crate::{
    Feature, FeatureId, FeatureLayer, FeatureRequest, FeatureSource, Feedback, LayerMetadata,
    PoolError, Result, utils,
};
use geo::Rect;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

type FeatureMap = BTreeMap<FeatureId, Feature>;

/// Layer state shared with every open source
#[derive(Debug, Default)]
struct Shared {
    features: RwLock<FeatureMap>,
    available: AtomicBool,
    fetch_count: AtomicUsize,
}

/// An editable, thread-safe layer held entirely in memory
#[derive(Debug)]
pub struct MemoryLayer {
    metadata: LayerMetadata,
    shared: Arc<Shared>,
    latency: Duration,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MemoryLayer {
    pub fn new(metadata: LayerMetadata) -> Self {
        let shared = Shared {
            available: AtomicBool::new(true),
            ..Shared::default()
        };
        Self {
            metadata,
            shared: Arc::new(shared),
            latency: Duration::ZERO,
        }
    }

    /// Seed the layer with features, replacing any with the same id
    pub fn with_features(self, features: impl IntoIterator<Item = Feature>) -> Self {
        {
            let mut map = self.write_features();
            for feature in features {
                map.insert(feature.id(), feature);
            }
        }
        self
    }

    /// Delay every read by `latency`, like a remote store would
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Insert or replace a feature, simulating an external edit
    pub fn upsert(&self, feature: Feature) {
        self.write_features().insert(feature.id(), feature);
    }

    /// Delete a feature, simulating an external deletion
    pub fn delete(&self, id: FeatureId) -> Option<Feature> {
        self.write_features().remove(&id)
    }

    /// Toggle whether the layer can hand out feature sources
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Number of reads served by sources of this layer
    pub fn fetch_count(&self) -> usize {
        self.shared.fetch_count.load(Ordering::Acquire)
    }

    pub fn feature(&self, id: FeatureId) -> Option<Feature> {
        self.read_features().get(&id).cloned()
    }

    pub fn feature_ids(&self) -> HashSet<FeatureId> {
        self.read_features().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read_features().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_features().is_empty()
    }

    /// Combined bounding box of all features, `None` if no feature has a geometry
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.read_features()
            .values()
            .filter_map(Feature::bounding_box)
            .reduce(utils::rect_union)
    }

    fn read_features(&self) -> std::sync::RwLockReadGuard<'_, FeatureMap> {
        self.shared
            .features
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_features(&self) -> std::sync::RwLockWriteGuard<'_, FeatureMap> {
        self.shared
            .features
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl FeatureLayer for MemoryLayer {
    fn metadata(&self) -> LayerMetadata {
        self.metadata.clone()
    }

    fn open_feature_source(&self, feedback: Option<&Feedback>) -> Result<Box<dyn FeatureSource>> {
        if feedback.is_some_and(Feedback::is_canceled) {
            return Err(PoolError::Canceled);
        }
        if !self.shared.available.load(Ordering::Acquire) {
            return Err(PoolError::SourceUnavailable {
                layer_id: self.metadata.layer_id.clone(),
            });
        }
        Ok(Box::new(MemorySource {
            shared: Arc::clone(&self.shared),
            latency: self.latency,
        }))
    }
}

/// Read handle over a [`MemoryLayer`]
struct MemorySource {
    shared: Arc<Shared>,
    latency: Duration,
}

impl FeatureSource for MemorySource {
    fn get_features<'a>(
        &'a self,
        request: &FeatureRequest,
        feedback: Option<&'a Feedback>,
    ) -> Box<dyn Iterator<Item = Feature> + 'a> {
        self.shared.fetch_count.fetch_add(1, Ordering::AcqRel);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        // Matches are copied out so the layer lock is not held while the caller consumes them
        let matches: Vec<Feature> = {
            let map = self
                .shared
                .features
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match request.ids() {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| map.get(id))
                    .filter(|feature| request.matches(feature))
                    .cloned()
                    .collect(),
                None => map
                    .values()
                    .filter(|feature| request.matches(feature))
                    .cloned()
                    .collect(),
            }
        };

        let limit = request.limit().unwrap_or(usize::MAX);
        Box::new(
            matches
                .into_iter()
                .take_while(move |_| !feedback.is_some_and(Feedback::is_canceled))
                .take(limit),
        )
    }
}
