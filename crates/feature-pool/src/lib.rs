//! Feature Pool - Per-layer feature cache for concurrent geometry checks
//!
//! This library sits between CPU-bound validation algorithms and a slow, possibly remote,
//! vector data store. Each layer gets one [`FeaturePool`] that answers "give me feature X" and
//! "which features intersect this rectangle" from memory, fetching from the backing layer only on
//! a cache miss.
//!
//! # Architecture
//!
//! - **[`Feature`]**: Immutable snapshot of a feature's geometry and attributes
//! - **[`FeatureLayer`] / [`FeatureSource`]**: Interfaces to the backing store
//! - **[`SpatialIndex`]**: Id-keyed quadtree of bounding boxes
//! - **[`FeatureStore`]**: LRU value cache and spatial index moved as one unit
//! - **[`FeaturePool`]**: Lock-guarded store plus the load/insert/refresh/remove protocol
//! - **[`MemoryLayer`]**: In-memory backing layer, loadable from GPX files
//!
//! # Concurrency
//!
//! A single reader/writer lock guards the store. Lookups take it shared, mutations take it
//! exclusive, and it is never held while the backing layer is being read: a miss is an
//! unlocked load followed by a locked publish. Two threads missing on the same id both fetch and
//! the last insert wins.

mod feature;
pub mod loader;
mod index;
mod memory;
mod pool;
mod request;
mod source;
mod store;
pub mod utils;

// Public API exports
pub use feature::{AttributeValue, Attributes, Crs, Feature, FeatureId, GeometryType};
pub use index::SpatialIndex;
pub use memory::MemoryLayer;
pub use pool::{CACHE_SIZE, FeaturePool, PoolConfig, PoolInfo};
pub use request::FeatureRequest;
pub use source::{FeatureLayer, FeatureSource, Feedback, LayerMetadata};
pub use store::FeatureStore;

/// Error types for the pool and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Layer {layer_id} cannot supply a feature source")]
    SourceUnavailable { layer_id: String },

    #[error("Operation canceled")]
    Canceled,

    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty layer")]
    EmptyLayer,
}

pub type Result<T> = std::result::Result<T, PoolError>;
