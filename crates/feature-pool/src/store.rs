//! Value cache and spatial index moved as one unit
//!
//! [`FeatureStore`] is the structure the pool guards with its lock. Its mutators touch the LRU
//! cache and the spatial index together, so a single exclusive lock scope always leaves them
//! consistent. Retention differs on purpose: LRU eviction drops only the cached value, while the
//! index entry stays until the feature is removed explicitly.

use crate::{Feature, FeatureId, SpatialIndex};
use geo::Rect;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded feature cache paired with an unbounded spatial index
pub struct FeatureStore {
    cache: LruCache<FeatureId, Arc<Feature>>,
    index: SpatialIndex,
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore")
            .field("cached", &self.cache.len())
            .field("capacity", &self.cache.cap())
            .field("indexed", &self.index.len())
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FeatureStore {
    pub fn new(capacity: NonZeroUsize, index: SpatialIndex) -> Self {
        Self {
            cache: LruCache::new(capacity),
            index,
        }
    }

    /// Cached snapshot of `id`
    ///
    /// Uses `peek`, so it works under a shared lock and does not touch recency.
    #[inline]
    pub fn get(&self, id: FeatureId) -> Option<Arc<Feature>> {
        self.cache.peek(&id).cloned()
    }

    /// Mark `id` as most recently used; no-op for ids not cached
    #[inline]
    pub fn promote(&mut self, id: FeatureId) {
        self.cache.promote(&id);
    }

    /// Publish a snapshot into cache and index
    ///
    /// Replaces any previous snapshot of the same id. A feature without geometry is cached but
    /// dropped from the index. Returns the id evicted from the cache to make room, if any.
    pub fn insert(&mut self, feature: Arc<Feature>) -> Option<FeatureId> {
        let id = feature.id();
        match feature.bounding_box() {
            Some(bbox) => self.index.insert(id, bbox),
            None => {
                self.index.remove(id);
            }
        }

        // `push` also hands back the replaced value when the key was already cached
        self.cache
            .push(id, feature)
            .map(|(evicted, _)| evicted)
            .filter(|evicted| *evicted != id)
    }

    /// Drop `id` from both cache and index
    ///
    /// Safe for ids that are absent from either structure.
    pub fn remove(&mut self, id: FeatureId) -> Option<Arc<Feature>> {
        self.index.remove(id);
        self.cache.pop(&id)
    }

    /// Cache membership only; evicted ids may still be indexed
    #[inline]
    pub fn is_cached(&self, id: FeatureId) -> bool {
        self.cache.contains(&id)
    }

    #[inline]
    pub fn is_indexed(&self, id: FeatureId) -> bool {
        self.index.contains(id)
    }

    #[inline]
    pub fn intersects(&self, rect: Rect<f64>) -> Vec<FeatureId> {
        self.index.intersects(rect)
    }

    #[inline]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn indexed_len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn capacity(&self) -> NonZeroUsize {
        self.cache.cap()
    }
}
