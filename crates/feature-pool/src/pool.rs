//! FeaturePool - Per-layer cache in front of a backing layer
//!
//! The pool answers feature lookups and rectangle queries for one layer while many validation
//! threads share it. Cache and spatial index sit together in a [`FeatureStore`] behind one
//! `RwLock`:
//!
//! - lookups and intersection queries take the lock shared,
//! - every mutation takes it exclusive for one [`FeatureStore`] call,
//! - the backing layer is only ever read with the lock released.
//!
//! A miss is therefore "unlocked load, locked publish". Threads missing on the same id race to
//! the backing layer and the last one to publish wins; both receive a correct snapshot.

use crate::{
    Crs, Feature, FeatureId, FeatureLayer, FeatureRequest, FeatureStore, Feedback, GeometryType,
    LayerMetadata, PoolError, Result, SpatialIndex, index, utils,
};
use geo::Rect;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Default number of feature snapshots a pool keeps in memory
pub const CACHE_SIZE: usize = 1000;

/// Configuration for a feature pool
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Maximum number of cached snapshots before LRU eviction.
    /// Default: [`CACHE_SIZE`]
    pub cache_capacity: NonZeroUsize,
    /// Root extent of the spatial index, in layer coordinates.
    /// Boxes outside it are still indexed. Default: the Web Mercator plane
    pub index_extent: Rect<f64>,
    /// Entries per quadtree node before it splits (default 16)
    pub node_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cache_capacity: NonZeroUsize::MIN.saturating_add(CACHE_SIZE - 1),
            index_extent: utils::mercator_extent(),
            node_capacity: index::DEFAULT_NODE_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Default configuration with a different cache capacity (clamped to at least 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache_capacity: NonZeroUsize::MIN.saturating_add(capacity.saturating_sub(1)),
            ..Self::default()
        }
    }
}

/// Point-in-time statistics of a pool
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolInfo {
    pub layer_id: String,
    /// Snapshots currently held by the cache
    pub cached_features: usize,
    /// Ids with a bounding box in the spatial index
    pub indexed_features: usize,
    /// Size of the declared id universe
    pub known_features: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Misses the backing layer could not satisfy
    pub failed_fetches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failed_fetches: AtomicU64,
}

/// Feature cache and spatial index for one layer, shared between worker threads
pub struct FeaturePool {
    /// Non-owning handle; the layer may go away while the pool lives
    layer: Weak<dyn FeatureLayer>,
    metadata: LayerMetadata,
    store: RwLock<FeatureStore>,
    /// Declared id universe, independent from what is cached or indexed
    feature_ids: RwLock<HashSet<FeatureId>>,
    counters: Counters,
}

impl std::fmt::Debug for FeaturePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeaturePool")
            .field("layer_id", &self.metadata.layer_id)
            .field("store", &*self.read_store())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FeaturePool {
    /// Create a pool for `layer`, reading its metadata once
    ///
    /// Only a weak handle is kept, so the pool does not extend the layer's lifetime.
    pub fn new<L: FeatureLayer + 'static>(layer: &Arc<L>, config: PoolConfig) -> Self {
        let metadata = layer.metadata();
        let weak = Arc::downgrade(layer);
        let weak: Weak<dyn FeatureLayer> = weak;
        Self::with_metadata(weak, metadata, config)
    }

    /// Create a pool from an existing weak handle and already known metadata
    pub fn with_metadata(
        layer: Weak<dyn FeatureLayer>,
        metadata: LayerMetadata,
        config: PoolConfig,
    ) -> Self {
        tracing::debug!(
            layer_id = %metadata.layer_id,
            capacity = config.cache_capacity.get(),
            "Creating feature pool"
        );
        let index = SpatialIndex::new(config.index_extent, config.node_capacity);
        Self {
            layer,
            metadata,
            store: RwLock::new(FeatureStore::new(config.cache_capacity, index)),
            feature_ids: RwLock::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Look up a feature, loading it from the backing layer on a cache miss
    ///
    /// Returns `None` when the layer has no such feature, cannot be read, or `feedback` was
    /// canceled. A failed load leaves cache and index untouched. A hit may briefly take the
    /// exclusive lock to refresh the entry's LRU position.
    pub fn get_feature(&self, id: FeatureId, feedback: Option<&Feedback>) -> Option<Arc<Feature>> {
        let cached = self.read_store().get(id);
        if let Some(feature) = cached {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.touch(id);
            return Some(feature);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.fetch(id, feedback) {
            Ok(Some(feature)) => {
                let feature = Arc::new(feature);
                self.publish(Arc::clone(&feature));
                Some(feature)
            }
            Ok(None) => {
                tracing::debug!(layer_id = %self.metadata.layer_id, id, "Feature not found");
                self.counters.failed_fetches.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                tracing::debug!(layer_id = %self.metadata.layer_id, id, "Feature load failed: {err}");
                self.counters.failed_fetches.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Load every feature matching `request` into the pool
    ///
    /// Each feature is published on its own, so other threads see it as soon as it is inserted.
    /// Returns the ids produced by the backing layer; an unreadable layer yields an empty set.
    pub fn get_features(
        &self,
        request: &FeatureRequest,
        feedback: Option<&Feedback>,
    ) -> HashSet<FeatureId> {
        #[cfg(feature = "profiling")]
        profiling::scope!("pool::get_features");

        let source = match self
            .source_layer()
            .and_then(|layer| layer.open_feature_source(feedback))
        {
            Ok(source) => source,
            Err(err) => {
                tracing::debug!(layer_id = %self.metadata.layer_id, "Bulk load skipped: {err}");
                return HashSet::new();
            }
        };

        let mut ids = HashSet::new();
        for feature in source.get_features(request, feedback) {
            ids.insert(feature.id());
            self.publish(Arc::new(feature));
        }

        tracing::trace!(layer_id = %self.metadata.layer_id, count = ids.len(), "Bulk load done");
        ids
    }

    /// Ids whose indexed bounding box intersects `rect`
    ///
    /// Only features already loaded or inserted are known to the index; the backing layer is
    /// never consulted.
    pub fn get_intersects(&self, rect: Rect<f64>) -> HashSet<FeatureId> {
        self.read_store().intersects(rect).into_iter().collect()
    }

    /// Seed the pool with a feature obtained elsewhere, without reading the backing layer
    pub fn insert_feature(&self, feature: impl Into<Arc<Feature>>) {
        self.publish(feature.into());
    }

    /// Drop a stale snapshot and reload the feature from the backing layer
    ///
    /// Readers running concurrently see either a miss or the reloaded value. Returns the reloaded
    /// snapshot, or `None` if the feature no longer exists in the layer.
    pub fn refresh_cache(&self, stale: &Feature) -> Option<Arc<Feature>> {
        let id = stale.id();
        self.write_store().remove(id);
        tracing::trace!(layer_id = %self.metadata.layer_id, id, "Refreshing feature");

        self.get_feature(id, None)
    }

    /// Forget a feature that was deleted upstream
    ///
    /// Removes it from cache and index; absent ids are fine. The declared ids are left alone.
    pub fn remove_feature(&self, id: FeatureId) {
        let removed = self.write_store().remove(id);
        tracing::trace!(
            layer_id = %self.metadata.layer_id,
            id,
            was_cached = removed.is_some(),
            "Removed feature"
        );
    }

    /// Declare the ids that belong to the layer
    pub fn set_feature_ids(&self, ids: HashSet<FeatureId>) {
        *self
            .feature_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner) = ids;
    }

    /// The declared ids, regardless of what is cached
    pub fn all_feature_ids(&self) -> HashSet<FeatureId> {
        self.feature_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a snapshot of `id` is in the value cache
    ///
    /// An id evicted from the cache reports `false` even though it is still spatially queryable.
    #[inline]
    pub fn is_feature_cached(&self, id: FeatureId) -> bool {
        self.read_store().is_cached(id)
    }

    /// The backing layer, if it is still alive
    #[inline]
    pub fn layer(&self) -> Option<Arc<dyn FeatureLayer>> {
        self.layer.upgrade()
    }

    #[inline]
    pub fn layer_id(&self) -> &str {
        &self.metadata.layer_id
    }

    #[inline]
    pub fn geometry_type(&self) -> GeometryType {
        self.metadata.geometry_type
    }

    #[inline]
    pub fn crs(&self) -> &Crs {
        &self.metadata.crs
    }

    #[inline]
    pub fn capacity(&self) -> NonZeroUsize {
        self.read_store().capacity()
    }

    /// Snapshot of sizes and counters
    pub fn info(&self) -> PoolInfo {
        let (cached_features, indexed_features) = {
            let store = self.read_store();
            (store.cached_len(), store.indexed_len())
        };
        PoolInfo {
            layer_id: self.metadata.layer_id.clone(),
            cached_features,
            indexed_features,
            known_features: self
                .feature_ids
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            cache_hits: self.counters.hits.load(Ordering::Relaxed),
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            failed_fetches: self.counters.failed_fetches.load(Ordering::Relaxed),
        }
    }

    /// Read a single feature from the backing layer, without touching the store
    fn fetch(&self, id: FeatureId, feedback: Option<&Feedback>) -> Result<Option<Feature>> {
        let layer = self.source_layer()?;
        let source = layer.open_feature_source(feedback)?;
        let feature = source
            .get_features(&FeatureRequest::by_id(id), feedback)
            .next();
        Ok(feature)
    }

    fn source_layer(&self) -> Result<Arc<dyn FeatureLayer>> {
        self.layer.upgrade().ok_or_else(|| PoolError::SourceUnavailable {
            layer_id: self.metadata.layer_id.clone(),
        })
    }

    /// Insert into cache and index under one exclusive lock
    fn publish(&self, feature: Arc<Feature>) {
        let evicted = self.write_store().insert(feature);
        if let Some(evicted) = evicted {
            tracing::trace!(layer_id = %self.metadata.layer_id, evicted, "Evicted feature from cache");
        }
    }

    /// Best-effort LRU promotion after a hit
    ///
    /// Hits are served under the shared lock, which cannot reorder the LRU list. Promotion is
    /// skipped when the exclusive lock is contended.
    fn touch(&self, id: FeatureId) {
        if let Ok(mut store) = self.store.try_write() {
            store.promote(id);
        }
    }

    fn read_store(&self) -> RwLockReadGuard<'_, FeatureStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, FeatureStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeatureSource, MemoryLayer};
    use geo::coord;
    use std::sync::{Barrier, Mutex, mpsc};
    use std::time::Duration;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
    }

    /// Unit square feature at grid cell (id % 10, id / 10), 10 units apart
    fn square(id: FeatureId) -> Feature {
        let x = (id % 10) as f64 * 10.0;
        let y = (id / 10) as f64 * 10.0;
        Feature::new(id, rect(x, y, x + 1.0, y + 1.0)).with_attribute("row", id / 10)
    }

    fn test_layer(count: i64) -> Arc<MemoryLayer> {
        let metadata = LayerMetadata {
            layer_id: "parcels".to_string(),
            geometry_type: GeometryType::Polygon,
            crs: Crs::new("EPSG:2056"),
        };
        Arc::new(MemoryLayer::new(metadata).with_features((0..count).map(square)))
    }

    fn test_config(capacity: usize) -> PoolConfig {
        PoolConfig {
            index_extent: rect(0.0, 0.0, 100.0, 100.0),
            node_capacity: 4,
            ..PoolConfig::with_capacity(capacity)
        }
    }

    fn everywhere() -> Rect<f64> {
        rect(-1000.0, -1000.0, 1000.0, 1000.0)
    }

    #[test]
    fn test_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.cache_capacity.get(), CACHE_SIZE);
        assert_eq!(PoolConfig::with_capacity(0).cache_capacity.get(), 1);
        assert_eq!(PoolConfig::with_capacity(2).cache_capacity.get(), 2);
    }

    #[test]
    fn test_metadata_accessors() {
        let layer = test_layer(0);
        let pool = FeaturePool::new(&layer, test_config(10));

        assert_eq!(pool.layer_id(), "parcels");
        assert_eq!(pool.geometry_type(), GeometryType::Polygon);
        assert_eq!(pool.crs().auth_id(), "EPSG:2056");
        assert_eq!(pool.capacity().get(), 10);
        assert!(pool.layer().is_some());
    }

    #[test]
    fn test_get_feature_loads_and_caches() {
        let layer = test_layer(20);
        let pool = FeaturePool::new(&layer, test_config(10));

        assert!(!pool.is_feature_cached(5));
        let feature = pool.get_feature(5, None).unwrap();
        assert_eq!(*feature, square(5));
        assert!(pool.is_feature_cached(5));
        assert_eq!(layer.fetch_count(), 1);

        // Second lookup is a hit and does not read the layer again
        let again = pool.get_feature(5, None).unwrap();
        assert!(Arc::ptr_eq(&feature, &again));
        assert_eq!(layer.fetch_count(), 1);

        let info = pool.info();
        assert_eq!(info.cache_hits, 1);
        assert_eq!(info.cache_misses, 1);
        assert_eq!(info.failed_fetches, 0);
    }

    #[test]
    fn test_missing_feature_leaves_state_untouched() {
        let layer = test_layer(5);
        let pool = FeaturePool::new(&layer, test_config(10));
        pool.get_feature(1, None).unwrap();

        assert!(pool.get_feature(42, None).is_none());
        assert!(!pool.is_feature_cached(42));
        assert_eq!(pool.get_intersects(everywhere()), HashSet::from([1]));
        assert_eq!(pool.info().failed_fetches, 1);
    }

    #[test]
    fn test_unavailable_layer_reports_not_found() {
        let layer = test_layer(5);
        let pool = FeaturePool::new(&layer, test_config(10));

        layer.set_available(false);
        assert!(pool.get_feature(1, None).is_none());
        assert!(pool.get_features(&FeatureRequest::all(), None).is_empty());
        assert!(!pool.is_feature_cached(1));

        layer.set_available(true);
        assert!(pool.get_feature(1, None).is_some());
    }

    #[test]
    fn test_dropped_layer_reports_not_found() {
        let layer = test_layer(5);
        let pool = FeaturePool::new(&layer, test_config(10));
        pool.get_feature(1, None).unwrap();
        drop(layer);

        assert!(pool.layer().is_none());
        // Cached snapshots survive the layer, new loads fail
        assert!(pool.get_feature(1, None).is_some());
        assert!(pool.get_feature(2, None).is_none());
        assert!(pool.get_intersects(everywhere()).contains(&1));
    }

    #[test]
    fn test_canceled_fetch_reports_not_found() {
        let layer = test_layer(5);
        let pool = FeaturePool::new(&layer, test_config(10));
        let feedback = Feedback::new();
        feedback.cancel();

        assert!(pool.get_feature(3, Some(&feedback)).is_none());
        assert!(pool.get_features(&FeatureRequest::all(), Some(&feedback)).is_empty());
        assert!(!pool.is_feature_cached(3));
        assert!(pool.get_intersects(everywhere()).is_empty());
    }

    /// Source wrapper that stops after `after` features until another thread lets it resume
    struct PausingLayer {
        inner: Arc<MemoryLayer>,
        pause: Arc<Pause>,
    }

    struct Pause {
        after: usize,
        reached: mpsc::Sender<()>,
        resume: Mutex<mpsc::Receiver<()>>,
    }

    struct PausingSource {
        inner: Box<dyn FeatureSource>,
        pause: Arc<Pause>,
    }

    impl FeatureLayer for PausingLayer {
        fn metadata(&self) -> LayerMetadata {
            self.inner.metadata()
        }

        fn open_feature_source(&self, feedback: Option<&Feedback>) -> Result<Box<dyn FeatureSource>> {
            Ok(Box::new(PausingSource {
                inner: self.inner.open_feature_source(feedback)?,
                pause: Arc::clone(&self.pause),
            }))
        }
    }

    impl FeatureSource for PausingSource {
        fn get_features<'a>(
            &'a self,
            request: &FeatureRequest,
            feedback: Option<&'a Feedback>,
        ) -> Box<dyn Iterator<Item = Feature> + 'a> {
            let pause = &self.pause;
            Box::new(
                self.inner
                    .get_features(request, feedback)
                    .enumerate()
                    .map(move |(n, feature)| {
                        if n + 1 == pause.after {
                            pause.reached.send(()).unwrap();
                            pause.resume.lock().unwrap().recv().unwrap();
                        }
                        feature
                    }),
            )
        }
    }

    #[test]
    fn test_cancel_during_bulk_load_keeps_published_features() {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let layer = Arc::new(PausingLayer {
            inner: test_layer(10),
            pause: Arc::new(Pause {
                after: 3,
                reached: reached_tx,
                resume: Mutex::new(resume_rx),
            }),
        });
        let pool = FeaturePool::new(&layer, test_config(100));
        let feedback = Feedback::new();

        let ids = std::thread::scope(|s| {
            let loader = s.spawn(|| pool.get_features(&FeatureRequest::all(), Some(&feedback)));

            reached_rx.recv().unwrap();
            // Two features are already in the pool, the third is in flight
            assert!(pool.is_feature_cached(1));
            assert!(!pool.is_feature_cached(2));
            feedback.cancel();
            resume_tx.send(()).unwrap();

            loader.join().unwrap()
        });

        assert_eq!(ids, HashSet::from([0, 1, 2]));
        assert_eq!(pool.info().cached_features, 3);
        assert_eq!(pool.get_intersects(everywhere()), ids);
        assert!(!pool.is_feature_cached(3));
    }

    #[test]
    fn test_get_features_prefetches_working_set() {
        let layer = test_layer(100);
        let pool = FeaturePool::new(&layer, test_config(1000));

        // First two rows of the grid
        let request = FeatureRequest::by_rect(rect(0.0, 0.0, 100.0, 12.0));
        let ids = pool.get_features(&request, None);
        assert_eq!(ids, (0..20).collect::<HashSet<_>>());
        assert!(ids.iter().all(|id| pool.is_feature_cached(*id)));
        assert_eq!(pool.get_intersects(everywhere()), ids);

        // Subsequent lookups are served from memory
        let reads = layer.fetch_count();
        pool.get_feature(7, None).unwrap();
        assert_eq!(layer.fetch_count(), reads);
    }

    #[test]
    fn test_get_features_by_attribute() {
        let layer = test_layer(30);
        let pool = FeaturePool::new(&layer, test_config(100));

        let ids = pool.get_features(&FeatureRequest::all().with_attribute("row", 2_i64), None);
        assert_eq!(ids, (20..30).collect::<HashSet<_>>());
    }

    #[test]
    fn test_intersects_empty_before_any_load() {
        let layer = test_layer(50);
        let pool = FeaturePool::new(&layer, test_config(10));
        pool.set_feature_ids(layer.feature_ids());

        assert_eq!(pool.all_feature_ids().len(), 50);
        assert!(pool.get_intersects(everywhere()).is_empty());
    }

    #[test]
    fn test_intersects_only_matching_boxes() {
        let layer = test_layer(100);
        let pool = FeaturePool::new(&layer, test_config(1000));
        pool.get_features(&FeatureRequest::all(), None);

        // Touches cells (1,1), (2,1), (1,2), (2,2)
        let hits = pool.get_intersects(rect(11.0, 11.0, 20.0, 20.0));
        assert_eq!(hits, HashSet::from([11, 12, 21, 22]));
    }

    #[test]
    fn test_insert_feature_does_not_read_layer() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));

        pool.insert_feature(square(3));
        assert!(pool.is_feature_cached(3));
        assert_eq!(pool.get_feature(3, None).unwrap().id(), 3);
        assert_eq!(layer.fetch_count(), 0);
    }

    #[test]
    fn test_capacity_two_scenario() {
        let layer = test_layer(0);
        let pool = FeaturePool::new(&layer, test_config(2));
        let (a, b, c) = (square(1), square(2), square(3));
        let union = utils::rect_union(
            utils::rect_union(a.bounding_box().unwrap(), b.bounding_box().unwrap()),
            c.bounding_box().unwrap(),
        );

        pool.insert_feature(a);
        pool.insert_feature(b);
        pool.insert_feature(c);

        assert!(!pool.is_feature_cached(1));
        assert!(pool.is_feature_cached(2));
        assert!(pool.is_feature_cached(3));
        assert_eq!(pool.get_intersects(union), HashSet::from([1, 2, 3]));
    }

    #[test]
    fn test_eviction_keeps_index_for_all_ids() {
        let layer = test_layer(50);
        let pool = FeaturePool::new(&layer, test_config(5));

        for id in 0..50 {
            pool.get_feature(id, None).unwrap();
        }

        let info = pool.info();
        assert_eq!(info.cached_features, 5);
        assert_eq!(info.indexed_features, 50);
        assert_eq!(pool.get_intersects(everywhere()).len(), 50);
        // Evicted but still spatially queryable
        assert!(!pool.is_feature_cached(0));
        assert!(pool.get_intersects(rect(0.0, 0.0, 1.0, 1.0)).contains(&0));
    }

    #[test]
    fn test_hit_promotes_entry() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(2));

        pool.get_feature(1, None).unwrap();
        pool.get_feature(2, None).unwrap();
        pool.get_feature(1, None).unwrap(); // hit, 2 becomes least recently used
        pool.get_feature(3, None).unwrap();

        assert!(pool.is_feature_cached(1));
        assert!(!pool.is_feature_cached(2));
    }

    #[test]
    fn test_remove_feature() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));
        pool.set_feature_ids(layer.feature_ids());
        let feature = pool.get_feature(4, None).unwrap();
        let bbox = feature.bounding_box().unwrap();

        layer.delete(4);
        pool.remove_feature(4);

        assert!(!pool.is_feature_cached(4));
        assert!(!pool.get_intersects(bbox).contains(&4));
        // Declared ids are the caller's business
        assert!(pool.all_feature_ids().contains(&4));
        // Removing an unknown id is harmless
        pool.remove_feature(999);
    }

    #[test]
    fn test_remove_evicted_feature_clears_index() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(1));
        pool.get_feature(1, None).unwrap();
        pool.get_feature(2, None).unwrap();
        assert!(!pool.is_feature_cached(1));

        layer.delete(1);
        pool.remove_feature(1);
        assert!(!pool.get_intersects(everywhere()).contains(&1));
    }

    #[test]
    fn test_refresh_cache_reads_current_value() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));
        let stale = pool.get_feature(6, None).unwrap();
        let old_bbox = stale.bounding_box().unwrap();

        let moved = Feature::new(6, rect(500.0, 500.0, 501.0, 501.0)).with_attribute("row", 50_i64);
        layer.upsert(moved.clone());
        // Still the stale snapshot until refreshed
        assert_eq!(*pool.get_feature(6, None).unwrap(), *stale);

        let refreshed = pool.refresh_cache(&stale).unwrap();
        assert_eq!(*refreshed, moved);
        assert_eq!(*pool.get_feature(6, None).unwrap(), moved);
        assert!(!pool.get_intersects(old_bbox).contains(&6));
        assert!(pool.get_intersects(rect(500.0, 500.0, 501.0, 501.0)).contains(&6));
    }

    #[test]
    fn test_refresh_deleted_feature() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));
        let stale = pool.get_feature(6, None).unwrap();

        layer.delete(6);
        assert!(pool.refresh_cache(&stale).is_none());
        assert!(!pool.is_feature_cached(6));
        assert!(!pool.get_intersects(everywhere()).contains(&6));
    }

    #[test]
    fn test_known_ids_independent_from_cache() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));

        pool.set_feature_ids(HashSet::from([100, 101]));
        assert!(!pool.is_feature_cached(100));

        // Loading an undeclared id does not add it to the declared set
        pool.get_feature(1, None).unwrap();
        assert_eq!(pool.all_feature_ids(), HashSet::from([100, 101]));
        assert_eq!(pool.info().known_features, 2);
    }

    #[test]
    fn test_geometryless_feature_cached_not_indexed() {
        let layer = test_layer(0);
        let pool = FeaturePool::new(&layer, test_config(10));

        pool.insert_feature(Feature::without_geometry(9));
        assert!(pool.is_feature_cached(9));
        assert!(pool.get_intersects(everywhere()).is_empty());
    }

    #[test]
    fn test_concurrent_misses_on_same_id() {
        // Both threads may read the layer; duplicate reads are the accepted cost of never
        // holding the lock during I/O.
        let layer = Arc::new(
            MemoryLayer::new(test_layer(0).metadata())
                .with_features((0..10).map(square))
                .with_latency(Duration::from_millis(20)),
        );
        let pool = FeaturePool::new(&layer, test_config(10));
        let barrier = Barrier::new(2);

        let results: Vec<Option<Arc<Feature>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        pool.get_feature(7, None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in &results {
            assert_eq!(**result.as_ref().unwrap(), square(7));
        }
        assert!((1..=2).contains(&layer.fetch_count()));
        assert_eq!(pool.info().cached_features, 1);
        assert_eq!(*pool.get_feature(7, None).unwrap(), square(7));
        assert_eq!(pool.get_intersects(everywhere()), HashSet::from([7]));
    }

    #[test]
    fn test_readers_never_see_stale_value_after_refresh() {
        let layer = test_layer(10);
        let pool = FeaturePool::new(&layer, test_config(10));
        let stale = pool.get_feature(2, None).unwrap();
        let fresh = Feature::new(2, rect(70.0, 70.0, 71.0, 71.0));
        layer.upsert(fresh.clone());

        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                for _ in 0..200 {
                    if let Some(seen) = pool.get_feature(2, None) {
                        assert!(*seen == *stale || *seen == fresh);
                    }
                }
            });

            pool.refresh_cache(&stale);
            // Once refresh returns, the stale snapshot is gone for every reader
            assert_eq!(*pool.get_feature(2, None).unwrap(), fresh);
            reader.join().unwrap();
        });

        assert_eq!(*pool.get_feature(2, None).unwrap(), fresh);
    }

    #[test]
    fn test_parallel_workers_keep_cache_and_index_consistent() {
        let layer = test_layer(100);
        let pool = FeaturePool::new(&layer, test_config(16));

        std::thread::scope(|s| {
            for worker in 0..8_i64 {
                let pool = &pool;
                s.spawn(move || {
                    for step in 0..200_i64 {
                        let id = (worker * 37 + step * 13) % 100;
                        match step % 5 {
                            0 => {
                                pool.get_intersects(rect(0.0, 0.0, 50.0, 50.0));
                            }
                            1 => pool.insert_feature(square(id)),
                            2 => {
                                if let Some(feature) = pool.get_feature(id, None) {
                                    pool.refresh_cache(&feature);
                                }
                            }
                            _ => {
                                pool.get_feature(id, None);
                            }
                        }
                    }
                });
            }
        });

        let store = pool.read_store();
        assert!(store.cached_len() <= 16);
        for id in 0..100 {
            // Every cached snapshot has its box indexed
            if store.is_cached(id) {
                assert!(store.is_indexed(id));
            }
        }
        assert!(store.indexed_len() <= 100);
    }
}
