//! Parallel validation-style workload over a feature pool
//!
//! The layer extent is cut into a grid of tiles. Each tile is handled by one rayon task which:
//! 1. prefetches the tile's features with a bulk request and keeps the ones it owns,
//! 2. asks the spatial index for every feature's neighbour candidates,
//! 3. loads each candidate through the pool and tests the geometries for intersection.
//!
//! Tiles share the pool, so neighbouring tasks hit each other's cached features.

use crate::settings::Settings;
use feature_pool::{
    FeatureId, FeaturePool, FeatureRequest, MemoryLayer, PoolConfig, PoolError, PoolInfo, loader,
};
use geo::{Coord, Intersects, Rect};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Cannot start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-tile counters, summed over all tiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileStats {
    /// Features owned by the tile
    pub features: usize,
    /// Candidate pairs returned by the spatial index
    pub candidates: usize,
    /// Candidate pairs whose geometries really intersect
    pub intersecting: usize,
}

impl std::ops::Add for TileStats {
    type Output = TileStats;

    fn add(self, other: TileStats) -> TileStats {
        TileStats {
            features: self.features + other.features,
            candidates: self.candidates + other.candidates,
            intersecting: self.intersecting + other.intersecting,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tiles: usize,
    pub stats: TileStats,
    pub info: PoolInfo,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn log(&self) {
        tracing::info!(
            tiles = self.tiles,
            features = self.stats.features,
            candidates = self.stats.candidates,
            intersecting = self.stats.intersecting,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Run finished"
        );
        tracing::info!(
            layer_id = %self.info.layer_id,
            cached = self.info.cached_features,
            indexed = self.info.indexed_features,
            known = self.info.known_features,
            hits = self.info.cache_hits,
            misses = self.info.cache_misses,
            failed = self.info.failed_fetches,
            "Pool statistics"
        );
    }
}

/// Load the GPX files named in `settings` and run the workload on them
pub fn run(settings: &Settings) -> Result<RunReport, CliError> {
    let layer = loader::load_from_files(&settings.layer_id, &settings.gpx_files)?
        .with_latency(Duration::from_millis(settings.latency_ms));
    run_layer(Arc::new(layer), settings)
}

/// Run the workload against an already built layer
pub fn run_layer(layer: Arc<MemoryLayer>, settings: &Settings) -> Result<RunReport, CliError> {
    let start = Instant::now();
    let extent = layer.extent().ok_or(PoolError::EmptyLayer)?;

    let config = PoolConfig {
        index_extent: extent,
        ..PoolConfig::with_capacity(settings.capacity)
    };
    let pool = FeaturePool::new(&layer, config);
    pool.set_feature_ids(layer.feature_ids());

    let grid = TileGrid::new(extent, settings.tiles);
    tracing::info!(
        layer_id = %pool.layer_id(),
        features = layer.len(),
        tiles = grid.tile_count(),
        capacity = pool.capacity().get(),
        "Starting workers"
    );

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = settings.worker_threads() {
        builder = builder.num_threads(threads);
    }
    let workers = builder.build()?;

    let stats = workers.install(|| {
        (0..grid.tile_count())
            .into_par_iter()
            .map(|index| check_tile(&pool, &grid, index))
            .reduce(TileStats::default, |a, b| a + b)
    });

    Ok(RunReport {
        tiles: grid.tile_count(),
        stats,
        info: pool.info(),
        elapsed: start.elapsed(),
    })
}

/// Regular grid of `per_side * per_side` tiles over a layer extent
///
/// Every point of the extent belongs to exactly one tile, so a feature is owned by the tile
/// holding the min corner of its bounding box even when it overlaps several tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    extent: Rect<f64>,
    per_side: usize,
}

impl TileGrid {
    /// Grid over `extent` (at least one tile)
    pub fn new(extent: Rect<f64>, per_side: u32) -> Self {
        Self {
            extent,
            per_side: (per_side as usize).max(1),
        }
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.per_side * self.per_side
    }

    /// Tile at `index`, in row-major order
    pub fn tile(&self, index: usize) -> Rect<f64> {
        let (width, height) = self.cell_size();
        let min = self.extent.min();
        let x = min.x + (index % self.per_side) as f64 * width;
        let y = min.y + (index / self.per_side) as f64 * height;
        Rect::new(
            Coord { x, y },
            Coord {
                x: x + width,
                y: y + height,
            },
        )
    }

    /// Index of the tile owning `point`; points outside the extent go to the nearest edge tile
    pub fn owner_of(&self, point: Coord<f64>) -> usize {
        let (width, height) = self.cell_size();
        let min = self.extent.min();
        let last = self.per_side - 1;
        // NaN (zero-sized extent) casts to 0
        let col = (((point.x - min.x) / width).floor() as usize).min(last);
        let row = (((point.y - min.y) / height).floor() as usize).min(last);
        row * self.per_side + col
    }

    fn cell_size(&self) -> (f64, f64) {
        (
            self.extent.width() / self.per_side as f64,
            self.extent.height() / self.per_side as f64,
        )
    }
}

/// Check every feature owned by tile `index` against its indexed neighbours
///
/// The tile's features are prefetched with a rectangle request, which also loads features that
/// merely touch it. Only owned features are counted, and each candidate pair is counted by the
/// owner of its lower id, so summing all tiles counts every feature and pair once.
pub fn check_tile(pool: &FeaturePool, grid: &TileGrid, index: usize) -> TileStats {
    #[cfg(feature = "profiling")]
    profiling::scope!("run::check_tile");

    let ids = pool.get_features(&FeatureRequest::by_rect(grid.tile(index)), None);
    let mut stats = TileStats::default();

    for &id in &ids {
        let Some(feature) = pool.get_feature(id, None) else {
            continue;
        };
        let (Some(bbox), Some(geometry)) = (feature.bounding_box(), feature.geometry()) else {
            continue;
        };
        if grid.owner_of(bbox.min()) != index {
            continue;
        }
        stats.features += 1;

        let mut neighbours: Vec<FeatureId> = pool
            .get_intersects(bbox)
            .into_iter()
            .filter(|other| *other > id)
            .collect();
        neighbours.sort_unstable();

        for other_id in neighbours {
            stats.candidates += 1;
            let Some(other) = pool.get_feature(other_id, None) else {
                continue;
            };
            if other
                .geometry()
                .is_some_and(|other_geometry| geometry.intersects(other_geometry))
            {
                stats.intersecting += 1;
            }
        }
    }

    tracing::trace!(
        tile = index,
        features = stats.features,
        candidates = stats.candidates,
        "Tile checked"
    );
    stats
}
