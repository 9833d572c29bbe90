use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Feature Pool - Run parallel validation-style workers against a cached GPX layer
pub struct Settings {
    /// GPX files whose tracks form the layer
    #[clap(value_name = "FILE", required = true)]
    pub gpx_files: Vec<PathBuf>,

    /// Layer identifier used in logs
    #[clap(long, default_value = "tracks")]
    pub layer_id: String,

    /// Maximum number of cached features
    #[clap(short, long, default_value_t = feature_pool::CACHE_SIZE)]
    pub capacity: usize,

    /// Worker threads (0 = one per CPU)
    #[clap(short, long, default_value = "0")]
    pub threads: usize,

    /// Number of grid tiles each side of the layer extent is split into
    #[clap(long, default_value = "8", value_parser = clap::value_parser!(u32).range(1..=1024))]
    pub tiles: u32,

    /// Simulated latency of every read from the layer, in milliseconds
    #[clap(long, default_value = "0")]
    pub latency_ms: u64,
}

impl Settings {
    pub fn from_cli() -> Self {
        Settings::parse()
    }

    /// Thread count for the worker pool, `None` lets rayon decide
    pub fn worker_threads(&self) -> Option<usize> {
        (self.threads > 0).then_some(self.threads)
    }
}
