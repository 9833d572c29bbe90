//! Logging initialization for the CLI
//!
//! Output goes through a `tracing-subscriber` fmt layer filtered by `RUST_LOG`. When the
//! variable is unset a default filter is used: debug output for the pool in debug builds,
//! info otherwise.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const DEBUG_FILTER: &str = "info,feature_pool=debug,feature_pool_cli=debug";
const RELEASE_FILTER: &str = "info";

fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        DEBUG_FILTER
    } else {
        RELEASE_FILTER
    }
}

pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let fmt_layer = fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!("Logging initialized");
}
