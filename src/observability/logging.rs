//! # Logging
//!
//! Tracing subscriber setup. `RUST_LOG` drives filtering and `LOG_FORMAT`
//! selects between human-readable text and JSON lines.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "asset_store_controller=info";

/// Install the global tracing subscriber
///
/// Calling this twice returns an error from the second call; callers at startup
/// treat that as fatal, tests simply ignore it.
pub fn init_logging(log_format: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let result = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_target(true)
            .with_env_filter(filter)
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}
