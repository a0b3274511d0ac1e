//! # Logging
//!
//! Tracing subscriber setup. `RUST_LOG` controls filtering (default
//! `cache_operator=info`); `LOG_FORMAT=json` switches to JSON lines.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "cache_operator=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn init_tracing(log_format: &str) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    let result = if log_format.eq_ignore_ascii_case("json") {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .try_init()
    } else {
        builder.with_target(true).try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
