//! Structured logging infrastructure for RideMesh.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use ridemesh_core::logging;
///
/// logging::init();
/// tracing::info!("Rider client started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for log aggregation.
///
/// # Example
/// ```no_run
/// use ridemesh_core::logging;
///
/// logging::init_json();
/// tracing::info!(role = "driver", "Driver client started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Install a test-writer subscriber. Safe to call from every test; only the
/// first call in a process takes effect.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_for_tests_is_repeatable() {
        init_for_tests();
        init_for_tests();
        tracing::info!("still logging");
    }
}
