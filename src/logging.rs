//! Logging configuration for stashql.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is
//! the embedding application's job. These helpers cover the common case for
//! examples and tests.

use tracing_subscriber::EnvFilter;

/// Initializes stderr logging with an environment-driven filter.
///
/// Honors `RUST_LOG`; defaults to `info` when unset. Safe to call more than
/// once; later calls are no-ops if a global subscriber is already installed.
pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
