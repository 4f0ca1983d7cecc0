//! Logging setup.
//!
//! Log lines go to stderr so that CLI output on stdout stays machine-readable.
//! The filter defaults to `nl2mongo=info,tower_http=info` and can be
//! overridden with `RUST_LOG`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "nl2mongo=info,tower_http=info";

/// Install the global `tracing` subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
