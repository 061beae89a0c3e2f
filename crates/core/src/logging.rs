//! Structured logging setup.
//!
//! Library code only emits `tracing` events; binaries and test harnesses
//! pick a subscriber here. The filter comes from `RUST_LOG` and falls back
//! to [`DEFAULT_DIRECTIVE`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install a human-readable subscriber on stderr.
///
/// # Example
/// ```no_run
/// use streamkeeper_core::logging;
///
/// logging::init();
/// tracing::info!(stream = "//main", "Loading hierarchy");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

/// Install a JSON subscriber for log aggregation.
///
/// Publish stages and changelist ids are emitted as structured fields, so
/// they survive as JSON keys.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
        .init();
}

/// Like [`init`], but tolerates a subscriber that is already installed.
///
/// Intended for tests, where several cases race to set the global default.
pub fn try_init() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
