//! Structured logging setup for CareBand processes.
//!
//! Every crate in the workspace logs through `tracing`; this module installs
//! the subscriber once per process. The filter honours `RUST_LOG` and falls
//! back to `info`. Output goes to stderr; stdout is left to the binaries.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
///
/// # Example
/// ```no_run
/// use careband_core::logging;
///
/// logging::init();
/// tracing::info!("monitor started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Install a JSON subscriber for log shipping.
///
/// # Example
/// ```no_run
/// use careband_core::logging;
///
/// logging::init_json();
/// tracing::info!(user_id = "u-1", "session opened");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Install the subscriber selected by the `[logging]` config section.
pub fn init_from(config: &LoggingConfig) {
    if config.json {
        init_json();
    } else {
        init();
    }
}
