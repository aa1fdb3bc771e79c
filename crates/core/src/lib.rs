//! Core functionality for the CareBand telemetry engine.
//!
//! This crate provides the types shared by every stage of the pipeline
//! (channels, samples, alert kinds), the TOML configuration layer and the
//! structured logging setup.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    Config, CooldownConfig, LoggingConfig, PersistenceConfig, RetryConfig, SessionConfig,
    ThresholdConfig, VitalLimits,
};
pub use error::{CoreError, Result};
pub use types::{current_timestamp_ms, AlertKind, Channel, DeviceFault, Sample};

/// Crate version, reported by the node binary at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
