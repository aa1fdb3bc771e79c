//! Configuration management for CareBand.
//!
//! Loaded from TOML. Every section has defaults, so a file only needs to
//! name the values it overrides:
//!
//! ```toml
//! [session]
//! user_id = "user-42"
//!
//! [thresholds.spo2]
//! clinical_low = 92.0
//! ```

use crate::error::{CoreError, Result};
use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Monitored user and channels
    pub session: SessionConfig,
    /// Per-channel alerting limits
    pub thresholds: ThresholdConfig,
    /// Event-channel alert cooldowns
    pub cooldowns: CooldownConfig,
    /// Raw-sample persistence
    pub persistence: PersistenceConfig,
    /// Retry policy for store and notification calls
    pub retry: RetryConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Session identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Subject user whose wearable is monitored
    pub user_id: String,
    /// Label written to `notifiedTo` on alert records
    pub notified_to: String,
    /// Channels to subscribe to, in order
    pub channels: Vec<Channel>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: "guest".to_string(),
            notified_to: "caregiver".to_string(),
            channels: Channel::ALL.to_vec(),
        }
    }
}

/// Limits for one numeric channel.
///
/// Values outside `[plausible_min, plausible_max]` are sensor artifacts.
/// Values below `clinical_low` or above `clinical_high` are abnormal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalLimits {
    /// Lowest physically plausible reading
    pub plausible_min: f64,
    /// Highest physically plausible reading
    pub plausible_max: f64,
    /// Abnormal below this value
    pub clinical_low: Option<f64>,
    /// Abnormal above this value
    pub clinical_high: Option<f64>,
    /// Continuous abnormal duration before an alert fires (ms)
    pub sustain_ms: u64,
}

/// Alerting limits per numeric channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Heart rate (bpm)
    pub heart_rate: VitalLimits,
    /// Oxygen saturation (%)
    pub spo2: VitalLimits,
    /// Body temperature (°C)
    pub temperature: VitalLimits,
}

impl ThresholdConfig {
    /// Limits for a numeric channel, `None` for event channels.
    pub fn for_channel(&self, channel: Channel) -> Option<&VitalLimits> {
        match channel {
            Channel::HeartRate => Some(&self.heart_rate),
            Channel::SpO2 => Some(&self.spo2),
            Channel::Temperature => Some(&self.temperature),
            Channel::Fall | Channel::DeviceError => None,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            heart_rate: VitalLimits {
                plausible_min: 30.0,
                plausible_max: 180.0,
                clinical_low: Some(50.0),
                clinical_high: Some(120.0),
                sustain_ms: 5_000,
            },
            spo2: VitalLimits {
                plausible_min: 80.0,
                plausible_max: 100.0,
                clinical_low: Some(90.0),
                clinical_high: None,
                sustain_ms: 10_000,
            },
            temperature: VitalLimits {
                plausible_min: 30.0,
                plausible_max: 45.0,
                clinical_low: None,
                clinical_high: Some(37.5),
                sustain_ms: 5_000,
            },
        }
    }
}

/// Minimum spacing between repeat alerts on event channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Fall alerts (ms)
    pub fall_ms: u64,
    /// Device-error alerts (ms)
    pub device_error_ms: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            fall_ms: 5_000,
            device_error_ms: 5_000,
        }
    }
}

/// Raw-sample persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Minimum spacing between persisted samples per channel (ms)
    pub save_interval_ms: u64,
    /// SQLite database file; in-memory store when unset
    pub sqlite_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_interval_ms: 60_000,
            sqlite_path: None,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (ms)
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (ms)
    pub max_backoff_ms: u64,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults.
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.user_id.is_empty() {
            return Err(CoreError::InvalidConfig("session.user_id is empty".into()));
        }
        if self.session.channels.is_empty() {
            return Err(CoreError::InvalidConfig("session.channels is empty".into()));
        }

        for (name, limits) in [
            ("heart_rate", &self.thresholds.heart_rate),
            ("spo2", &self.thresholds.spo2),
            ("temperature", &self.thresholds.temperature),
        ] {
            if limits.plausible_min >= limits.plausible_max {
                return Err(CoreError::InvalidConfig(format!(
                    "thresholds.{name}: plausible_min must be below plausible_max"
                )));
            }
            if let (Some(low), Some(high)) = (limits.clinical_low, limits.clinical_high) {
                if low >= high {
                    return Err(CoreError::InvalidConfig(format!(
                        "thresholds.{name}: clinical_low must be below clinical_high"
                    )));
                }
            }
            if limits.clinical_low.is_none() && limits.clinical_high.is_none() {
                return Err(CoreError::InvalidConfig(format!(
                    "thresholds.{name}: at least one clinical bound is required"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(CoreError::InvalidConfig("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CoreError::InvalidConfig("retry.multiplier must be >= 1.0".into()));
        }

        Ok(())
    }
}
