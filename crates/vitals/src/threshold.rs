//! Threshold and debounce engine.
//!
//! Numeric channels alert only after a clinically abnormal value has been
//! seen continuously for the channel's sustain window. One in-range sample
//! resets the timer. A sample outside the plausible sensor range is an
//! artifact and also resets it.
//!
//! Event channels (fall, device error) fire immediately, at most once per
//! cooldown.

use careband_core::{AlertKind, Channel, Config, CooldownConfig, DeviceFault, Sample, ThresholdConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::ChannelState;

/// Where a numeric value falls against a channel's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Outside the plausible sensor range
    Artifact,
    /// Within clinical limits
    Normal,
    /// Below the clinical low bound
    Low,
    /// Above the clinical high bound
    High,
}

/// An alert the dispatcher should raise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertDecision {
    /// Alert kind
    pub kind: AlertKind,
    /// Value of the firing sample, if numeric
    pub value: Option<f64>,
    /// Time of the firing sample (ms)
    pub fired_at_ms: u64,
    /// Start of the abnormal run, for sustained alerts
    pub condition_started_at_ms: Option<u64>,
}

/// Result of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    /// Implausible value; timer reset, nothing persisted
    Artifact,
    /// In range; timer reset
    Normal,
    /// Abnormal, sustain window still running
    Pending {
        /// Start of the abnormal run (ms)
        since_ms: u64,
    },
    /// Raise this alert
    Fire(AlertDecision),
    /// Event inside its cooldown
    Suppressed {
        /// Time left until the next event may fire (ms)
        remaining_ms: u64,
    },
}

impl Evaluation {
    /// The alert to raise, if any.
    pub fn alert(&self) -> Option<&AlertDecision> {
        match self {
            Evaluation::Fire(decision) => Some(decision),
            _ => None,
        }
    }
}

/// Stateless evaluator; all timers live in the caller's [`ChannelState`].
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    thresholds: ThresholdConfig,
    cooldowns: CooldownConfig,
}

impl ThresholdEngine {
    /// Create an engine with explicit limits.
    pub fn new(thresholds: ThresholdConfig, cooldowns: CooldownConfig) -> Self {
        Self {
            thresholds,
            cooldowns,
        }
    }

    /// Create an engine from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.thresholds.clone(), config.cooldowns.clone())
    }

    /// Classify a numeric value. Event channels are always `Normal`.
    pub fn classify(&self, channel: Channel, value: f64) -> Classification {
        let Some(limits) = self.thresholds.for_channel(channel) else {
            return Classification::Normal;
        };
        if value < limits.plausible_min || value > limits.plausible_max {
            return Classification::Artifact;
        }
        if limits.clinical_low.is_some_and(|low| value < low) {
            return Classification::Low;
        }
        if limits.clinical_high.is_some_and(|high| value > high) {
            return Classification::High;
        }
        Classification::Normal
    }

    /// Evaluate one sample against its channel's state.
    pub fn evaluate(&self, sample: &Sample, state: &mut ChannelState) -> Evaluation {
        match sample.channel {
            Channel::Fall => self.evaluate_event(
                AlertKind::Fall,
                self.cooldowns.fall_ms,
                sample.observed_at_ms,
                state,
            ),
            Channel::DeviceError => {
                let kind = match sample.fault {
                    Some(DeviceFault::Motion) => AlertKind::MotionSensorFault,
                    Some(DeviceFault::Optical) => AlertKind::OpticalSensorFault,
                    None => return Evaluation::Artifact,
                };
                self.evaluate_event(
                    kind,
                    self.cooldowns.device_error_ms,
                    sample.observed_at_ms,
                    state,
                )
            }
            channel => self.evaluate_numeric(channel, sample, state),
        }
    }

    fn evaluate_numeric(
        &self,
        channel: Channel,
        sample: &Sample,
        state: &mut ChannelState,
    ) -> Evaluation {
        let now = sample.observed_at_ms;
        let Some(value) = sample.value else {
            state.condition_started_at_ms = None;
            return Evaluation::Artifact;
        };

        let classification = self.classify(channel, value);
        let kind = match (classification, alert_kind(channel, classification)) {
            (Classification::Artifact, _) => {
                if state.condition_started_at_ms.take().is_some() {
                    debug!(%channel, value, "Artifact reset pending condition");
                }
                return Evaluation::Artifact;
            }
            (_, Some(kind)) => kind,
            (_, None) => {
                state.condition_started_at_ms = None;
                return Evaluation::Normal;
            }
        };

        let Some(since) = state.condition_started_at_ms else {
            state.condition_started_at_ms = Some(now);
            debug!(%channel, value, "Abnormal reading, sustain timer started");
            return Evaluation::Pending { since_ms: now };
        };

        let sustain_ms = self
            .thresholds
            .for_channel(channel)
            .map(|l| l.sustain_ms)
            .unwrap_or_default();

        if now.saturating_sub(since) >= sustain_ms {
            state.condition_started_at_ms = None;
            state.last_alert_sent_at_ms = Some(now);
            info!(%channel, value, alert_type = kind.tag(), "Sustained abnormal reading");
            Evaluation::Fire(AlertDecision {
                kind,
                value: Some(value),
                fired_at_ms: now,
                condition_started_at_ms: Some(since),
            })
        } else {
            Evaluation::Pending { since_ms: since }
        }
    }

    fn evaluate_event(
        &self,
        kind: AlertKind,
        cooldown_ms: u64,
        now: u64,
        state: &mut ChannelState,
    ) -> Evaluation {
        if let Some(last) = state.last_alert_sent_at_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < cooldown_ms {
                debug!(alert_type = kind.tag(), elapsed, "Event inside cooldown");
                return Evaluation::Suppressed {
                    remaining_ms: cooldown_ms - elapsed,
                };
            }
        }
        state.last_alert_sent_at_ms = Some(now);
        info!(alert_type = kind.tag(), "Event alert");
        Evaluation::Fire(AlertDecision {
            kind,
            value: None,
            fired_at_ms: now,
            condition_started_at_ms: None,
        })
    }
}

/// Alert kind for an abnormal classification; `None` where no alert exists
/// for that direction (low temperature, high saturation).
fn alert_kind(channel: Channel, classification: Classification) -> Option<AlertKind> {
    match (channel, classification) {
        (Channel::HeartRate, Classification::High) => Some(AlertKind::HeartRateHigh),
        (Channel::HeartRate, Classification::Low) => Some(AlertKind::HeartRateLow),
        (Channel::SpO2, Classification::Low) => Some(AlertKind::SpO2Low),
        (Channel::Temperature, Classification::High) => Some(AlertKind::TemperatureHigh),
        _ => None,
    }
}
