//! Per-session vitals processor.
//!
//! Parses a token, runs the threshold engine and the save-rate limiter
//! against the channel's state, and reports what the caller should do.

use careband_core::{Config, Sample};
use tracing::{debug, info, trace};

use crate::parser::{parse_token, ParseStats, Reading, TokenError};
use crate::rate_limit::SaveRateLimiter;
use crate::state::ChannelStates;
use crate::threshold::{AlertDecision, Evaluation, ThresholdEngine};

/// Decision for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    /// The sample; always forwarded to display
    pub sample: Sample,
    /// Persist as a raw vital record
    pub persist: bool,
    /// Threshold engine verdict
    pub evaluation: Evaluation,
}

impl Outcome {
    /// Alert to dispatch, if any.
    pub fn alert(&self) -> Option<&AlertDecision> {
        self.evaluation.alert()
    }
}

/// Result of ingesting one raw token.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// Token produced a sample
    Sample(Outcome),
    /// Wearable reported sleep mode
    SleepMode,
    /// Token dropped
    Dropped(TokenError),
}

/// Threshold engine, save limiter and per-channel state for one session.
#[derive(Debug, Clone)]
pub struct VitalsProcessor {
    engine: ThresholdEngine,
    limiter: SaveRateLimiter,
    states: ChannelStates,
    stats: ParseStats,
}

impl VitalsProcessor {
    /// Create a processor with empty state.
    pub fn new(engine: ThresholdEngine, limiter: SaveRateLimiter) -> Self {
        Self {
            engine,
            limiter,
            states: ChannelStates::new(),
            stats: ParseStats::default(),
        }
    }

    /// Create a processor from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ThresholdEngine::from_config(config),
            SaveRateLimiter::from_config(config),
        )
    }

    /// Parse and process one token.
    pub fn ingest_token(&mut self, raw: &str, received_at_ms: u64) -> Ingested {
        let parsed = parse_token(raw, received_at_ms);
        self.stats.record(&parsed);

        match parsed {
            Ok(Reading::Sample(sample)) => Ingested::Sample(self.process(sample)),
            Ok(Reading::SleepMode) => {
                info!("Wearable entered sleep mode");
                Ingested::SleepMode
            }
            Err(err) => {
                debug!(error = %err, "Dropping token");
                Ingested::Dropped(err)
            }
        }
    }

    /// Process one decoded sample.
    pub fn process(&mut self, sample: Sample) -> Outcome {
        let state = self.states.entry(sample.channel);
        let evaluation = self.engine.evaluate(&sample, state);
        let persist = !matches!(evaluation, Evaluation::Artifact)
            && self
                .limiter
                .admit(sample.channel, sample.observed_at_ms, state);

        trace!(
            channel = %sample.channel,
            value = ?sample.value,
            persist,
            evaluation = ?evaluation,
            "Sample processed"
        );

        Outcome {
            sample,
            persist,
            evaluation,
        }
    }

    /// Discard all per-channel state. Called on disconnect.
    pub fn reset(&mut self) {
        self.states.reset();
    }

    /// Per-channel state.
    pub fn states(&self) -> &ChannelStates {
        &self.states
    }

    /// Token counters for this processor's lifetime.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}
