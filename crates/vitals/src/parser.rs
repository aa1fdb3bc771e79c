//! Telemetry token parser.
//!
//! Wire format, one token per notification:
//!
//! | Token            | Sample                              |
//! |------------------|-------------------------------------|
//! | `FALL`           | fall event                          |
//! | `BPM:<float>`    | heart rate                          |
//! | `SpO2:<float>`   | oxygen saturation                   |
//! | `TEMP:<float>C`  | temperature (`C` suffix optional)   |
//! | `MPU_ERROR`      | motion sensor fault                 |
//! | `MAX_ERROR`      | optical sensor fault                |
//! | `SLEEP_MODE`     | device status notice, no sample     |
//!
//! Tags are case-sensitive. The parser is pure; callers that want counts
//! keep a [`ParseStats`].

use careband_core::{Channel, DeviceFault, Sample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decoded token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// A telemetry sample
    Sample(Sample),
    /// The wearable entered sleep mode
    SleepMode,
}

/// Why a token produced no reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Payload was empty after trimming
    #[error("Empty token")]
    Empty,

    /// Known tag with a value that does not decode
    #[error("Malformed {tag} value: {value:?}")]
    Malformed {
        /// Tag of the token
        tag: &'static str,
        /// Raw value text
        value: String,
    },

    /// Tag the wearable is not known to send
    #[error("Unknown tag: {0}")]
    UnknownTag(String),
}

/// Decode one token received at `received_at_ms`.
pub fn parse_token(raw: &str, received_at_ms: u64) -> Result<Reading, TokenError> {
    let token = raw.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    match token {
        "FALL" => return Ok(Reading::Sample(Sample::fall(received_at_ms))),
        "MPU_ERROR" => {
            return Ok(Reading::Sample(Sample::device_fault(
                DeviceFault::Motion,
                received_at_ms,
            )))
        }
        "MAX_ERROR" => {
            return Ok(Reading::Sample(Sample::device_fault(
                DeviceFault::Optical,
                received_at_ms,
            )))
        }
        "SLEEP_MODE" => return Ok(Reading::SleepMode),
        _ => {}
    }

    let (tag, value) = token
        .split_once(':')
        .ok_or_else(|| TokenError::UnknownTag(token.to_string()))?;

    let (tag, channel, text) = match tag {
        "BPM" => ("BPM", Channel::HeartRate, value),
        "SpO2" => ("SpO2", Channel::SpO2, value),
        "TEMP" => ("TEMP", Channel::Temperature, value.strip_suffix('C').unwrap_or(value)),
        other => return Err(TokenError::UnknownTag(other.to_string())),
    };

    let number = decode_number(text).ok_or_else(|| TokenError::Malformed {
        tag,
        value: value.to_string(),
    })?;

    Ok(Reading::Sample(Sample::reading(channel, number, received_at_ms)))
}

fn decode_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Token counters kept by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Tokens that produced a sample
    pub samples: u64,
    /// Sleep-mode notices
    pub status_notices: u64,
    /// Known tags with an undecodable value
    pub malformed: u64,
    /// Unknown tags and empty payloads
    pub unknown: u64,
}

impl ParseStats {
    /// Count one parse result.
    pub fn record(&mut self, result: &Result<Reading, TokenError>) {
        match result {
            Ok(Reading::Sample(_)) => self.samples += 1,
            Ok(Reading::SleepMode) => self.status_notices += 1,
            Err(TokenError::Malformed { .. }) => self.malformed += 1,
            Err(TokenError::UnknownTag(_) | TokenError::Empty) => self.unknown += 1,
        }
    }

    /// Tokens that produced nothing.
    pub fn dropped(&self) -> u64 {
        self.malformed + self.unknown
    }

    /// Every token seen.
    pub fn total(&self) -> u64 {
        self.samples + self.status_notices + self.dropped()
    }
}
