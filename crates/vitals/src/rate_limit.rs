//! Save-rate limiter.
//!
//! Caps durable persistence of raw samples to one per channel per interval.
//! Display updates are never throttled.

use careband_core::{Channel, Config};

use crate::state::ChannelState;

/// Per-channel persistence throttle.
#[derive(Debug, Clone, Copy)]
pub struct SaveRateLimiter {
    interval_ms: u64,
}

impl SaveRateLimiter {
    /// Limiter allowing one save per `interval_ms`.
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms }
    }

    /// Limiter from `[persistence]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.persistence.save_interval_ms)
    }

    /// Whether a sample on `channel` at `now_ms` may be persisted.
    ///
    /// Device-error samples are never persisted.
    pub fn should_save(&self, channel: Channel, now_ms: u64, last_saved_at_ms: Option<u64>) -> bool {
        if channel == Channel::DeviceError {
            return false;
        }
        match last_saved_at_ms {
            None => true,
            Some(last) => now_ms >= last && now_ms - last >= self.interval_ms,
        }
    }

    /// Check and, on success, record the save in `state`.
    pub fn admit(&self, channel: Channel, now_ms: u64, state: &mut ChannelState) -> bool {
        let save = self.should_save(channel, now_ms, state.last_saved_at_ms);
        if save {
            state.last_saved_at_ms = Some(now_ms);
        }
        save
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_saves() {
        let limiter = SaveRateLimiter::new(60_000);
        assert!(limiter.should_save(Channel::HeartRate, 0, None));
    }

    #[test]
    fn test_at_most_one_save_per_interval() {
        let limiter = SaveRateLimiter::new(60_000);
        let mut state = ChannelState::default();

        let saved: Vec<u64> = (0..=180)
            .map(|s| s * 1_000)
            .filter(|&t| limiter.admit(Channel::SpO2, t, &mut state))
            .collect();

        assert_eq!(saved, vec![0, 60_000, 120_000, 180_000]);
    }

    #[test]
    fn test_device_error_never_saved() {
        let limiter = SaveRateLimiter::new(60_000);
        let mut state = ChannelState::default();
        assert!(!limiter.admit(Channel::DeviceError, 0, &mut state));
        assert!(state.last_saved_at_ms.is_none());
    }

    #[test]
    fn test_clock_going_backwards_does_not_save() {
        let limiter = SaveRateLimiter::new(60_000);
        assert!(!limiter.should_save(Channel::Temperature, 1_000, Some(100_000)));
    }
}
