//! Per-channel mutable state.

use careband_core::Channel;
use std::collections::HashMap;

/// Timers for one channel within one session.
///
/// `condition_started_at_ms` and `last_alert_sent_at_ms` belong to the
/// threshold engine; `last_saved_at_ms` belongs to the save-rate limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    /// Last persisted sample
    pub last_saved_at_ms: Option<u64>,
    /// Start of the current out-of-range run; `Some` iff the channel is pending
    pub condition_started_at_ms: Option<u64>,
    /// Last fired alert
    pub last_alert_sent_at_ms: Option<u64>,
}

impl ChannelState {
    /// Whether a sustained abnormal condition is being timed.
    pub fn is_pending(&self) -> bool {
        self.condition_started_at_ms.is_some()
    }
}

/// Keyed map `channel -> ChannelState`.
#[derive(Debug, Clone, Default)]
pub struct ChannelStates {
    states: HashMap<Channel, ChannelState>,
}

impl ChannelStates {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `channel`, created on first use.
    pub fn entry(&mut self, channel: Channel) -> &mut ChannelState {
        self.states.entry(channel).or_default()
    }

    /// State for `channel`, if it has seen a sample this session.
    pub fn get(&self, channel: Channel) -> Option<&ChannelState> {
        self.states.get(&channel)
    }

    /// Drop every channel's state.
    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// Channels with state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no channel has state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_independent() {
        let mut states = ChannelStates::new();
        states.entry(Channel::HeartRate).condition_started_at_ms = Some(5);

        assert!(states.get(Channel::HeartRate).unwrap().is_pending());
        assert!(!states.entry(Channel::SpO2).is_pending());
        assert_eq!(states.len(), 2);

        states.reset();
        assert!(states.is_empty());
    }
}
