//! Session status published to readers.

use careband_core::Channel;
use careband_vitals::ParseStats;
use serde::{Deserialize, Serialize};

/// Link lifecycle as seen from outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// No link
    #[default]
    Idle,
    /// Scanning for peers
    Scanning,
    /// Link open, handshake running
    Connected {
        /// Peer address
        peer_id: String,
    },
    /// Samples flowing
    Ready {
        /// Peer address
        peer_id: String,
    },
}

/// Observable session status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Link state
    pub link: LinkStatus,
    /// Channels that failed to subscribe this session
    pub degraded: Vec<Channel>,
    /// Last error surfaced to the user
    pub last_error: Option<String>,
    /// What the user can do about `last_error`
    pub remediation: Option<String>,
    /// Token counters
    pub parse_stats: ParseStats,
    /// Alerts dispatched since start
    pub alerts_raised: u64,
    /// Vital records queued for persistence since start
    pub samples_persisted: u64,
}

impl SessionStatus {
    /// Whether the session is running with missing channels.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
