//! Error types for the transport session.

use careband_core::Channel;
use thiserror::Error;

/// Errors reported by the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No wireless adapter present on the host
    #[error("Transport unavailable: no wireless adapter present")]
    Unavailable,

    /// Caller lacks the scan/connect capability grants
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Peer is not known to the adapter
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Operation needs a live link
    #[error("Link not connected")]
    NotConnected,

    /// Enabling notifications on a channel failed
    #[error("Descriptor write failed for {channel}: {reason}")]
    DescriptorWrite {
        /// Channel whose descriptor write failed
        channel: Channel,
        /// Transport-supplied reason
        reason: String,
    },

    /// Any other link-level failure
    #[error("Link error: {0}")]
    Link(String),
}

impl TransportError {
    /// User-facing remediation hint, if the failure has one.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            TransportError::Unavailable => Some("Enable Bluetooth on this device"),
            TransportError::PermissionDenied(_) => {
                Some("Grant the nearby-devices scan and connect permissions")
            }
            _ => None,
        }
    }

    /// Whether the session can continue after this error.
    ///
    /// Adapter and permission failures end the session and are never retried
    /// automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable | TransportError::PermissionDenied(_)
        )
    }
}

/// Errors reported by [`crate::TransportSession`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transport boundary failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A link is already open
    #[error("Session already connected to {0}")]
    AlreadyConnected(String),

    /// No link is open
    #[error("Session not connected")]
    NotConnected,

    /// One or more channels could not be subscribed; the session runs degraded
    #[error("Partial subscription: {} channel(s) failed", failed.len())]
    PartialSubscription {
        /// Channels that produce no samples this session
        failed: Vec<Channel>,
    },
}
