//! Error types for the monitor.

use careband_link::SessionError;
use thiserror::Error;

/// Errors returned through a [`crate::MonitorHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// Transport session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The monitor task has stopped
    #[error("Monitor stopped")]
    Stopped,
}
