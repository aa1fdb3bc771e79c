//! CareBand Monitor
//!
//! One [`Monitor`] task per wearable session. It owns the transport session,
//! the vitals processor and the alert dispatcher, consumes link events ahead
//! of control commands, and publishes state through `watch` channels for
//! readers on other tasks.

#![warn(missing_docs)]

pub mod error;
pub mod latest;
pub mod monitor;
pub mod recorder;
pub mod status;

pub use error::MonitorError;
pub use latest::LatestVitals;
pub use monitor::{Monitor, MonitorCommand, MonitorHandle};
pub use recorder::{vitals_in_range, VitalRecord, VitalsRecorder};
pub use status::{LinkStatus, SessionStatus};
