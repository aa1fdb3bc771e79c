//! CareBand Vitals
//!
//! Turns raw notification payloads into typed samples and decides what to do
//! with each one: display it, persist it, or raise an alert.
//!
//! Everything here is synchronous and single-threaded. The monitor owns one
//! [`VitalsProcessor`] per session and feeds it samples in arrival order.

#![warn(missing_docs)]

pub mod parser;
pub mod processor;
pub mod rate_limit;
pub mod state;
pub mod threshold;

pub use parser::{parse_token, ParseStats, Reading, TokenError};
pub use processor::{Ingested, Outcome, VitalsProcessor};
pub use rate_limit::SaveRateLimiter;
pub use state::{ChannelState, ChannelStates};
pub use threshold::{AlertDecision, Classification, Evaluation, ThresholdEngine};
