//! CareBand Link
//!
//! Owns the single wireless connection to the wearable.
//!
//! This crate provides:
//! - The transport boundary (`Transport` / `Link` traits, link events)
//! - `TransportSession`: scan/connect/disconnect lifecycle with link generations
//! - `SubscriptionSequencer`: one-at-a-time notification enable handshake
//! - `ScriptedTransport`: an in-process transport driven by tests and replays

#![warn(missing_docs)]

pub mod error;
pub mod scripted;
pub mod session;
pub mod subscription;
pub mod transport;

pub use error::{SessionError, TransportError};
pub use scripted::ScriptedTransport;
pub use session::{SessionSignal, SessionState, TransportSession};
pub use subscription::{SequencerStep, SubscriptionReport, SubscriptionRequest, SubscriptionSequencer};
pub use transport::{EventSink, Link, LinkEvent, PeerHandle, SessionEvent, Transport};
