//! CareBand Alerts
//!
//! Turns fired threshold decisions into persisted alert records and
//! caregiver notifications, and closes the loop when the caregiver responds.
//!
//! - [`AlertDispatcher`]: dedup, record construction, spawned persistence and
//!   notification with bounded retry
//! - [`AcknowledgmentLoop`]: single consumer that marks alerts resolved
//! - [`RetryPolicy`]: exponential backoff shared by both
//! - [`alert_history`] / [`watch_alerts`]: per-user alert list, newest first

#![warn(missing_docs)]

pub mod ack;
pub mod dispatcher;
pub mod notify;
pub mod record;
pub mod repository;
pub mod retry;

pub use ack::{
    relay_prompts, AckMessage, AckOutcome, AckPrompt, AckRegistry, AckResponse, AckSurface,
    AcknowledgmentLoop, REGISTRY_CAPACITY, REGISTRY_RETENTION_MS,
};
pub use dispatcher::{AlertDispatcher, DispatchHandle, PersistenceError};
pub use notify::{ChannelNotifier, Notification, Notifier, NotifyError};
pub use record::{alert_document_id, millis_to_datetime, Alert};
pub use repository::{alert_history, watch_alerts, write_alert, Written};
pub use retry::{with_retry, RetryPolicy};
