//! Alert dispatcher.
//!
//! For each fired decision the dispatcher builds one [`Alert`], registers it
//! with the acknowledgment loop, and spawns two independent tasks: one
//! writes the record, the other notifies the caregiver. A failure in one
//! never blocks the other, and neither blocks the sample stream.

use careband_store::{DocumentStore, StoreError, ALERTS_COLLECTION};
use careband_vitals::AlertDecision;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ack::AckMessage;
use crate::notify::{Notification, Notifier, NotifyError};
use crate::record::Alert;
use crate::repository::{write_alert, Written};
use crate::retry::{with_retry, RetryPolicy};

/// Fingerprints remembered for deduplication.
const DEDUP_WINDOW: usize = 256;

/// A record could not be written after retries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Store rejected or failed the write
    #[error("Failed to persist {collection}/{id}: {source}")]
    Store {
        /// Target collection
        collection: String,
        /// Document id, empty for appends
        id: String,
        /// Last store error
        #[source]
        source: StoreError,
    },

    /// Record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Spawned work for one dispatched alert.
#[derive(Debug)]
pub struct DispatchHandle {
    /// The alert as constructed
    pub alert: Alert,
    /// Record write; yields the alert as stored, which may carry a later key
    pub persistence: JoinHandle<Result<Alert, PersistenceError>>,
    /// Caregiver notification
    pub notification: JoinHandle<Result<(), NotifyError>>,
}

/// Turns fired decisions into alerts for one subject user.
pub struct AlertDispatcher {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    user_id: String,
    notified_to: String,
    ack: Option<mpsc::Sender<AckMessage>>,
    recent: VecDeque<String>,
    last_key_ms: Option<u64>,
}

impl AlertDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        user_id: impl Into<String>,
        notified_to: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
            user_id: user_id.into(),
            notified_to: notified_to.into(),
            ack: None,
            recent: VecDeque::with_capacity(DEDUP_WINDOW),
            last_key_ms: None,
        }
    }

    /// Register every dispatched alert with an acknowledgment loop.
    pub fn with_ack_channel(mut self, ack: mpsc::Sender<AckMessage>) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Subject user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Dispatch one decision. Returns `None` for a duplicate.
    ///
    /// Never waits: registration with the acknowledgment loop is skipped when
    /// its queue is full, and the store and notifier run on spawned tasks.
    pub fn dispatch(&mut self, decision: &AlertDecision) -> Option<DispatchHandle> {
        let tag = decision.kind.tag();
        let fingerprint = fingerprint(&self.user_id, tag, decision.fired_at_ms);
        if self.recent.contains(&fingerprint) {
            debug!(alert_type = tag, fingerprint = %fingerprint, "Duplicate alert dropped");
            return None;
        }
        if self.recent.len() == DEDUP_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(fingerprint);

        let key_ms = self.reserve_key(decision.fired_at_ms);
        let alert = Alert::new(decision.kind, &self.user_id, &self.notified_to, key_ms);
        info!(
            alert_id = %alert.alert_id,
            alert_type = tag,
            timestamp_key = %alert.timestamp_key,
            value = ?decision.value,
            "Dispatching alert"
        );

        if let Some(ack) = &self.ack {
            // An unregistered alert is still found through the store.
            match ack.try_send(AckMessage::Pending(alert.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(alert_id = %alert.alert_id, "Acknowledgment queue full, alert not registered")
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(alert_id = %alert.alert_id, "Acknowledgment loop gone, alert not registered")
                }
            }
        }

        let persistence = tokio::spawn(persist_alert(
            Arc::clone(&self.store),
            self.retry.clone(),
            alert.clone(),
        ));
        let notification = tokio::spawn(send_notification(
            Arc::clone(&self.notifier),
            self.retry.clone(),
            Notification::for_alert(&alert),
        ));

        Some(DispatchHandle {
            alert,
            persistence,
            notification,
        })
    }

    /// Strictly increasing key: a millisecond already used is bumped by one.
    fn reserve_key(&mut self, fired_at_ms: u64) -> u64 {
        let key = match self.last_key_ms {
            Some(last) if fired_at_ms <= last => last + 1,
            _ => fired_at_ms,
        };
        self.last_key_ms = Some(key);
        key
    }
}

/// BLAKE3 over user, alert type and firing time.
fn fingerprint(user_id: &str, alert_type: &str, fired_at_ms: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(user_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(alert_type.as_bytes());
    hasher.update(&[0]);
    hasher.update(&fired_at_ms.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Write the alert once; see [`write_alert`] for key collisions.
async fn persist_alert(
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    alert: Alert,
) -> Result<Alert, PersistenceError> {
    match write_alert(store.as_ref(), &retry, alert.clone()).await {
        Ok((stored, Written::Created)) => {
            debug!(id = %stored.document_id(), "Alert persisted");
            Ok(stored)
        }
        Ok((stored, Written::Existing)) => {
            debug!(id = %stored.document_id(), "Alert already stored by acknowledgment");
            Ok(stored)
        }
        Err(StoreError::Serialization(err)) => Err(PersistenceError::Serialization(err)),
        Err(source) => {
            warn!(
                alert_id = %alert.alert_id,
                timestamp_key = %alert.timestamp_key,
                error = %source,
                "Alert persistence failed"
            );
            Err(PersistenceError::Store {
                collection: ALERTS_COLLECTION.to_string(),
                id: alert.document_id(),
                source,
            })
        }
    }
}

async fn send_notification(
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    notification: Notification,
) -> Result<(), NotifyError> {
    let result = with_retry(&retry, "notify_caregiver", NotifyError::is_transient, || {
        notifier.notify(&notification)
    })
    .await;

    match &result {
        Ok(()) => debug!(alert_id = %notification.alert_id, "Caregiver notified"),
        Err(err) => warn!(
            alert_id = %notification.alert_id,
            error = %err,
            "Caregiver notification failed"
        ),
    }
    result
}
