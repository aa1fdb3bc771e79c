//! Acknowledgment loop.
//!
//! A single task owns the pending-acknowledgment registry and consumes one
//! channel with two producers: the dispatcher registers alerts as they are
//! raised, and the acknowledgment surface reports caregiver responses.
//!
//! A response resolves, in order of preference:
//! 1. the registered alert with the response's `alertId`;
//! 2. the newest unresolved alert of the same type for the same user;
//! 3. nothing, in which case a new resolved alert is written.
//!
//! Writes go through [`write_alert`], so racing the dispatcher's own write
//! still leaves exactly one resolved record, and a key held by some other
//! alert is never touched.

use async_trait::async_trait;
use careband_core::current_timestamp_ms;
use careband_store::{DocumentStore, Order, Query, StoreError, ALERTS_COLLECTION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::notify::Notification;
use crate::record::Alert;
use crate::repository::{write_alert, Written};
use crate::retry::RetryPolicy;

/// Registered alerts kept at most.
pub const REGISTRY_CAPACITY: usize = 256;

/// Registered alerts this much older than the newest one are dropped.
pub const REGISTRY_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// What the caregiver is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPrompt {
    /// Alert type tag
    pub alert_type: String,
    /// Message body
    pub message: String,
    /// Subject user
    pub subject_user_id: String,
    /// Alert being acknowledged, when known
    pub alert_id: Option<String>,
}

impl From<&Notification> for AckPrompt {
    fn from(notification: &Notification) -> Self {
        Self {
            alert_type: notification.alert_type.clone(),
            message: notification.body.clone(),
            subject_user_id: notification.subject_user_id.clone(),
            alert_id: Some(notification.alert_id.clone()),
        }
    }
}

/// Out-of-band surface that asks the caregiver to respond.
#[async_trait]
pub trait AckSurface: Send + Sync {
    /// Present the prompt; `true` if the caregiver acknowledged it.
    async fn present(&self, prompt: &AckPrompt) -> bool;
}

/// Caregiver response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    /// Alert id carried by the prompt, if the surface had one
    pub alert_id: Option<String>,
    /// Alert type tag
    pub alert_type: String,
    /// Subject user
    pub subject_user_id: String,
    /// `false` for a dismissed prompt
    pub acknowledged: bool,
    /// Response time (ms)
    pub responded_at_ms: u64,
}

/// Message consumed by the loop.
#[derive(Debug)]
pub enum AckMessage {
    /// An alert was raised
    Pending(Alert),
    /// The caregiver responded
    Response {
        /// The response
        response: AckResponse,
        /// Receives the outcome
        reply: Option<oneshot::Sender<AckOutcome>>,
    },
}

impl AckMessage {
    /// Response message with a reply channel.
    pub fn respond(response: AckResponse) -> (Self, oneshot::Receiver<AckOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            AckMessage::Response {
                response,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// What an acknowledgment did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckOutcome {
    /// Caregiver dismissed the prompt; nothing changed
    Declined,
    /// An existing alert was marked resolved
    UpdatedExisting {
        /// Key the resolved alert is stored under
        timestamp_key: String,
    },
    /// No alert matched; a resolved one was written
    CreatedNew {
        /// Key the new alert is stored under
        timestamp_key: String,
    },
    /// The store kept failing
    Failed {
        /// Last error
        reason: String,
    },
}

/// Alerts raised this session and not yet acknowledged, keyed by `alertId`.
///
/// Bounded by count and by age relative to the newest alert. An alert that
/// falls out is still found through the store.
#[derive(Debug)]
pub struct AckRegistry {
    pending: HashMap<String, Alert>,
    capacity: usize,
    retention_ms: u64,
}

impl Default for AckRegistry {
    fn default() -> Self {
        Self::with_limits(REGISTRY_CAPACITY, REGISTRY_RETENTION_MS)
    }
}

impl AckRegistry {
    /// Registry holding at most `capacity` alerts no older than
    /// `retention_ms` behind the newest.
    pub fn with_limits(capacity: usize, retention_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            capacity: capacity.max(1),
            retention_ms,
        }
    }

    /// Register an alert, evicting aged-out and then oldest entries.
    pub fn insert(&mut self, alert: Alert) {
        let before = self.pending.len();
        if let Some(newest) = alert.key_ms() {
            let cutoff = newest.saturating_sub(self.retention_ms);
            self.pending
                .retain(|_, a| a.key_ms().unwrap_or_default() >= cutoff);
        }
        while self.pending.len() >= self.capacity {
            let oldest = self
                .pending
                .values()
                .min_by_key(|a| a.key_ms().unwrap_or_default())
                .map(|a| a.alert_id.clone());
            match oldest {
                Some(id) => self.pending.remove(&id),
                None => break,
            };
        }
        let evicted = before - self.pending.len();
        if evicted > 0 {
            debug!(evicted, "Dropped stale alerts from acknowledgment registry");
        }
        self.pending.insert(alert.alert_id.clone(), alert);
    }

    /// Remove and return the alert with `alert_id`.
    pub fn take(&mut self, alert_id: &str) -> Option<Alert> {
        self.pending.remove(alert_id)
    }

    /// Newest registered alert of `alert_type` for `user_id`.
    pub fn newest_matching(&self, alert_type: &str, user_id: &str) -> Option<&Alert> {
        self.pending
            .values()
            .filter(|a| a.alert_type == alert_type && a.user_id == user_id)
            .max_by_key(|a| a.key_ms().unwrap_or_default())
    }

    /// Registered alerts.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Consumer of [`AckMessage`]s.
pub struct AcknowledgmentLoop {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    notified_to: String,
    registry: AckRegistry,
    rx: mpsc::Receiver<AckMessage>,
}

impl AcknowledgmentLoop {
    /// Create the loop and its sender.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        notified_to: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Sender<AckMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                store,
                retry,
                notified_to: notified_to.into(),
                registry: AckRegistry::default(),
                rx,
            },
            tx,
        )
    }

    /// Process messages until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.handle(message).await;
        }
        debug!(pending = self.registry.len(), "Acknowledgment loop stopped");
    }

    /// Pending registry.
    pub fn registry(&self) -> &AckRegistry {
        &self.registry
    }

    /// Apply one message. Returns the outcome for responses.
    pub async fn handle(&mut self, message: AckMessage) -> Option<AckOutcome> {
        match message {
            AckMessage::Pending(alert) => {
                debug!(alert_id = %alert.alert_id, alert_type = %alert.alert_type, "Alert awaiting acknowledgment");
                self.registry.insert(alert);
                None
            }
            AckMessage::Response { response, reply } => {
                let outcome = self.resolve(&response).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.clone());
                }
                Some(outcome)
            }
        }
    }

    async fn resolve(&mut self, response: &AckResponse) -> AckOutcome {
        if !response.acknowledged {
            info!(alert_type = %response.alert_type, "Caregiver dismissed alert");
            return AckOutcome::Declined;
        }

        let by_id = response
            .alert_id
            .as_deref()
            .and_then(|id| self.registry.take(id));
        let target = match by_id {
            Some(alert) => Some(alert),
            None => self.newest_unresolved(response).await,
        };

        let outcome = match target {
            Some(alert) => self.resolve_existing(alert).await,
            None => self.create_resolved(response).await,
        };
        info!(alert_type = %response.alert_type, outcome = ?outcome, "Acknowledgment applied");
        outcome
    }

    async fn newest_unresolved(&mut self, response: &AckResponse) -> Option<Alert> {
        let registered = self
            .registry
            .newest_matching(&response.alert_type, &response.subject_user_id)
            .cloned();

        // Keys are same-width millisecond strings, so string order is time order.
        let query = Query::collection(ALERTS_COLLECTION)
            .where_eq("userId", response.subject_user_id.as_str())
            .where_eq("alertType", response.alert_type.as_str())
            .where_eq("responseReceived", false)
            .order_by("timestampKey", Order::Descending)
            .limit(1);
        let stored = match self.store.query(&query).await {
            Ok(docs) => docs.into_iter().next().and_then(|doc| match doc.decode::<Alert>() {
                Ok(alert) => Some(alert),
                Err(err) => {
                    warn!(id = %doc.id, error = %err, "Skipping undecodable alert");
                    None
                }
            }),
            Err(err) => {
                warn!(error = %err, "Alert lookup failed");
                None
            }
        };

        let newest = match (registered, stored) {
            (Some(a), Some(b)) => Some(if b.key_ms() > a.key_ms() { b } else { a }),
            (a, b) => a.or(b),
        };
        if let Some(alert) = &newest {
            self.registry.take(&alert.alert_id);
        }
        newest
    }

    /// Resolve an alert that was raised, whether or not its record has
    /// landed yet.
    async fn resolve_existing(&self, alert: Alert) -> AckOutcome {
        match write_alert(self.store.as_ref(), &self.retry, alert.resolved()).await {
            Ok((stored, _)) => AckOutcome::UpdatedExisting {
                timestamp_key: stored.timestamp_key,
            },
            Err(err) => failed(err),
        }
    }

    async fn create_resolved(&self, response: &AckResponse) -> AckOutcome {
        let alert = Alert::with_type(
            response.alert_type.as_str(),
            response.subject_user_id.as_str(),
            self.notified_to.as_str(),
            response.responded_at_ms,
        )
        .resolved();

        match write_alert(self.store.as_ref(), &self.retry, alert).await {
            Ok((stored, Written::Created)) => AckOutcome::CreatedNew {
                timestamp_key: stored.timestamp_key,
            },
            Ok((stored, Written::Existing)) => AckOutcome::UpdatedExisting {
                timestamp_key: stored.timestamp_key,
            },
            Err(err) => failed(err),
        }
    }
}

fn failed(err: StoreError) -> AckOutcome {
    warn!(error = %err, "Acknowledgment could not be stored");
    AckOutcome::Failed {
        reason: err.to_string(),
    }
}

/// Present each notification on `surface` and forward the caregiver's
/// answer to the acknowledgment loop. Ends when either channel closes.
pub async fn relay_prompts(
    mut notifications: mpsc::Receiver<Notification>,
    surface: Arc<dyn AckSurface>,
    acks: mpsc::Sender<AckMessage>,
) {
    while let Some(notification) = notifications.recv().await {
        let prompt = AckPrompt::from(&notification);
        let acknowledged = surface.present(&prompt).await;
        let response = AckResponse {
            alert_id: prompt.alert_id,
            alert_type: notification.alert_type,
            subject_user_id: notification.subject_user_id,
            acknowledged,
            responded_at_ms: current_timestamp_ms(),
        };
        if acks
            .send(AckMessage::Response {
                response,
                reply: None,
            })
            .await
            .is_err()
        {
            break;
        }
    }
}
