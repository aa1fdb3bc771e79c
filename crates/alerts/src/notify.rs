//! Caregiver notification boundary.

use async_trait::async_trait;
use careband_core::AlertKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::record::Alert;

/// Payload delivered to the caregiver's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
    /// Alert type tag
    pub alert_type: String,
    /// Subject user
    pub subject_user_id: String,
    /// Alert the notification deep-links to
    pub alert_id: String,
}

impl Notification {
    /// Notification for a stored alert.
    pub fn for_alert(alert: &Alert) -> Self {
        let (title, body) = match alert.kind() {
            Some(kind) => (kind.title().to_string(), kind.description().to_string()),
            None => (
                "CareBand alert".to_string(),
                format!("Alert {} raised.", alert.alert_type),
            ),
        };
        Self {
            title,
            body,
            alert_type: alert.alert_type.clone(),
            subject_user_id: alert.user_id.clone(),
            alert_id: alert.alert_id.clone(),
        }
    }

    /// Parsed alert kind.
    pub fn kind(&self) -> Option<AlertKind> {
        AlertKind::from_tag(&self.alert_type)
    }
}

/// Notification delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Delivery service unreachable
    #[error("Notification service unavailable: {0}")]
    Unavailable(String),

    /// Delivery service refused the message
    #[error("Notification rejected: {0}")]
    Rejected(String),

    /// Receiving side has shut down
    #[error("Notification channel closed")]
    Closed,
}

impl NotifyError {
    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Unavailable(_))
    }
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that forwards into an in-process channel, typically consumed by
/// [`crate::relay_prompts`].
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.tx
            .send(notification.clone())
            .await
            .map_err(|_| NotifyError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_for_alert() {
        let alert = Alert::new(AlertKind::Fall, "user-1", "caregiver", 1_000);
        let n = Notification::for_alert(&alert);

        assert_eq!(n.title, "Fall detected");
        assert_eq!(n.alert_type, "fall");
        assert_eq!(n.subject_user_id, "user-1");
        assert_eq!(n.alert_id, alert.alert_id);

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["subjectUserId"], "user-1");
    }

    #[tokio::test]
    async fn test_channel_notifier_closed() {
        let (notifier, rx) = ChannelNotifier::new(1);
        drop(rx);
        let alert = Alert::new(AlertKind::Fall, "u", "c", 1);
        assert_eq!(
            notifier.notify(&Notification::for_alert(&alert)).await,
            Err(NotifyError::Closed)
        );
    }
}
