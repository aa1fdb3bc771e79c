//! The persisted alert record.

use careband_core::AlertKind;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert document stored in the `alerts` collection under
/// `{userId}:{timestampKey}`.
///
/// `response_received` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Random identifier used for deep links
    pub alert_id: String,
    /// Subject user the alert concerns
    pub user_id: String,
    /// Alert type tag (`fall`, `hr_high`, ...)
    pub alert_type: String,
    /// Caregiver marked this as a false alarm
    #[serde(default)]
    pub is_false_alarm: bool,
    /// Who was notified
    pub notified_to: String,
    /// Caregiver acknowledged the alert
    #[serde(default)]
    pub response_received: bool,
    /// When the alert fired
    pub timestamp: DateTime<Utc>,
    /// Millisecond epoch of `timestamp` as a string
    pub timestamp_key: String,
}

impl Alert {
    /// New unresolved alert keyed at `key_ms`.
    pub fn new(
        kind: AlertKind,
        user_id: impl Into<String>,
        notified_to: impl Into<String>,
        key_ms: u64,
    ) -> Self {
        Self::with_type(kind.tag(), user_id, notified_to, key_ms)
    }

    /// New unresolved alert with a raw type tag.
    pub fn with_type(
        alert_type: impl Into<String>,
        user_id: impl Into<String>,
        notified_to: impl Into<String>,
        key_ms: u64,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            alert_type: alert_type.into(),
            is_false_alarm: false,
            notified_to: notified_to.into(),
            response_received: false,
            timestamp: millis_to_datetime(key_ms),
            timestamp_key: key_ms.to_string(),
        }
    }

    /// Parsed alert kind, `None` for tags this build does not know.
    pub fn kind(&self) -> Option<AlertKind> {
        AlertKind::from_tag(&self.alert_type)
    }

    /// `timestamp_key` as a number.
    pub fn key_ms(&self) -> Option<u64> {
        self.timestamp_key.parse().ok()
    }

    /// Mark as acknowledged.
    pub fn resolved(mut self) -> Self {
        self.response_received = true;
        self
    }

    /// Store id of this record.
    pub fn document_id(&self) -> String {
        alert_document_id(&self.user_id, &self.timestamp_key)
    }

    /// Same alert moved to `key_ms`.
    pub fn rekeyed(mut self, key_ms: u64) -> Self {
        self.timestamp = millis_to_datetime(key_ms);
        self.timestamp_key = key_ms.to_string();
        self
    }
}

/// Alert keys are only unique per user, so the user is part of the id.
pub fn alert_document_id(user_id: &str, timestamp_key: &str) -> String {
    format!("{user_id}:{timestamp_key}")
}

/// UTC instant for a millisecond epoch; the epoch itself if out of range.
pub fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default()
}
