//! Raw sample persistence.

use careband_alerts::{millis_to_datetime, with_retry, PersistenceError, RetryPolicy};
use careband_core::{Channel, Sample};
use careband_store::{DocumentStore, Order, Query, StoreError, VITALS_COLLECTION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Document written to `vital_signs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalRecord {
    /// Subject user
    pub user_id: String,
    /// Source channel
    pub channel: Channel,
    /// Numeric value, absent for falls
    pub value: Option<f64>,
    /// Set for fall events
    pub fall_detected: bool,
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Millisecond epoch of `timestamp` as a string
    pub timestamp_key: String,
}

impl VitalRecord {
    /// Record for one sample.
    pub fn from_sample(user_id: impl Into<String>, sample: &Sample) -> Self {
        Self {
            user_id: user_id.into(),
            channel: sample.channel,
            value: sample.value,
            fall_detected: sample.channel == Channel::Fall,
            timestamp: millis_to_datetime(sample.observed_at_ms),
            timestamp_key: sample.observed_at_ms.to_string(),
        }
    }

    /// `timestamp_key` as a number.
    pub fn key_ms(&self) -> Option<u64> {
        self.timestamp_key.parse().ok()
    }
}

/// Stored vital records for `user_id` taken between `from_ms` and `to_ms`
/// inclusive, oldest first.
pub async fn vitals_in_range(
    store: &dyn DocumentStore,
    user_id: &str,
    from_ms: u64,
    to_ms: u64,
) -> Result<Vec<VitalRecord>, StoreError> {
    let query = Query::collection(VITALS_COLLECTION)
        .where_eq("userId", user_id)
        .order_by("timestampKey", Order::Ascending);
    let docs = store.query(&query).await?;

    Ok(docs
        .iter()
        .filter_map(|doc| match doc.decode::<VitalRecord>() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(id = %doc.id, error = %err, "Skipping undecodable vital record");
                None
            }
        })
        .filter(|record| {
            record
                .key_ms()
                .is_some_and(|ms| (from_ms..=to_ms).contains(&ms))
        })
        .collect())
}

/// Spawns one append per admitted sample.
#[derive(Clone)]
pub struct VitalsRecorder {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    user_id: String,
}

impl VitalsRecorder {
    /// Create a recorder for `user_id`.
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy, user_id: impl Into<String>) -> Self {
        Self {
            store,
            retry,
            user_id: user_id.into(),
        }
    }

    /// Persist `sample` in the background.
    pub fn record(&self, sample: &Sample) -> JoinHandle<Result<(), PersistenceError>> {
        let record = VitalRecord::from_sample(&self.user_id, sample);
        let store = Arc::clone(&self.store);
        let retry = self.retry.clone();
        tokio::spawn(async move { append_record(store, retry, record).await })
    }
}

async fn append_record(
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    record: VitalRecord,
) -> Result<(), PersistenceError> {
    let body = serde_json::to_value(&record)?;
    let result = with_retry(&retry, "persist_vital", StoreError::is_transient, || {
        store.append(VITALS_COLLECTION, body.clone())
    })
    .await;

    match result {
        Ok(id) => {
            debug!(channel = %record.channel, id = %id, "Vital record persisted");
            Ok(())
        }
        Err(source) => {
            warn!(channel = %record.channel, error = %source, "Vital record not persisted");
            Err(PersistenceError::Store {
                collection: VITALS_COLLECTION.to_string(),
                id: String::new(),
                source,
            })
        }
    }
}
