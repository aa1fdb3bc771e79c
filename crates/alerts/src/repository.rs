//! Alert records in the document store.
//!
//! Both writers go through [`write_alert`]. A record is identified by its
//! `alertId`, not by its key: when the key is already taken by a different
//! alert, the write moves to the next free millisecond for that user. The
//! dispatcher and the acknowledgment loop bump through the same sequence, so
//! racing writes of one alert always meet on the same document.

use careband_store::{DocumentStore, Order, Query, StoredDocument, StoreError, ALERTS_COLLECTION};
use serde_json::{json, Map};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::record::Alert;
use crate::retry::{with_retry, RetryPolicy};

/// Occupied keys skipped before a write gives up.
const MAX_KEY_BUMPS: u32 = 64;

/// How [`write_alert`] settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    /// A new document was created
    Created,
    /// The alert was already stored; it was marked resolved if requested
    Existing,
}

/// Store `alert` and return it as stored.
///
/// The returned alert may carry a later key than the one passed in.
pub async fn write_alert(
    store: &dyn DocumentStore,
    retry: &RetryPolicy,
    mut alert: Alert,
) -> Result<(Alert, Written), StoreError> {
    let mut bumps = 0;
    loop {
        let id = alert.document_id();
        let body = serde_json::to_value(&alert)?;
        let created = with_retry(retry, "create_alert", StoreError::is_transient, || {
            store.create(ALERTS_COLLECTION, &id, body.clone())
        })
        .await;
        match created {
            Ok(()) => return Ok((alert, Written::Created)),
            Err(StoreError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err),
        }

        let existing = with_retry(retry, "read_alert", StoreError::is_transient, || {
            store.get(ALERTS_COLLECTION, &id)
        })
        .await?;
        let occupant = existing.and_then(|doc| doc.decode::<Alert>().ok());
        if let Some(stored) = occupant.filter(|a| a.alert_id == alert.alert_id) {
            if alert.response_received && !stored.response_received {
                mark_resolved(store, retry, &id).await?;
            }
            debug!(id = %id, "Alert already stored");
            let stored = if alert.response_received {
                stored.resolved()
            } else {
                stored
            };
            return Ok((stored, Written::Existing));
        }

        let next = match alert.key_ms() {
            Some(key) if bumps < MAX_KEY_BUMPS => key + 1,
            _ => {
                return Err(StoreError::AlreadyExists {
                    collection: ALERTS_COLLECTION.to_string(),
                    id,
                })
            }
        };
        bumps += 1;
        debug!(id = %id, next_key = next, "Alert key taken by another alert");
        alert = alert.rekeyed(next);
    }
}

async fn mark_resolved(
    store: &dyn DocumentStore,
    retry: &RetryPolicy,
    id: &str,
) -> Result<(), StoreError> {
    with_retry(retry, "mark_alert_resolved", StoreError::is_transient, || {
        let mut fields = Map::new();
        fields.insert("responseReceived".to_string(), json!(true));
        store.update(ALERTS_COLLECTION, id, fields)
    })
    .await
}

fn history_query(user_id: &str) -> Query {
    // Keys are same-width millisecond strings, so string order is time order.
    Query::collection(ALERTS_COLLECTION)
        .where_eq("userId", user_id)
        .order_by("timestampKey", Order::Descending)
}

fn decode_alerts(docs: &[StoredDocument]) -> Vec<Alert> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<Alert>() {
            Ok(alert) => Some(alert),
            Err(err) => {
                warn!(id = %doc.id, error = %err, "Skipping undecodable alert");
                None
            }
        })
        .collect()
}

/// Every stored alert for `user_id`, newest first.
pub async fn alert_history(store: &dyn DocumentStore, user_id: &str) -> Result<Vec<Alert>, StoreError> {
    let docs = store.query(&history_query(user_id)).await?;
    Ok(decode_alerts(&docs))
}

/// Live newest-first alert list for `user_id`.
///
/// The receiver starts with the current history and is refreshed after every
/// alert write. The forwarding task ends once the receiver is dropped.
pub async fn watch_alerts(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<watch::Receiver<Vec<Alert>>, StoreError> {
    let mut docs = store.watch(history_query(user_id)).await?;
    let initial = decode_alerts(&docs.borrow_and_update());
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = docs.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let alerts = decode_alerts(&docs.borrow_and_update());
                    tx.send_replace(alerts);
                }
                _ = tx.closed() => break,
            }
        }
    });
    Ok(rx)
}
