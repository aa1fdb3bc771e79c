//! In-process document store.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::{Query, StoredDocument};
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::watchers::WatchRegistry;

/// Store held entirely in memory. Documents keep insertion order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
    watchers: WatchRegistry,
    failing_writes: AtomicU32,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn check_injected_failure(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!("Injected store write failure");
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn notify(&self, collection: &str, documents: &[StoredDocument]) {
        for query in self.watchers.queries_for(collection) {
            let results = query.apply(documents);
            self.watchers.publish(&query, results);
        }
    }
}

fn ensure_object(data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidDocument("body must be a JSON object".into()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn append(&self, collection: &str, data: Value) -> Result<String> {
        ensure_object(&data)?;
        self.check_injected_failure()?;

        let id = Uuid::new_v4().to_string();
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        documents.push(StoredDocument {
            id: id.clone(),
            data,
        });
        debug!(collection, id = %id, "Document appended");
        self.notify(collection, documents);
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        ensure_object(&data)?;
        self.check_injected_failure()?;

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|d| d.id == id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        documents.push(StoredDocument {
            id: id.to_string(),
            data,
        });
        debug!(collection, id, "Document created");
        self.notify(collection, documents);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.check_injected_failure()?;

        let mut collections = self.collections.write().await;
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let documents = collections.get_mut(collection).ok_or_else(not_found)?;
        let document = documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(not_found)?;

        if let Value::Object(body) = &mut document.data {
            body.extend(fields);
        }
        debug!(collection, id, "Document updated");
        self.notify(collection, documents);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&query.collection)
            .map(|docs| query.apply(docs))
            .unwrap_or_default())
    }

    async fn watch(&self, query: Query) -> Result<watch::Receiver<Vec<StoredDocument>>> {
        let initial = self.query(&query).await?;
        Ok(self.watchers.register(query, initial))
    }
}
