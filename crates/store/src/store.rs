//! The document store trait.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::document::{Query, StoredDocument};
use crate::error::Result;

/// Remote document store boundary.
///
/// Bodies are JSON objects. Implementations must be safe to share across
/// tasks; the dispatcher and the acknowledgment loop write concurrently.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document under a generated id and return the id.
    async fn append(&self, collection: &str, data: Value) -> Result<String>;

    /// Insert a document under `id`, failing with `AlreadyExists` if present.
    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<()>;

    /// Read one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Merge top-level `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Run a query.
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>>;

    /// Live query: the receiver holds the current results and is updated
    /// after every write to the query's collection.
    async fn watch(&self, query: Query) -> Result<watch::Receiver<Vec<StoredDocument>>>;
}
