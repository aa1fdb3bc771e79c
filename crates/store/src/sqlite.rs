//! SQLite-backed document store.
//!
//! All documents live in one table keyed by `(collection, id)`. Bodies are
//! stored as JSON text; filtering and ordering reuse [`Query::apply`] over
//! the collection in insertion order.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{Query, StoredDocument};
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::watchers::WatchRegistry;

/// Durable store on a single SQLite file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    watchers: WatchRegistry,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening document store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: WatchRegistry::default(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            "#,
        )?;
        Ok(())
    }

    /// Run blocking database work off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".into()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("store task failed: {err}")))?
    }

    /// Refresh live queries after a committed write. A failed refresh leaves
    /// that watcher on its previous results; the write itself stands.
    async fn notify(&self, collection: &str) {
        for query in self.watchers.queries_for(collection) {
            match self.query(&query).await {
                Ok(results) => self.watchers.publish(&query, results),
                Err(err) => warn!(collection, error = %err, "Live query refresh failed"),
            }
        }
    }
}

fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<StoredDocument>> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY seq ASC")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, data) = row?;
        documents.push(StoredDocument {
            id,
            data: serde_json::from_str(&data)?,
        });
    }
    Ok(documents)
}

fn insert(conn: &Connection, collection: &str, id: &str, data: &Value) -> Result<()> {
    let body = serde_json::to_string(data)?;
    match conn.execute(
        "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
        params![collection, id, body],
    ) {
        Ok(_) => Ok(()),
        Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            })
        }
        Err(err) => Err(err.into()),
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
impl DocumentStore for SqliteStore {
    async fn append(&self, collection: &str, data: Value) -> Result<String> {
        ensure_object(&data)?;
        let id = Uuid::new_v4().to_string();
        let (c, i) = (collection.to_string(), id.clone());
        self.with_conn(move |conn| insert(conn, &c, &i, &data)).await?;
        debug!(collection, id = %id, "Document appended");
        self.notify(collection).await;
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        ensure_object(&data)?;
        let (c, i) = (collection.to_string(), id.to_string());
        self.with_conn(move |conn| insert(conn, &c, &i, &data)).await?;
        debug!(collection, id, "Document created");
        self.notify(collection).await;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        let (c, i) = (collection.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![c, i],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|data| {
                Ok(StoredDocument {
                    id: i,
                    data: serde_json::from_str(&data)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let (c, i) = (collection.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let data: Option<String> = tx
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![c, i],
                    |row| row.get(0),
                )
                .optional()?;
            let data = data.ok_or_else(|| StoreError::NotFound {
                collection: c.clone(),
                id: i.clone(),
            })?;

            let mut body: Value = serde_json::from_str(&data)?;
            if let Value::Object(map) = &mut body {
                map.extend(fields);
            }
            tx.execute(
                "UPDATE documents SET data = ?1 WHERE collection = ?2 AND id = ?3",
                params![serde_json::to_string(&body)?, c, i],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!(collection, id, "Document updated");
        self.notify(collection).await;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>> {
        let q = query.clone();
        self.with_conn(move |conn| {
            let documents = load_collection(conn, &q.collection)?;
            Ok(q.apply(&documents))
        })
        .await
    }

    async fn watch(&self, query: Query) -> Result<watch::Receiver<Vec<StoredDocument>>> {
        let initial = self.query(&query).await?;
        Ok(self.watchers.register(query, initial))
    }
}
