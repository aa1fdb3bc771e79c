//! Live-query registry shared by the backends.

use std::sync::Mutex;
use tokio::sync::watch;

use crate::document::{Query, StoredDocument};

struct Watcher {
    query: Query,
    tx: watch::Sender<Vec<StoredDocument>>,
}

/// Registered live queries. Closed receivers are pruned on the next write.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    watchers: Mutex<Vec<Watcher>>,
}

impl WatchRegistry {
    pub(crate) fn register(
        &self,
        query: Query,
        initial: Vec<StoredDocument>,
    ) -> watch::Receiver<Vec<StoredDocument>> {
        let (tx, rx) = watch::channel(initial);
        self.lock().push(Watcher { query, tx });
        rx
    }

    /// Queries currently watching `collection`.
    pub(crate) fn queries_for(&self, collection: &str) -> Vec<Query> {
        let mut watchers = self.lock();
        watchers.retain(|w| !w.tx.is_closed());
        watchers
            .iter()
            .filter(|w| w.query.collection == collection)
            .map(|w| w.query.clone())
            .collect()
    }

    /// Publish fresh results for every watcher of `query`.
    pub(crate) fn publish(&self, query: &Query, results: Vec<StoredDocument>) {
        for watcher in self.lock().iter().filter(|w| &w.query == query) {
            watcher.tx.send_replace(results.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Watcher>> {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
