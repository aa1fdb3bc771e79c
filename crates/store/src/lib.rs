//! CareBand Store
//!
//! Boundary to the remote document store. Records are JSON documents grouped
//! in named collections and addressed by string id.
//!
//! Two backends are provided: [`MemoryStore`] for tests and replays, and
//! `SqliteStore` (feature `sqlite`, on by default) for a durable local copy.

#![warn(missing_docs)]

pub mod document;
pub mod error;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
mod watchers;

pub use document::{Order, Query, StoredDocument};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::DocumentStore;

/// Collection holding alert records.
pub const ALERTS_COLLECTION: &str = "alerts";

/// Collection holding raw vital-sign records.
pub const VITALS_COLLECTION: &str = "vital_signs";
