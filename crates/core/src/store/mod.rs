//! Revisioned document persistence: the external store contract, the
//! SQLite-backed implementation, the write serializer, and the typed
//! adapter the engine talks to.

pub mod adapter;
pub mod serializer;
pub mod sqlite;

use std::sync::mpsc::Receiver;

use serde_json::Value;

use crate::error::StoreError;

pub use adapter::StoreAdapter;
pub use serializer::WriteSerializer;
pub use sqlite::SqliteStore;

/// A stored document with its current revision token.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub rev: u64,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Put,
    Delete,
}

/// One entry in the store's change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub seq: u64,
    pub id: String,
    pub kind: ChangeKind,
    /// Document body at the time of the change; absent for deletions.
    pub body: Option<Value>,
}

/// Contract of the underlying per-document, revision-tracked store.
///
/// A write must carry the revision last seen for the document; a stale
/// revision is rejected as [`StoreError::Conflict`]. `rev = None` on `put`
/// means "create": it conflicts if the document already exists.
pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Document, StoreError>;

    fn put(&self, id: &str, rev: Option<u64>, body: &Value) -> Result<u64, StoreError>;

    fn delete(&self, id: &str, rev: u64) -> Result<(), StoreError>;

    fn enumerate(&self, prefix: &str) -> Result<Vec<Document>, StoreError>;

    /// Replay of all changes after `since`, in sequence order.
    fn changes(&self, since: u64) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Live feed of changes made through any handle to the same store.
    fn subscribe(&self) -> Receiver<ChangeEvent>;

    /// Cheap readiness probe used by the startup polling loop.
    fn ping(&self) -> bool;
}
