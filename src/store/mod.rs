//! Document store abstraction.
//!
//! The store is an opaque document-oriented data service. Collections hold
//! documents (an id plus a JSON field map). A collection can live at the top
//! level (`tasks`) or under a parent document (`tasks/<id>/descriptions`).
//!
//! Backends:
//! - [`memory::MemoryStore`] - in-process, with held delivery and failure
//!   injection for tests
//! - [`sqlite::SqliteStore`] - durable local backend on SQLite

pub mod hub;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

pub use hub::SubscriptionHub;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] refinery::Error),
}

/// Address of a collection, either top-level or nested under a parent document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Top-level collection, e.g. `tasks`.
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Sub-collection addressed as `(collection, parent_id, name)`.
    pub fn child(collection: &str, parent_id: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", collection, parent_id, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Deserialize the field map into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// Serialize a record into a document field map.
pub fn encode<T: Serialize>(record: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = Fields::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// Equality filter over top-level document fields. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose `field` equals `value`.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| fields.get(field) == Some(value))
    }
}

/// Full point-in-time result set of a subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One delivery on a subscription stream.
pub type SnapshotEvent = Result<Snapshot, StoreError>;

/// Live subscription handle. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    hub: std::sync::Arc<SubscriptionHub>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        rx: mpsc::UnboundedReceiver<SnapshotEvent>,
        hub: std::sync::Arc<SubscriptionHub>,
    ) -> Self {
        Self { id, rx, hub }
    }

    /// Wait for the next snapshot or error. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

/// Remote store collaborator consumed by the sync layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Subscribe to a collection. The current matching set is delivered
    /// immediately, then again after every change to the collection.
    async fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Filter,
    ) -> Result<Subscription, StoreError>;

    /// One-shot query, in store order.
    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Create a document and return its generated id.
    async fn create(&self, collection: &CollectionPath, fields: Fields)
    -> Result<String, StoreError>;

    /// Merge `patch` into an existing document.
    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), StoreError>;
}
