//! In-process document store.
//!
//! Keeps every collection as an insertion-ordered list of documents and fans
//! snapshots out through a [`SubscriptionHub`]. Besides serving as a
//! lightweight backend it can hold snapshot delivery and inject failures,
//! which the sync and import tests rely on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{
    CollectionPath, Document, DocumentStore, Fields, Filter, StoreError, Subscription,
    SubscriptionHub,
};

type CreatePredicate = Box<dyn Fn(&CollectionPath, &Fields) -> bool + Send + Sync>;

#[derive(Default)]
struct Faults {
    reject_writes: Option<String>,
    reject_queries: Option<String>,
    reject_subscribe: Option<String>,
    reject_create: Option<CreatePredicate>,
}

/// Document store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<CollectionPath, Vec<Document>>>,
    hub: Arc<SubscriptionHub>,
    faults: Mutex<Faults>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber registry, for holding and releasing snapshot delivery.
    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Queue snapshots instead of delivering them.
    pub fn hold_delivery(&self) {
        self.hub.hold();
    }

    /// Deliver queued snapshots and keep holding. Returns how many were sent.
    pub fn deliver_pending(&self) -> usize {
        self.hub.flush()
    }

    /// Deliver queued snapshots and resume immediate delivery.
    pub fn resume_delivery(&self) -> usize {
        self.hub.release()
    }

    /// Fail every create/update/delete with a permission error.
    pub fn reject_writes(&self, reason: Option<&str>) {
        lock(&self.faults).reject_writes = reason.map(str::to_string);
    }

    /// Fail every one-shot query.
    pub fn reject_queries(&self, reason: Option<&str>) {
        lock(&self.faults).reject_queries = reason.map(str::to_string);
    }

    /// Fail new subscriptions.
    pub fn reject_subscribe(&self, reason: Option<&str>) {
        lock(&self.faults).reject_subscribe = reason.map(str::to_string);
    }

    /// Fail creates for which `predicate` returns true.
    pub fn reject_creates_where<F>(&self, predicate: F)
    where
        F: Fn(&CollectionPath, &Fields) -> bool + Send + Sync + 'static,
    {
        lock(&self.faults).reject_create = Some(Box::new(predicate));
    }

    /// Push an error to every subscriber of `collection`.
    pub fn emit_error(&self, collection: &CollectionPath, message: &str) {
        self.hub.publish_error(collection, message);
    }

    /// Number of documents currently stored in `collection`.
    pub fn len(&self, collection: &CollectionPath) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    pub fn is_empty(&self, collection: &CollectionPath) -> bool {
        self.len(collection) == 0
    }

    fn check_write(&self) -> Result<(), StoreError> {
        match &lock(&self.faults).reject_writes {
            Some(reason) => Err(StoreError::PermissionDenied(reason.clone())),
            None => Ok(()),
        }
    }

    fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Called with the collections lock held; snapshots leave in write order.
    fn publish_locked(
        &self,
        collections: &HashMap<CollectionPath, Vec<Document>>,
        collection: &CollectionPath,
    ) {
        let docs = collections.get(collection).map_or(&[][..], Vec::as_slice);
        self.hub.publish(collection, docs);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Filter,
    ) -> Result<Subscription, StoreError> {
        if let Some(reason) = &lock(&self.faults).reject_subscribe {
            return Err(StoreError::PermissionDenied(reason.clone()));
        }
        let collections = lock(&self.collections);
        let docs = collections.get(collection).map_or(&[][..], Vec::as_slice);
        Ok(self.hub.subscribe(collection, filter, docs))
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        if let Some(reason) = &lock(&self.faults).reject_queries {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|doc| filter.matches(&doc.fields))
            .collect())
    }

    async fn create(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<String, StoreError> {
        self.check_write()?;
        if let Some(predicate) = &lock(&self.faults).reject_create {
            if predicate(collection, &fields) {
                return Err(StoreError::PermissionDenied("create rejected".to_string()));
            }
        }

        let id = uuid::Uuid::now_v7().to_string();
        let mut collections = lock(&self.collections);
        collections
            .entry(collection.clone())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        debug!(collection = %collection, id = %id, "Document created");
        self.publish_locked(&collections, collection);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut collections = lock(&self.collections);
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        for (key, value) in patch {
            doc.fields.insert(key, value);
        }
        debug!(collection = %collection, id = %id, "Document updated");
        self.publish_locked(&collections, collection);
        Ok(())
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), StoreError> {
        self.check_write()?;
        let mut collections = lock(&self.collections);
        let removed = match collections.get_mut(collection) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|d| d.id != id);
                before != docs.len()
            }
            None => false,
        };
        if removed {
            debug!(collection = %collection, id = %id, "Document deleted");
            self.publish_locked(&collections, collection);
        }
        Ok(())
    }
}
