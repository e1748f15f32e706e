//! Subscriber fan-out shared by store backends.
//!
//! Tracks live subscriptions per collection. After every write the backend
//! hands the hub the collection's full document list; the hub filters it for
//! each subscriber and delivers a fresh snapshot. Subscribers whose receiver
//! was dropped are pruned on the next delivery.
//!
//! Delivery can be held: while held, snapshots queue up in order and go out
//! on [`SubscriptionHub::release`]. Tests use this to observe local state
//! between a write and the snapshot that reflects it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{CollectionPath, Document, Filter, Snapshot, SnapshotEvent, StoreError, Subscription};

struct Subscriber {
    collection: CollectionPath,
    filter: Filter,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

/// Manages live subscriptions for one store instance.
///
/// Thread-safe: uses internal `Mutex`es so it can be shared across async
/// tasks without requiring `&mut self`.
#[derive(Default)]
pub struct SubscriptionHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    /// `Some` while delivery is held.
    held: Mutex<Option<Vec<(u64, SnapshotEvent)>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and deliver `current` (filtered) as its first snapshot.
    pub fn subscribe(
        self: &Arc<Self>,
        collection: &CollectionPath,
        filter: Filter,
        current: &[Document],
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = snapshot_for(&filter, current);
        lock(&self.subscribers).insert(
            id,
            Subscriber {
                collection: collection.clone(),
                filter,
                tx,
            },
        );
        debug!(subscription = id, collection = %collection, "Subscriber registered");
        self.deliver(id, Ok(initial));
        Subscription::new(id, rx, Arc::clone(self))
    }

    /// Remove a subscriber. Returns `true` if it was present.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = lock(&self.subscribers).remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Subscriber unregistered");
        }
        removed
    }

    /// Check if any subscriptions are registered.
    pub fn has_subscriptions(&self) -> bool {
        !lock(&self.subscribers).is_empty()
    }

    /// Number of subscribers on one collection.
    pub fn subscriber_count(&self, collection: &CollectionPath) -> usize {
        lock(&self.subscribers)
            .values()
            .filter(|s| &s.collection == collection)
            .count()
    }

    /// Distinct collections that currently have subscribers.
    pub fn collections(&self) -> Vec<CollectionPath> {
        let mut paths: Vec<CollectionPath> = lock(&self.subscribers)
            .values()
            .map(|s| s.collection.clone())
            .collect();
        paths.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        paths.dedup();
        paths
    }

    /// Deliver a fresh snapshot of `documents` to every subscriber on `collection`.
    pub fn publish(&self, collection: &CollectionPath, documents: &[Document]) {
        let targets: Vec<(u64, Snapshot)> = lock(&self.subscribers)
            .iter()
            .filter(|(_, s)| &s.collection == collection)
            .map(|(id, s)| (*id, snapshot_for(&s.filter, documents)))
            .collect();
        for (id, snapshot) in targets {
            trace!(subscription = id, documents = snapshot.len(), "Publishing snapshot");
            self.deliver(id, Ok(snapshot));
        }
    }

    /// Deliver an error to every subscriber on `collection`.
    pub fn publish_error(&self, collection: &CollectionPath, message: &str) {
        let ids: Vec<u64> = lock(&self.subscribers)
            .iter()
            .filter(|(_, s)| &s.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.deliver(id, Err(StoreError::Unavailable(message.to_string())));
        }
    }

    /// Start queueing deliveries instead of sending them.
    pub fn hold(&self) {
        let mut held = lock(&self.held);
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Send every queued delivery in order and stop holding.
    /// Returns the number of deliveries sent.
    pub fn release(&self) -> usize {
        let mut held = lock(&self.held);
        let queued = held.take().unwrap_or_default();
        let count = queued.len();
        for (id, event) in queued {
            self.send(id, event);
        }
        count
    }

    /// Send queued deliveries but keep holding later ones.
    pub fn flush(&self) -> usize {
        let mut held = lock(&self.held);
        let queued = match held.as_mut() {
            Some(queue) => std::mem::take(queue),
            None => return 0,
        };
        let count = queued.len();
        for (id, event) in queued {
            self.send(id, event);
        }
        count
    }

    pub fn is_holding(&self) -> bool {
        lock(&self.held).is_some()
    }

    /// Queue or send one event. `held` stays locked while sending, so a
    /// release in progress is never overtaken.
    fn deliver(&self, id: u64, event: SnapshotEvent) {
        let mut held = lock(&self.held);
        match held.as_mut() {
            Some(queue) => queue.push((id, event)),
            None => self.send(id, event),
        }
    }

    fn send(&self, id: u64, event: SnapshotEvent) {
        let mut subscribers = lock(&self.subscribers);
        let closed = match subscribers.get(&id) {
            Some(subscriber) => subscriber.tx.send(event).is_err(),
            None => false,
        };
        if closed {
            subscribers.remove(&id);
            debug!(subscription = id, "Pruned closed subscriber");
        }
    }
}

fn snapshot_for(filter: &Filter, documents: &[Document]) -> Snapshot {
    Snapshot {
        documents: documents
            .iter()
            .filter(|doc| filter.matches(&doc.fields))
            .cloned()
            .collect(),
    }
}
