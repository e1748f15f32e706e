//! SQLite-backed document store.
//!
//! Documents are rows of one `documents` table keyed by `(collection, id)`,
//! with the field map stored as JSON text. Store order is insertion order.
//!
//! Writes made through this handle publish snapshots immediately. Writes made
//! by other connections (another process on the same file) are picked up by
//! [`SqliteStore::watch_external_changes`], which polls `PRAGMA data_version`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    CollectionPath, Document, DocumentStore, Fields, Filter, StoreError, Subscription,
    SubscriptionHub,
};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Store handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    hub: Arc<SubscriptionHub>,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;

        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hub: Arc::new(SubscriptionHub::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute a function with exclusive access to the connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }

    fn load(&self, collection: &CollectionPath) -> Result<Vec<Document>, StoreError> {
        self.with_conn(|conn| load_documents(conn, collection))
    }

    /// Reload and fan out `collection`. Runs under the connection lock, so
    /// snapshots leave in commit order.
    fn publish_locked(&self, conn: &Connection, collection: &CollectionPath) {
        match load_documents(conn, collection) {
            Ok(docs) => self.hub.publish(collection, &docs),
            Err(e) => {
                warn!(collection = %collection, error = %e, "Failed to reload collection for subscribers");
                self.hub.publish_error(collection, &e.to_string());
            }
        }
    }

    /// Re-publish every subscribed collection.
    pub fn publish_subscribed(&self) {
        let conn = self.lock();
        for collection in self.hub.collections() {
            self.publish_locked(&conn, &collection);
        }
    }

    fn data_version(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?))
    }

    /// Poll for commits made by other connections and re-publish subscribed
    /// collections when one is seen. Abort the returned handle to stop.
    pub fn watch_external_changes(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last = store.data_version().ok();
            loop {
                ticker.tick().await;
                match store.data_version() {
                    Ok(version) if Some(version) != last => {
                        debug!(version, "External change detected");
                        last = Some(version);
                        store.publish_subscribed();
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to poll data_version"),
                }
            }
        })
    }
}

fn load_documents(conn: &Connection, collection: &CollectionPath) -> Result<Vec<Document>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, body)| Ok(Document { id, fields: decode_body(&body)? }))
        .collect()
}

fn decode_body(body: &str) -> Result<Fields, StoreError> {
    match serde_json::from_str(body)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Fields::new()),
    }
}

/// Get the current timestamp in milliseconds.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Filter,
    ) -> Result<Subscription, StoreError> {
        self.with_conn(|conn| {
            let docs = load_documents(conn, collection)?;
            Ok(self.hub.subscribe(collection, filter, &docs))
        })
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .load(collection)?
            .into_iter()
            .filter(|doc| filter.matches(&doc.fields))
            .collect())
    }

    async fn create(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::now_v7().to_string();
        let body = serde_json::to_string(&fields)?;
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![collection.as_str(), id, body, now],
            )?;
            debug!(collection = %collection, id = %id, "Document created");
            self.publish_locked(conn, collection);
            Ok(())
        })?;
        Ok(id)
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let body: Option<String> = tx
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection.as_str(), id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(body) = body else {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            };

            let mut fields = decode_body(&body)?;
            for (key, value) in patch {
                fields.insert(key, value);
            }
            tx.execute(
                "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id, serde_json::to_string(&fields)?, now_ms()],
            )?;
            tx.commit()?;
            debug!(collection = %collection, id = %id, "Document updated");
            self.publish_locked(conn, collection);
            Ok(())
        })
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )?;
            if removed > 0 {
                debug!(collection = %collection, id = %id, "Document deleted");
                self.publish_locked(conn, collection);
            }
            Ok(())
        })
    }
}
