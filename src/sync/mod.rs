//! Live collection sync.
//!
//! Keeps a client-side mirror of the signed-in user's tasks:
//! - one subscription per identity, filtered on `userId`, torn down on sign-out
//! - every snapshot replaces the whole task list, in store order
//! - after each snapshot, every task's description revisions are fetched
//!   independently and the latest-timestamp revision is merged into the
//!   description map under that task's key
//!
//! Writes are one-shot store calls. They never touch the mirror; a write
//! becomes visible only when the next snapshot arrives.
//!
//! The mirror is a [`MirrorState`] held in a `tokio::sync::watch` channel and
//! changed only by whole-value replacement or single-key merges. Every merge
//! first checks that the listener epoch and the per-task fetch generation are
//! still current, so results that arrive after sign-out or after a newer
//! snapshot are dropped.

pub mod resolve;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::logging::{Logger, Severity};
use crate::session::{Clock, Session};
use crate::store::{
    CollectionPath, DocumentStore, Fields, Filter, Snapshot, StoreError, Subscription, encode,
};
use crate::types::{
    DESCRIPTIONS_COLLECTION, DescriptionRevision, ImportId, ImportedTask, NewTask,
    TASKS_COLLECTION, Task, TaskId, UserId,
};

fn tasks_path() -> CollectionPath {
    CollectionPath::root(TASKS_COLLECTION)
}

fn descriptions_path(task_id: &TaskId) -> CollectionPath {
    CollectionPath::child(TASKS_COLLECTION, task_id.as_str(), DESCRIPTIONS_COLLECTION)
}

/// Client-side mirror of the user's task collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorState {
    /// Identity the mirror belongs to.
    pub user: Option<UserId>,
    /// Tasks as last received, in store order.
    pub tasks: Vec<Task>,
    /// Current description per task. Absent means none resolved (yet).
    pub descriptions: HashMap<TaskId, String>,
    /// Tasks whose description revisions are being fetched.
    pub loading: HashSet<TaskId>,
    /// Last subscription error; cleared by the next good snapshot.
    pub error: Option<AppError>,
    /// Number of the snapshot the task list came from.
    pub generation: u64,
    epoch: u64,
    fetches: HashMap<TaskId, u64>,
}

impl MirrorState {
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task(id).is_some()
    }

    pub fn description(&self, id: &TaskId) -> Option<&str> {
        self.descriptions.get(id).map(String::as_str)
    }

    pub fn is_loading(&self, id: &TaskId) -> bool {
        self.loading.contains(id)
    }

    /// No description fetch is outstanding.
    pub fn is_settled(&self) -> bool {
        self.loading.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }
}

/// Outcome of persisting a batch of imported tasks.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub created: Vec<(ImportId, TaskId)>,
    pub failed: Vec<(ImportId, AppError)>,
}

impl CommitReport {
    pub fn total(&self) -> usize {
        self.created.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The batch-level error, if any item failed. Created items stay created.
    pub fn error(&self) -> Option<AppError> {
        if self.failed.is_empty() {
            None
        } else {
            Some(AppError::partial_commit(self.failed.len(), self.total()))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the sync handle, its listener task and fetch tasks.
struct Shared {
    store: Arc<dyn DocumentStore>,
    logger: Logger,
    state: watch::Sender<MirrorState>,
    generation: AtomicU64,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply_snapshot(self: &Arc<Self>, epoch: u64, snapshot: Snapshot) {
        let mut tasks = Vec::with_capacity(snapshot.len());
        for doc in &snapshot.documents {
            match doc.decode::<Task>() {
                Ok(mut task) => {
                    task.id = TaskId::new(doc.id.clone());
                    tasks.push(task);
                }
                Err(e) => warn!(task_id = %doc.id, error = %e, "Skipping malformed task document"),
            }
        }

        let generation = self.next_generation();
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut applied = false;
        self.state.send_modify(|s| {
            if s.epoch != epoch {
                return;
            }
            applied = true;
            let present: HashSet<&TaskId> = ids.iter().collect();
            s.descriptions.retain(|id, _| present.contains(id));
            s.tasks = tasks;
            s.error = None;
            s.generation = generation;
            s.loading = ids.iter().cloned().collect();
            s.fetches = ids.iter().map(|id| (id.clone(), generation)).collect();
        });
        if !applied {
            debug!(epoch, "Dropped snapshot from a torn-down subscription");
            return;
        }

        debug!(generation, tasks = ids.len(), "Snapshot applied");
        for id in ids {
            self.spawn_fetch(id, epoch, generation);
        }
    }

    fn fail_subscription(&self, epoch: u64, err: AppError) {
        self.logger.error(&err.message);
        self.state.send_modify(|s| {
            if s.epoch == epoch {
                s.error = Some(err);
            }
        });
    }

    /// Re-resolve one task's description outside a snapshot.
    fn request_description(self: &Arc<Self>, id: &TaskId) {
        let generation = self.next_generation();
        let mut epoch = None;
        self.state.send_modify(|s| {
            if s.contains(id) {
                s.loading.insert(id.clone());
                s.fetches.insert(id.clone(), generation);
                epoch = Some(s.epoch);
            }
        });
        if let Some(epoch) = epoch {
            self.spawn_fetch(id.clone(), epoch, generation);
        }
    }

    fn spawn_fetch(self: &Arc<Self>, id: TaskId, epoch: u64, generation: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let resolved = match shared
                .store
                .query(&descriptions_path(&id), &Filter::all())
                .await
            {
                Ok(docs) => resolve::decode_revisions(&docs)
                    .map(|revisions| resolve::current_revision(&revisions).map(|r| r.text.clone())),
                Err(e) => Err(e),
            };
            shared.merge_description(&id, epoch, generation, resolved);
        });
    }

    fn merge_description(
        &self,
        id: &TaskId,
        epoch: u64,
        generation: u64,
        resolved: Result<Option<String>, StoreError>,
    ) {
        self.state.send_modify(|s| {
            // A newer fetch owns this slot, or the task/subscription is gone.
            if s.epoch != epoch || s.fetches.get(id) != Some(&generation) {
                return;
            }
            s.fetches.remove(id);
            s.loading.remove(id);
            if !s.contains(id) {
                return;
            }
            match resolved {
                Ok(Some(text)) => {
                    s.descriptions.insert(id.clone(), text);
                }
                Ok(None) => {
                    s.descriptions.remove(id);
                }
                Err(e) => warn!(task_id = %id, error = %e, "Failed to load description"),
            }
        });
    }
}

async fn listen(shared: Arc<Shared>, epoch: u64, mut subscription: Subscription) {
    while let Some(event) = subscription.next().await {
        match event {
            Ok(snapshot) => shared.apply_snapshot(epoch, snapshot),
            Err(e) => shared.fail_subscription(epoch, AppError::subscription(&e)),
        }
    }
    debug!(epoch, "Subscription stream ended");
}

/// Live mirror of one user's tasks plus the write path to the store.
pub struct LiveSync {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    epoch: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSync {
    /// Create the sync layer without subscribing yet.
    pub fn new(session: &Session) -> Self {
        let (state, _) = watch::channel(MirrorState::default());
        Self {
            shared: Arc::new(Shared {
                store: Arc::clone(&session.store),
                logger: session.logger.named("sync"),
                state,
                generation: AtomicU64::new(0),
            }),
            clock: Arc::clone(&session.clock),
            epoch: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Create the sync layer and subscribe for the session's user, if any.
    pub async fn connect(session: &Session) -> AppResult<Self> {
        let sync = Self::new(session);
        sync.set_identity(session.user.clone()).await?;
        Ok(sync)
    }

    /// Switch identity. A new user gets a fresh mirror and subscription;
    /// `None` tears the subscription down and empties the mirror.
    /// Setting the current user again keeps the live subscription.
    pub async fn set_identity(&self, user: Option<UserId>) -> AppResult<()> {
        if self.shared.state.borrow().user == user && (user.is_none() || self.is_listening()) {
            return Ok(());
        }

        self.stop_listener();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(MirrorState {
            user: user.clone(),
            epoch,
            ..MirrorState::default()
        });

        let Some(user) = user else {
            info!("Signed out; task subscription torn down");
            return Ok(());
        };

        let filter = Filter::eq("userId", user.as_str());
        let subscription = match self.shared.store.subscribe(&tasks_path(), filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let err = AppError::subscription(&e);
                self.shared.fail_subscription(epoch, err.clone());
                return Err(err);
            }
        };

        info!(user = %user, "Subscribed to tasks");
        let handle = tokio::spawn(listen(Arc::clone(&self.shared), epoch, subscription));
        if let Some(previous) = lock(&self.listener).replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn sign_in(&self, user: impl Into<UserId>) -> AppResult<()> {
        self.set_identity(Some(user.into())).await
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.set_identity(None).await
    }

    /// Whether a listener task is alive.
    pub fn is_listening(&self) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop_listener(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Read side
    // -------------------------------------------------------------------------

    /// Copy of the whole mirror.
    pub fn state(&self) -> MirrorState {
        self.shared.state.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared.state.borrow().tasks.clone()
    }

    pub fn descriptions(&self) -> HashMap<TaskId, String> {
        self.shared.state.borrow().descriptions.clone()
    }

    pub fn loading(&self) -> HashSet<TaskId> {
        self.shared.state.borrow().loading.clone()
    }

    pub fn error(&self) -> Option<AppError> {
        self.shared.state.borrow().error.clone()
    }

    /// Receiver that observes every mirror change.
    pub fn watch(&self) -> watch::Receiver<MirrorState> {
        self.shared.state.subscribe()
    }

    /// Wait until the mirror satisfies `predicate` and return a copy of it.
    pub async fn wait_for<F>(&self, predicate: F) -> MirrorState
    where
        F: FnMut(&MirrorState) -> bool,
    {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(predicate).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    // -------------------------------------------------------------------------
    // Write side
    // -------------------------------------------------------------------------

    fn report(&self, err: &AppError) {
        if err.code.is_validation() {
            self.shared.logger.warning(&err.message);
        } else {
            self.shared.logger.error(&err.message);
        }
    }

    fn fail(&self, action: &str, e: StoreError) -> AppError {
        let err = AppError::operation(action, e);
        self.report(&err);
        err
    }

    fn current_user(&self) -> AppResult<UserId> {
        match self.shared.state.borrow().user.clone() {
            Some(user) => Ok(user),
            None => {
                let err = AppError::not_signed_in();
                self.report(&err);
                Err(err)
            }
        }
    }

    async fn write_revision(
        &self,
        task_id: &TaskId,
        text: &str,
        version: u32,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let revision = DescriptionRevision {
            id: String::new(),
            text: text.to_string(),
            created_at: now,
            updated_at: now,
            version,
        };
        self.shared
            .store
            .create(&descriptions_path(task_id), encode(&revision)?)
            .await?;
        Ok(())
    }

    /// Create a task owned by the current user. The text is stored trimmed;
    /// a non-blank description becomes revision 1.
    pub async fn create_task(&self, new_task: NewTask) -> AppResult<TaskId> {
        let user = self.current_user()?;
        let text = new_task.text.trim();
        if text.is_empty() {
            let err = AppError::empty_text();
            self.report(&err);
            return Err(err);
        }

        let task = Task {
            id: TaskId::default(),
            text: text.to_string(),
            completed: new_task.completed,
            user_id: user,
            created_at: self.clock.now(),
            due_date: new_task.due_date,
            source: new_task.source,
        };
        let fields = encode(&task).map_err(|e| self.fail("add task", e))?;
        let id = self
            .shared
            .store
            .create(&tasks_path(), fields)
            .await
            .map_err(|e| self.fail("add task", e))?;
        let id = TaskId::new(id);
        info!(task_id = %id, "Task created");

        if let Some(description) = new_task
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            self.write_revision(&id, description, 1)
                .await
                .map_err(|e| {
                    self.fail("add description", e)
                        .with_details(format!("task {} was created", id))
                })?;
            self.shared.request_description(&id);
        }
        Ok(id)
    }

    /// Flip `task.completed` in the store. The mirror changes on the next snapshot.
    pub async fn toggle_completion(&self, task: &Task) -> AppResult<()> {
        self.current_user()?;
        let mut patch = Fields::new();
        patch.insert("completed".to_string(), Value::Bool(!task.completed));
        self.shared
            .store
            .update(&tasks_path(), task.id.as_str(), patch)
            .await
            .map_err(|e| self.fail("update task", e))?;
        debug!(task_id = %task.id, completed = !task.completed, "Completion toggled");
        Ok(())
    }

    pub async fn delete_task(&self, id: &TaskId) -> AppResult<()> {
        self.current_user()?;
        self.shared
            .store
            .delete(&tasks_path(), id.as_str())
            .await
            .map_err(|e| self.fail("delete task", e))?;
        debug!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Append a description revision and return its version number.
    ///
    /// Concurrent edits are not coordinated: each lands as its own revision
    /// and the later timestamp becomes current.
    pub async fn add_description_revision(&self, id: &TaskId, text: &str) -> AppResult<u32> {
        self.current_user()?;
        let docs = self
            .shared
            .store
            .query(&descriptions_path(id), &Filter::all())
            .await
            .map_err(|e| self.fail("update description", e))?;
        let revisions =
            resolve::decode_revisions(&docs).map_err(|e| self.fail("update description", e))?;
        let version = resolve::next_version(&revisions);

        self.write_revision(id, text, version)
            .await
            .map_err(|e| self.fail("update description", e))?;
        debug!(task_id = %id, version, "Description revision added");
        self.shared.request_description(id);
        Ok(version)
    }

    /// Persist imported tasks one by one. A failure does not stop the rest and
    /// nothing already written is rolled back.
    pub async fn commit_imports(&self, tasks: &[ImportedTask]) -> CommitReport {
        let mut report = CommitReport::default();
        for imported in tasks {
            match self.create_task(imported.to_new_task()).await {
                Ok(task_id) => report.created.push((imported.id.clone(), task_id)),
                Err(err) => report.failed.push((imported.id.clone(), err)),
            }
        }
        match report.error() {
            Some(err) => {
                let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
                self.shared.logger.log_with_data(
                    Severity::Error,
                    &err.message,
                    json!({ "created": report.created.len(), "failed": failed }),
                );
            }
            None => self
                .shared
                .logger
                .info(&format!("{} tasks imported", report.created.len())),
        }
        report
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
