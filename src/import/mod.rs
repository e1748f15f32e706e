//! File import pipeline.
//!
//! Files are validated synchronously in [`ImportPipeline::submit_files`]
//! (size, then extension), then each accepted file is read and parsed on
//! its own tokio task. Results land in [`ImportState`] in completion order.
//! A file that fails to parse is marked failed and contributes nothing;
//! its siblings are unaffected.
//!
//! Late results are dropped: every merge checks that the pipeline has not
//! been closed since the file was submitted and that the file is still
//! listed.

pub mod classify;
pub mod parse;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use classify::{FileCategory, classify, mime_type, supported_formats};
use parse::{ParseError, ParsedTask, TaskFormat};

use crate::config::ImportConfig;
use crate::error::{AppError, AppResult};
use crate::logging::Logger;
use crate::session::Session;
use crate::sync::{CommitReport, LiveSync};
use crate::types::{FileId, FileRef, ImportId, ImportedTask, Provenance};

/// Number of task texts shown in the preview.
const PREVIEW_LEN: usize = 3;

/// Where a payload's bytes come from.
#[derive(Debug, Clone)]
pub enum FileContent {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// A raw file entering the pipeline, from drag-and-drop or a picker.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub content: FileContent,
}

impl FilePayload {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        Self {
            mime_type: mime_type(&name).map(str::to_string),
            name,
            size: bytes.len() as u64,
            content: FileContent::Bytes(bytes),
        }
    }

    /// Describe a file on disk. Only metadata is read here.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            mime_type: mime_type(&name).map(str::to_string),
            name,
            size,
            content: FileContent::Path(path.to_path_buf()),
        })
    }

    async fn read(&self) -> Result<Vec<u8>, ParseError> {
        match &self.content {
            FileContent::Bytes(bytes) => Ok(bytes.clone()),
            FileContent::Path(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Success,
    Failed { message: String },
}

/// A file accepted into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileUpload {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub category: FileCategory,
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub status: FileStatus,
    /// Tasks this file produced, once parsed.
    pub task_ids: Vec<ImportId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportState {
    pub files: Vec<FileUpload>,
    /// Pending tasks, in the order their files finished parsing.
    pub tasks: Vec<ImportedTask>,
    /// Validation messages from the latest submission.
    pub warnings: Vec<AppError>,
    epoch: u64,
}

impl ImportState {
    pub fn file(&self, id: &FileId) -> Option<&FileUpload> {
        self.files.iter().find(|f| &f.id == id)
    }

    /// No file is still being parsed.
    pub fn is_idle(&self) -> bool {
        self.files.iter().all(|f| f.status != FileStatus::Pending)
    }
}

/// Result of one `submit_files` call.
#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    pub accepted: Vec<FileId>,
    pub rejected: Vec<AppError>,
}

/// Preview of the pending tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub with_due_date: usize,
    pub preview: Vec<String>,
}

impl ImportSummary {
    pub fn of(tasks: &[ImportedTask]) -> Self {
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total: tasks.len(),
            pending: tasks.len() - completed,
            completed,
            with_due_date: tasks.iter().filter(|t| t.due_date.is_some()).count(),
            preview: tasks
                .iter()
                .take(PREVIEW_LEN)
                .map(|t| t.text.clone())
                .collect(),
        }
    }
}

/// Decode file bytes as text, tolerating a BOM and invalid UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn imported(file: &FileUpload, parsed: ParsedTask) -> ImportedTask {
    ImportedTask {
        id: ImportId::generate(),
        file_id: file.id.clone(),
        text: parsed.text,
        description: parsed.description,
        due_date: parsed.due_date,
        completed: parsed.completed,
        source: Provenance::FileUpload,
        original_line: parsed.original_line,
        file: None,
    }
}

/// Single review task standing in for a file whose contents are not parsed.
fn placeholder(file: &FileUpload) -> ImportedTask {
    ImportedTask {
        id: ImportId::generate(),
        file_id: file.id.clone(),
        text: format!("Review {}", file.name),
        description: Some(format!(
            "{} file: {} ({:.1} KB)",
            file.category,
            file.name,
            file.size as f64 / 1024.0
        )),
        due_date: None,
        completed: false,
        source: Provenance::FileUpload,
        original_line: None,
        file: Some(FileRef {
            name: file.name.clone(),
            category: file.category,
            size: file.size,
        }),
    }
}

/// Turn one file into tasks.
async fn process(
    file: &FileUpload,
    payload: &FilePayload,
    config: &ImportConfig,
) -> Result<Vec<ImportedTask>, ParseError> {
    if !file.category.is_parsed() {
        return Ok(if config.placeholder_for_binary {
            vec![placeholder(file)]
        } else {
            Vec::new()
        });
    }

    let content = decode_text(&payload.read().await?);
    let parsed = TaskFormat::for_file(&file.name).parse(&content)?;
    Ok(parsed.into_iter().map(|p| imported(file, p)).collect())
}

/// Client-side import pipeline for one import dialog.
pub struct ImportPipeline {
    state: Arc<watch::Sender<ImportState>>,
    config: ImportConfig,
    logger: Logger,
    epoch: AtomicU64,
}

impl ImportPipeline {
    pub fn new(session: &Session, config: ImportConfig) -> Self {
        let (state, _) = watch::channel(ImportState::default());
        Self {
            state: Arc::new(state),
            config,
            logger: session.logger.named("import"),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Validate a batch and start parsing the accepted files.
    ///
    /// Oversized files are rejected one message each; unknown extensions
    /// produce one aggregate message naming the supported formats. Parsing
    /// continues in the background; watch [`ImportState`] for results.
    pub fn submit_files(&self, batch: Vec<FilePayload>) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::default();
        let mut accepted = Vec::new();
        let mut unsupported = 0usize;

        for payload in batch {
            if payload.size > self.config.max_file_bytes {
                outcome
                    .rejected
                    .push(AppError::file_too_large(&payload.name, self.config.max_file_bytes));
                continue;
            }
            let Some(category) = classify(&payload.name) else {
                debug!(file = %payload.name, "Skipping unsupported file");
                unsupported += 1;
                continue;
            };
            let upload = FileUpload {
                id: FileId::generate(),
                name: payload.name.clone(),
                size: payload.size,
                category,
                mime_type: payload.mime_type.clone(),
                status: FileStatus::Pending,
                task_ids: Vec::new(),
            };
            outcome.accepted.push(upload.id.clone());
            accepted.push((upload, payload));
        }
        if unsupported > 0 {
            outcome
                .rejected
                .push(AppError::unsupported_formats(&supported_formats()));
        }

        for err in &outcome.rejected {
            self.logger.warning(&err.message);
        }

        let rejected = outcome.rejected.clone();
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.warnings = rejected;
            s.files.extend(accepted.iter().map(|(upload, _)| upload.clone()));
        });

        for (upload, payload) in accepted {
            self.spawn_parse(epoch, upload, payload);
        }
        outcome
    }

    fn spawn_parse(&self, epoch: u64, upload: FileUpload, payload: FilePayload) {
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let result = process(&upload, &payload, &config).await;
            if let Err(e) = &result {
                warn!(file = %upload.name, error = %e, "Failed to parse file");
                logger.error(&AppError::parse_failed(&upload.name, e).message);
            }
            state.send_modify(|s| {
                if s.epoch != epoch {
                    return;
                }
                let Some(file) = s.files.iter_mut().find(|f| f.id == upload.id) else {
                    debug!(file = %upload.name, "Dropped result for removed file");
                    return;
                };
                match result {
                    Ok(tasks) => {
                        info!(file = %upload.name, count = tasks.len(), "File parsed");
                        file.status = FileStatus::Success;
                        file.task_ids = tasks.iter().map(|t| t.id.clone()).collect();
                        s.tasks.extend(tasks);
                    }
                    Err(e) => {
                        file.status = FileStatus::Failed {
                            message: e.to_string(),
                        };
                    }
                }
            });
        });
    }

    /// Drop a file and every task it produced. Returns whether it was listed.
    pub fn remove_file(&self, id: &FileId) -> bool {
        let mut removed = false;
        self.state.send_modify(|s| {
            let before = s.files.len();
            s.files.retain(|f| &f.id != id);
            removed = s.files.len() != before;
            s.tasks.retain(|t| &t.file_id != id);
        });
        removed
    }

    /// Discard all files, tasks and in-flight results.
    pub fn close(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ImportState {
            epoch,
            ..ImportState::default()
        });
    }

    /// Hand the pending tasks to the caller for persistence.
    pub fn commit(&self) -> AppResult<Vec<ImportedTask>> {
        let tasks = self.state.borrow().tasks.clone();
        if tasks.is_empty() {
            let err = AppError::nothing_to_commit();
            self.logger.warning(&err.message);
            return Err(err);
        }
        Ok(tasks)
    }

    /// Commit and persist through `sync`. The pipeline is closed only when
    /// every task was saved.
    pub async fn commit_to(&self, sync: &LiveSync) -> AppResult<CommitReport> {
        let tasks = self.commit()?;
        let report = sync.commit_imports(&tasks).await;
        if report.is_complete() {
            self.close();
        }
        Ok(report)
    }

    pub fn state(&self) -> ImportState {
        self.state.borrow().clone()
    }

    pub fn files(&self) -> Vec<FileUpload> {
        self.state.borrow().files.clone()
    }

    pub fn tasks(&self) -> Vec<ImportedTask> {
        self.state.borrow().tasks.clone()
    }

    pub fn summary(&self) -> ImportSummary {
        ImportSummary::of(&self.state.borrow().tasks)
    }

    pub fn watch(&self) -> watch::Receiver<ImportState> {
        self.state.subscribe()
    }

    /// Wait until no accepted file is still pending.
    pub async fn wait_idle(&self) -> ImportState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(ImportState::is_idle).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}
