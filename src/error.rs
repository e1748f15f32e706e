//! Structured, user-visible errors for sync and import operations.

use serde::Serialize;
use std::fmt;

use crate::store::StoreError;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors, rejected before any I/O
    EmptyTaskText,
    FileTooLarge,
    UnsupportedFormat,
    NothingToCommit,
    NotSignedIn,

    // Parse errors, isolated to one file
    ParseFailed,

    // Remote I/O errors
    TaskNotFound,
    PermissionDenied,
    StoreError,
    SubscriptionError,
    PartialCommit,

    InternalError,
}

impl ErrorCode {
    /// Whether the failure was caught before touching the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::EmptyTaskText
                | ErrorCode::FileTooLarge
                | ErrorCode::UnsupportedFormat
                | ErrorCode::NothingToCommit
                | ErrorCode::NotSignedIn
        )
    }
}

/// Structured error carrying a human-readable message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn empty_text() -> Self {
        Self::new(ErrorCode::EmptyTaskText, "Task text cannot be empty").with_field("text")
    }

    pub fn file_too_large(name: &str, max_bytes: u64) -> Self {
        Self::new(
            ErrorCode::FileTooLarge,
            format!(
                "File {} is too large. Maximum size is {}MB.",
                name,
                max_bytes / (1024 * 1024)
            ),
        )
        .with_field(name)
    }

    pub fn unsupported_formats(supported: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedFormat,
            format!("Some files were skipped. Supported formats: {}", supported),
        )
    }

    pub fn nothing_to_commit() -> Self {
        Self::new(
            ErrorCode::NothingToCommit,
            "No tasks to upload. Please add some files first.",
        )
    }

    pub fn not_signed_in() -> Self {
        Self::new(ErrorCode::NotSignedIn, "You must be logged in")
    }

    pub fn parse_failed(file: &str, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ParseFailed, err.to_string()).with_field(file)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    /// Prefix a store failure with the operation that hit it,
    /// e.g. "Failed to add task: ...".
    pub fn operation(action: &str, err: StoreError) -> Self {
        let code = match &err {
            StoreError::NotFound { .. } => ErrorCode::TaskNotFound,
            StoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            _ => ErrorCode::StoreError,
        };
        Self::new(code, format!("Failed to {}: {}", action, err))
    }

    pub fn subscription(err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SubscriptionError,
            format!("Error fetching tasks: {}", err),
        )
    }

    pub fn partial_commit(failed: usize, total: usize) -> Self {
        Self::new(
            ErrorCode::PartialCommit,
            format!(
                "Failed to upload tasks: {} of {} could not be saved",
                failed, total
            ),
        )
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::operation("reach the task store", err)
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app_err) => app_err,
            Err(err) => AppError::internal(err),
        }
    }
}

/// Result type for sync and import operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
