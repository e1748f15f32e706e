//! Core types shared by the sync layer and the import pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::import::FileCategory;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh time-ordered identifier (UUIDv7: millisecond clock + random bits).
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Store-assigned task identifier.
    TaskId
);
string_id!(
    /// Owning user identifier.
    UserId
);
string_id!(
    /// Identifier of a file inside the import pipeline.
    FileId
);
string_id!(
    /// Client-side identifier of a parsed, not yet persisted task.
    ImportId
);

/// Name of the top-level task collection.
pub const TASKS_COLLECTION: &str = "tasks";

/// Name of the per-task description revision sub-collection.
pub const DESCRIPTIONS_COLLECTION: &str = "descriptions";

/// Where a task came from when it was not typed in by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    FileUpload,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::FileUpload => "file-upload",
        }
    }
}

/// A persisted task as seen through the live subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Document id; lives outside the stored field map.
    #[serde(skip)]
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Provenance>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub text: String,
    /// Written as the first description revision when non-blank.
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub completed: bool,
    pub source: Option<Provenance>,
}

impl NewTask {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }
}

/// One immutable, versioned body of detail text attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionRevision {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

/// Metadata of a non-text file turned into a review task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub category: FileCategory,
    pub size: u64,
}

/// A task produced by the import pipeline, pending user review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTask {
    pub id: ImportId,
    /// File this task was parsed from.
    pub file_id: FileId,
    pub text: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub completed: bool,
    pub source: Provenance,
    /// Raw input line, for the line-oriented parser.
    pub original_line: Option<String>,
    pub file: Option<FileRef>,
}

impl ImportedTask {
    /// Convert into a creation request, 1:1.
    pub fn to_new_task(&self) -> NewTask {
        NewTask {
            text: self.text.clone(),
            description: self.description.clone().filter(|d| !d.trim().is_empty()),
            due_date: self.due_date,
            completed: self.completed,
            source: Some(self.source),
        }
    }
}
