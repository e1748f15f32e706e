//! Text-file task parsers.
//!
//! Three formats, selected by file extension:
//! - [`TaskFormat::Lines`]: one task per non-blank line (`.txt`, `.md`, `.rtf`)
//! - [`TaskFormat::Delimited`]: comma-separated with a header row (`.csv`)
//! - [`TaskFormat::Structured`]: a JSON object or array of objects (`.json`)

pub mod dates;
pub mod delimited;
pub mod lines;
pub mod structured;

use chrono::NaiveDate;
use thiserror::Error;

use super::classify::extension_of;

/// A task record as read from file content, before it gets ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTask {
    pub text: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub completed: bool,
    pub original_line: Option<String>,
}

impl ParsedTask {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object or an array of objects")]
    NotAnObject,

    #[error("Missing header row")]
    MissingHeader,

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Parser variant for a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFormat {
    Lines,
    Delimited,
    Structured,
}

impl TaskFormat {
    /// Format for a text-category file name. Unknown text extensions read as lines.
    pub fn for_file(name: &str) -> Self {
        match extension_of(name).as_deref() {
            Some(".csv") => TaskFormat::Delimited,
            Some(".json") => TaskFormat::Structured,
            _ => TaskFormat::Lines,
        }
    }

    pub fn parse(self, content: &str) -> Result<Vec<ParsedTask>, ParseError> {
        match self {
            TaskFormat::Lines => Ok(lines::parse(content)),
            TaskFormat::Delimited => delimited::parse(content),
            TaskFormat::Structured => structured::parse(content),
        }
    }
}
