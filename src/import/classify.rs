//! File classification by extension.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Handling category of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Text,
    Images,
    Documents,
    Spreadsheets,
    Other,
}

impl FileCategory {
    pub const ALL: [FileCategory; 5] = [
        FileCategory::Text,
        FileCategory::Images,
        FileCategory::Documents,
        FileCategory::Spreadsheets,
        FileCategory::Other,
    ];

    /// Extensions in this category, with the leading dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileCategory::Text => &[".txt", ".csv", ".json", ".md", ".rtf"],
            FileCategory::Images => &[".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".svg"],
            FileCategory::Documents => &[".doc", ".docx", ".pdf", ".odt", ".pages"],
            FileCategory::Spreadsheets => &[".xls", ".xlsx", ".ods"],
            FileCategory::Other => &[".zip", ".rar", ".tar", ".gz"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Text => "text",
            FileCategory::Images => "images",
            FileCategory::Documents => "documents",
            FileCategory::Spreadsheets => "spreadsheets",
            FileCategory::Other => "other",
        }
    }

    /// Whether files of this category have their contents parsed.
    pub fn is_parsed(self) -> bool {
        self == FileCategory::Text
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of `name` with its leading dot, e.g. `".csv"`.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Category of a file name, or `None` when the extension is unknown.
pub fn classify(name: &str) -> Option<FileCategory> {
    let ext = extension_of(name)?;
    FileCategory::ALL
        .into_iter()
        .find(|category| category.extensions().contains(&ext.as_str()))
}

/// MIME type for a supported extension.
pub fn mime_type(name: &str) -> Option<&'static str> {
    let mime = match extension_of(name)?.as_str() {
        ".txt" => "text/plain",
        ".csv" => "text/csv",
        ".json" => "application/json",
        ".md" => "text/markdown",
        ".rtf" => "application/rtf",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".webp" => "image/webp",
        ".svg" => "image/svg+xml",
        ".doc" => "application/msword",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".pdf" => "application/pdf",
        ".odt" => "application/vnd.oasis.opendocument.text",
        ".xls" => "application/vnd.ms-excel",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".ods" => "application/vnd.oasis.opendocument.spreadsheet",
        ".zip" => "application/zip",
        ".rar" => "application/vnd.rar",
        ".tar" => "application/x-tar",
        ".gz" => "application/gzip",
        _ => return None,
    };
    Some(mime)
}

/// Human-readable list of every supported extension, grouped by category.
pub fn supported_formats() -> String {
    FileCategory::ALL
        .iter()
        .map(|category| format!("{}: {}", category, category.extensions().join(", ")))
        .collect::<Vec<_>>()
        .join(" | ")
}
