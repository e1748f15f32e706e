//! Import subcommand.
//!
//! Runs the given files through the import pipeline, prints per-file status
//! and a preview, then saves the tasks unless `--dry-run` is given.

use clap::Args;
use std::path::PathBuf;

use crate::import::FilePayload;

/// Arguments for the import subcommand
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Files to import
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Parse and preview without saving anything
    #[arg(long)]
    pub dry_run: bool,
}

impl ImportArgs {
    /// Describe the import mode for logging
    pub fn import_mode(&self) -> &'static str {
        if self.dry_run { "dry-run" } else { "commit" }
    }

    /// Build payloads for the named files. Files that cannot be inspected
    /// are returned separately with their error.
    pub fn payloads(&self) -> (Vec<FilePayload>, Vec<(PathBuf, std::io::Error)>) {
        let mut payloads = Vec::new();
        let mut unreadable = Vec::new();
        for path in &self.files {
            match FilePayload::from_path(path) {
                Ok(payload) => payloads.push(payload),
                Err(e) => unreadable.push((path.clone(), e)),
            }
        }
        (payloads, unreadable)
    }
}
