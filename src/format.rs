//! Output formatting for the command line: plain text and JSON.

use serde_json::{Value, json};

use crate::import::{FileStatus, FileUpload, ImportSummary};
use crate::sync::{CommitReport, MirrorState};
use crate::types::Task;

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// One task as a single line: `[x] text (due 2024-01-15)  <id>`.
pub fn format_task_line(task: &Task) -> String {
    let mark = if task.completed { 'x' } else { ' ' };
    let mut line = format!("[{}] {}", mark, task.text);
    if let Some(due) = task.due_date {
        line.push_str(&format!(" (due {})", due));
    }
    line.push_str(&format!("  {}", task.id));
    line
}

pub fn format_tasks_text(state: &MirrorState) -> String {
    let mut out = format!(
        "Tasks ({}, {} completed)\n",
        state.tasks.len(),
        state.completed_count()
    );
    if let Some(err) = &state.error {
        out.push_str(&format!("! {}\n", err));
    }
    for task in &state.tasks {
        out.push_str(&format_task_line(task));
        out.push('\n');
        if let Some(description) = state.description(&task.id) {
            for line in description.lines() {
                out.push_str(&format!("      {}\n", line));
            }
        } else if state.is_loading(&task.id) {
            out.push_str("      (loading description)\n");
        }
    }
    out
}

fn task_json(task: &Task, state: &MirrorState) -> Value {
    json!({
        "id": task.id,
        "text": task.text,
        "completed": task.completed,
        "createdAt": task.created_at,
        "dueDate": task.due_date,
        "source": task.source,
        "description": state.description(&task.id),
    })
}

pub fn format_tasks_json(state: &MirrorState) -> Value {
    json!({
        "tasks": state.tasks.iter().map(|t| task_json(t, state)).collect::<Vec<_>>(),
        "error": state.error,
    })
}

pub fn format_tasks(state: &MirrorState, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_tasks_text(state),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&format_tasks_json(state)).unwrap_or_default()
        }
    }
}

pub fn format_file_status(file: &FileUpload) -> String {
    let status = match &file.status {
        FileStatus::Pending => "pending".to_string(),
        FileStatus::Success => format!("{} task(s)", file.task_ids.len()),
        FileStatus::Failed { message } => format!("failed: {}", message),
    };
    format!("{} [{}] {}", file.name, file.category, status)
}

pub fn format_summary_text(summary: &ImportSummary) -> String {
    let mut out = format!(
        "{} task(s): {} pending, {} completed, {} with due dates\n",
        summary.total, summary.pending, summary.completed, summary.with_due_date
    );
    for text in &summary.preview {
        out.push_str(&format!("  - {}\n", text));
    }
    if summary.total > summary.preview.len() {
        out.push_str(&format!(
            "  ... and {} more\n",
            summary.total - summary.preview.len()
        ));
    }
    out
}

pub fn format_commit_report(report: &CommitReport) -> String {
    match report.error() {
        None => format!("Saved {} task(s)", report.created.len()),
        Some(err) => {
            let mut out = err.message.clone();
            for (id, failure) in &report.failed {
                out.push_str(&format!("\n  {}: {}", id, failure));
            }
            out
        }
    }
}
