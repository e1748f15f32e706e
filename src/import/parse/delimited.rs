//! Comma-separated parser.
//!
//! The first non-blank line is the header. Columns are located by
//! case-insensitive substring match on the header name. Fields may be
//! double-quoted, with `""` for a literal quote and commas allowed inside
//! quotes. Quoted fields spanning lines are not supported.

use super::dates::parse_date;
use super::{ParseError, ParsedTask};

const TASK_HEADERS: &[&str] = &["task", "todo", "title"];
const DUE_HEADERS: &[&str] = &["due", "date"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "notes"];
const COMPLETED_HEADERS: &[&str] = &["completed", "done", "status"];

const COMPLETED_VALUES: &[&str] = &["true", "yes", "1", "completed", "done"];

#[derive(Debug, Default)]
struct Columns {
    task: Option<usize>,
    due: Option<usize>,
    description: Option<usize>,
    completed: Option<usize>,
}

impl Columns {
    fn locate(headers: &[String]) -> Self {
        let find = |keys: &[&str]| {
            headers
                .iter()
                .position(|h| keys.iter().any(|key| h.contains(key)))
        };
        Self {
            task: find(TASK_HEADERS),
            due: find(DUE_HEADERS),
            description: find(DESCRIPTION_HEADERS),
            completed: find(COMPLETED_HEADERS),
        }
    }
}

/// Split one record into trimmed fields.
pub fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn is_completed(value: &str) -> bool {
    let value = value.to_lowercase();
    COMPLETED_VALUES.contains(&value.as_str())
}

pub fn parse(content: &str) -> Result<Vec<ParsedTask>, ParseError> {
    let mut lines = content.split('\n').filter(|line| !line.trim().is_empty());
    let header = lines.next().ok_or(ParseError::MissingHeader)?;
    let headers: Vec<String> = split_record(header)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();
    let columns = Columns::locate(&headers);

    Ok(lines
        .map(|line| {
            let cells = split_record(line);
            let cell = |index: Option<usize>| {
                index
                    .and_then(|i| cells.get(i))
                    .map(String::as_str)
                    .filter(|value| !value.is_empty())
            };

            ParsedTask {
                text: cell(columns.task)
                    .map(str::to_string)
                    .unwrap_or_else(|| line.trim_end_matches('\r').to_string()),
                description: cell(columns.description).map(str::to_string),
                due_date: cell(columns.due).and_then(parse_date),
                completed: cell(columns.completed).is_some_and(is_completed),
                original_line: Some(line.trim_end_matches('\r').to_string()),
            }
        })
        .collect())
}
