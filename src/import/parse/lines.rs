//! Line-oriented parser: one task per non-blank line.
//!
//! List markers (`-`, `*`, `+`, `•`, `1.`) are stripped. A due phrase
//! introduced by "by", "due" or "due:" followed by one or two tokens is
//! always removed from the text; it only sets the due date when the tokens
//! parse as a date. A trailing word after a one-token date stays in the text.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex_lite::Regex;

use super::ParsedTask;
use super::dates::parse_date;

const BULLETS: [char; 4] = ['-', '*', '+', '•'];

static DUE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(by|due:?)\s+([^\s,]+(?:\s+[^\s,]+)?)").expect("due phrase pattern is valid")
});

pub fn parse(content: &str) -> Vec<ParsedTask> {
    content
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// Drop one leading bullet, then one leading `<digits>.` prefix.
fn strip_markers(line: &str) -> &str {
    let line = line.trim_start();
    let line = line.strip_prefix(BULLETS).map_or(line, str::trim_start);
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let line = match line[digits..].strip_prefix('.') {
        Some(rest) if digits > 0 => rest.trim_start(),
        _ => line,
    };
    line.trim()
}

/// Byte range of the due phrase and the date it names, if any.
///
/// When both tokens together are not a date but the first one is, the
/// phrase shrinks to the keyword and that first token.
fn find_due_phrase(text: &str) -> Option<(Range<usize>, Option<NaiveDate>)> {
    let caps = DUE_PHRASE.captures(text)?;
    let phrase = caps.get(0)?.range();
    let tokens = caps.get(2)?;
    if let Some(date) = parse_date(tokens.as_str()) {
        return Some((phrase, Some(date)));
    }
    let first = tokens.as_str().split_whitespace().next()?;
    match parse_date(first) {
        Some(date) if first.len() < tokens.as_str().len() => {
            Some((phrase.start..tokens.start() + first.len(), Some(date)))
        }
        _ => Some((phrase, None)),
    }
}

fn parse_line(line: &str) -> ParsedTask {
    let clean = strip_markers(line);
    let mut task = ParsedTask {
        original_line: Some(line.trim_end_matches('\r').to_string()),
        ..ParsedTask::default()
    };

    let Some((phrase, due_date)) = find_due_phrase(clean) else {
        task.text = clean.to_string();
        return task;
    };
    task.due_date = due_date;
    let before = clean[..phrase.start].trim_end();
    let after = clean[phrase.end..].trim_start();
    task.text = match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{} {}", before, after),
        (false, true) => before.to_string(),
        _ => after.to_string(),
    };
    task
}
