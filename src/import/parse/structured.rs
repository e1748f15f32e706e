//! JSON parser: one object, or an array of objects, one task each.

use serde_json::{Map, Value};

use super::dates::{date_from_epoch_millis, parse_date};
use super::{ParseError, ParsedTask};

const TEXT_KEYS: &[&str] = &["title", "task", "text", "name"];
const DESCRIPTION_KEYS: &[&str] = &["description", "notes"];
const DUE_KEYS: &[&str] = &["dueDate", "due_date", "deadline"];
const COMPLETED_KEYS: &[&str] = &["completed", "done", "finished"];

/// Length of the fallback text taken from the serialized record.
const DUMP_CHARS: usize = 50;

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// First truthy value among `keys`, in order.
fn first_truthy<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| is_truthy(value))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn dump(value: &Value) -> String {
    value.to_string().chars().take(DUMP_CHARS).collect()
}

fn due_date(value: &Value) -> Option<chrono::NaiveDate> {
    match value {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n.as_i64().and_then(date_from_epoch_millis),
        _ => None,
    }
}

fn parse_record(value: &Value) -> Result<ParsedTask, ParseError> {
    let object = match value {
        Value::Object(object) => object,
        Value::Null => return Err(ParseError::NotAnObject),
        other => return Ok(ParsedTask::new(dump(other))),
    };

    Ok(ParsedTask {
        text: first_truthy(object, TEXT_KEYS)
            .map(as_text)
            .unwrap_or_else(|| dump(value)),
        description: first_truthy(object, DESCRIPTION_KEYS).map(as_text),
        due_date: first_truthy(object, DUE_KEYS).and_then(due_date),
        completed: first_truthy(object, COMPLETED_KEYS).is_some(),
        original_line: None,
    })
}

pub fn parse(content: &str) -> Result<Vec<ParsedTask>, ParseError> {
    let data: Value = serde_json::from_str(content)?;
    match &data {
        Value::Array(items) => items.iter().map(parse_record).collect(),
        single => Ok(vec![parse_record(single)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_array_of_objects() {
        let tasks = parse(r#"[{"task":"A"},{"title":"B","completed":true}]"#).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].text, "A");
        assert!(!tasks[0].completed);
        assert_eq!(tasks[1].text, "B");
        assert!(tasks[1].completed);
    }

    #[test]
    fn test_single_object() {
        let tasks = parse(
            r#"{"name":"Plan trip","notes":"book hotel","deadline":"2024-06-01","done":1}"#,
        )
        .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "Plan trip");
        assert_eq!(tasks[0].description.as_deref(), Some("book hotel"));
        assert_eq!(tasks[0].due_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert!(tasks[0].completed);
    }

    #[test]
    fn test_key_priority_skips_falsy() {
        let tasks = parse(r#"{"title":"","task":"second","text":"third"}"#).unwrap();
        assert_eq!(tasks[0].text, "second");
    }

    #[test]
    fn test_fallback_text_is_truncated_dump() {
        let tasks =
            parse(r#"{"priority":"high","owner":"somebody with a very long name indeed"}"#)
                .unwrap();
        assert_eq!(tasks[0].text.chars().count(), 50);
        assert!(tasks[0].text.starts_with('{'));
    }

    #[test]
    fn test_unparseable_due_dropped_silently() {
        let tasks = parse(r#"[{"task":"x","dueDate":"whenever"}]"#).unwrap();
        assert_eq!(tasks[0].due_date, None);
    }

    #[test]
    fn test_completion_truthiness() {
        let tasks = parse(
            r#"[{"task":"a","completed":false,"finished":"yes"},{"task":"b","done":0}]"#,
        )
        .unwrap();
        assert!(tasks[0].completed);
        assert!(!tasks[1].completed);
    }

    #[test]
    fn test_null_record_fails() {
        assert!(matches!(parse("[null]"), Err(ParseError::NotAnObject)));
    }
}
