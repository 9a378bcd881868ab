//! iCalendar export for tasks with a due date.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::task::TaskRecord;

const EVENT_LENGTH_MINUTES: i64 = 60;
const FILE_STEM_MAX: usize = 20;

fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// RFC 5545 TEXT escaping
fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// Build a one-event VCALENDAR for `task`
pub fn to_ics(task: &TaskRecord, now: DateTime<Utc>) -> Result<String> {
    let start = task.due_date.ok_or_else(|| {
        Error::InvalidArgument(format!("task {} has no due date", task.id))
    })?;
    let end = start + Duration::minutes(EVENT_LENGTH_MINUTES);

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//td//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@td", task.id),
        format!("DTSTAMP:{}", format_stamp(now)),
        format!("DTSTART:{}", format_stamp(start)),
        format!("DTEND:{}", format_stamp(end)),
        format!("SUMMARY:{}", escape_text(&task.text)),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    let mut payload = lines.join("\r\n");
    payload.push_str("\r\n");
    Ok(payload)
}

/// Download-safe file name for a task's calendar entry
pub fn file_name(task: &TaskRecord) -> String {
    let stem: String = task
        .text
        .chars()
        .take(FILE_STEM_MAX)
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim();
    if stem.is_empty() {
        "task-new.ics".to_string()
    } else {
        format!("task-{stem}.ics")
    }
}
