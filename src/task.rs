//! Task records and the record store.
//!
//! The whole collection is serialized as one JSON array into a single slot of
//! a [`SlotStore`]. Every mutation rewrites the entire slot, so each write is
//! O(n) in the number of tasks. That is a known scalability ceiling, fine for
//! a personal list; incremental persistence would be a separate change.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::SlotStore;

/// Maximum task text length, in UTF-16 code units
pub const MAX_TEXT_LEN: usize = 200;

/// Schema version written on every record
pub const TASK_SCHEMA_VERSION: u32 = 2;

/// Slot keys used by earlier releases, newest first
pub const LEGACY_KEYS: [&str; 2] = ["todo_app_pro_v4", "pro_todo_v2"];

fn current_schema_version() -> u32 {
    TASK_SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

/// Input for [`RecordStore::add`]
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub text: String,
    pub due_date: Option<DateTime<Utc>>,
    pub attachment_ref: Option<String>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    Active,
    Completed,
}

impl FilterMode {
    pub fn matches(self, task: &TaskRecord) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::Active => !task.completed,
            FilterMode::Completed => task.completed,
        }
    }
}

impl FromStr for FilterMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(FilterMode::All),
            "active" | "todo" => Ok(FilterMode::Active),
            "completed" | "done" => Ok(FilterMode::Completed),
            other => Err(Error::InvalidArgument(format!(
                "invalid filter '{other}': must be all, active, or completed"
            ))),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMode::All => "all",
            FilterMode::Active => "active",
            FilterMode::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    #[default]
    InsertionOrder,
    Alphabetical,
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insertion" | "insertion-order" | "default" | "newest" => Ok(SortMode::InsertionOrder),
            "alphabetical" | "alpha" | "a-z" => Ok(SortMode::Alphabetical),
            other => Err(Error::InvalidArgument(format!(
                "invalid sort '{other}': must be insertion-order or alphabetical"
            ))),
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortMode::InsertionOrder => "insertion-order",
            SortMode::Alphabetical => "alphabetical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
}

/// Inline image found in a legacy record, waiting to move into the blob store
#[derive(Debug, Clone)]
pub struct LegacyImage {
    pub task_id: String,
    pub bytes: Vec<u8>,
}

/// Trim and length-check task text
pub fn validate_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("task text must not be empty".to_string()));
    }
    let units = trimmed.encode_utf16().count();
    if units > MAX_TEXT_LEN {
        return Err(Error::Validation(format!(
            "task text is {units} characters long (max {MAX_TEXT_LEN})"
        )));
    }
    Ok(trimmed.to_string())
}

/// Parse a due date as typed by a user or stored by an older release
pub fn parse_due_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Deterministic, total ordering for the alphabetical projection
fn alphabetical(left: &TaskRecord, right: &TaskRecord) -> Ordering {
    left.text
        .cmp(&right.text)
        .then_with(|| right.created_at.cmp(&left.created_at))
        .then_with(|| left.id.cmp(&right.id))
}

/// Apply a filter and sort to a snapshot of records
pub fn project(tasks: &[TaskRecord], filter: FilterMode, sort: SortMode) -> Vec<TaskRecord> {
    let mut selected: Vec<TaskRecord> = tasks
        .iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    match sort {
        SortMode::Alphabetical => selected.sort_by(alphabetical),
        // Stable: equal timestamps keep insertion order.
        SortMode::InsertionOrder => selected.sort_by(|l, r| r.created_at.cmp(&l.created_at)),
    }
    selected
}

pub struct RecordStore {
    slots: Box<dyn SlotStore>,
    key: String,
    tasks: Vec<TaskRecord>,
    legacy_images: Vec<LegacyImage>,
    migrated_from: Option<&'static str>,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("key", &self.key)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl RecordStore {
    /// Load the collection from `key`, migrating legacy slots if needed
    ///
    /// Never fails: unreadable or malformed data degrades to an empty list
    /// and is logged.
    pub fn load(slots: Box<dyn SlotStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let mut store = Self {
            slots,
            key,
            tasks: Vec::new(),
            legacy_images: Vec::new(),
            migrated_from: None,
        };

        match store.slots.get(&store.key) {
            Ok(Some(raw)) => {
                let (tasks, images, _) = decode_collection(&raw, &store.key);
                store.tasks = tasks;
                store.legacy_images = images;
            }
            Ok(None) => store.load_legacy(),
            Err(err) => {
                tracing::warn!(key = %store.key, error = %err, "task slot unreadable; starting empty");
            }
        }

        store
    }

    fn load_legacy(&mut self) {
        for legacy_key in LEGACY_KEYS {
            if legacy_key == self.key {
                continue;
            }
            let raw = match self.slots.get(legacy_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = legacy_key, error = %err, "legacy slot unreadable");
                    continue;
                }
            };

            let (tasks, images, parsed) = decode_collection(&raw, legacy_key);
            if !parsed {
                continue;
            }
            tracing::info!(
                from = legacy_key,
                to = %self.key,
                tasks = tasks.len(),
                "migrating legacy task slot"
            );
            self.tasks = tasks;
            self.legacy_images = images;

            match self.persist() {
                Ok(()) => self.migrated_from = Some(legacy_key),
                Err(err) => {
                    tracing::warn!(error = %err, "migrated tasks kept in memory only");
                }
            }
            return;
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.tasks)?;
        self.slots.set(&self.key, &json)
    }

    /// Snapshot of every record, newest first
    pub fn get_all(&self) -> Vec<TaskRecord> {
        self.tasks.clone()
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.iter().find(|task| task.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Resolve a full id or a unique id prefix
    pub fn resolve_id(&self, input: &str) -> Result<String> {
        let needle = input.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::InvalidArgument("task id must not be empty".to_string()));
        }
        if let Some(task) = self.tasks.iter().find(|task| task.id == needle) {
            return Ok(task.id.clone());
        }
        let mut matches = self.tasks.iter().filter(|task| task.id.starts_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(Error::AmbiguousTaskId(input.to_string())),
            (None, _) => Err(Error::TaskNotFound(input.to_string())),
        }
    }

    /// Validate, prepend and persist a new record
    ///
    /// If the write fails the collection is restored to its previous state.
    pub fn add(&mut self, draft: TaskDraft) -> Result<TaskRecord> {
        let text = validate_text(&draft.text)?;
        let record = TaskRecord {
            schema_version: TASK_SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            text,
            completed: false,
            created_at: Utc::now(),
            due_date: draft.due_date,
            attachment_ref: draft.attachment_ref,
        };

        self.tasks.insert(0, record.clone());
        if let Err(err) = self.persist() {
            self.tasks.remove(0);
            return Err(err);
        }

        tracing::debug!(id = %record.id, "task added");
        Ok(record)
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Remove a record; a failed write still leaves it removed in memory
    pub fn remove(&mut self, id: &str) -> Result<TaskRecord> {
        let index = self.position(id)?;
        let removed = self.tasks.remove(index);
        self.persist()?;
        Ok(removed)
    }

    /// Flip the completion flag; a failed write keeps the flip in memory
    pub fn toggle_completed(&mut self, id: &str) -> Result<TaskRecord> {
        let index = self.position(id)?;
        self.tasks[index].completed = !self.tasks[index].completed;
        let updated = self.tasks[index].clone();
        self.persist()?;
        Ok(updated)
    }

    pub fn update_text(&mut self, id: &str, new_text: &str) -> Result<TaskRecord> {
        let text = validate_text(new_text)?;
        let index = self.position(id)?;
        self.tasks[index].text = text;
        let updated = self.tasks[index].clone();
        self.persist()?;
        Ok(updated)
    }

    /// Link an attachment to a record that has none
    pub fn set_attachment(&mut self, id: &str, blob_id: &str) -> Result<TaskRecord> {
        let index = self.position(id)?;
        if let Some(existing) = &self.tasks[index].attachment_ref {
            return Err(Error::InvalidArgument(format!(
                "task {id} already has attachment {existing}"
            )));
        }
        self.tasks[index].attachment_ref = Some(blob_id.to_string());
        let updated = self.tasks[index].clone();
        self.persist()?;
        Ok(updated)
    }

    /// Drop every completed record and return what was dropped
    pub fn clear_completed(&mut self) -> Result<Vec<TaskRecord>> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.tasks.drain(..).partition(|task| task.completed);
        self.tasks = kept;
        self.persist()?;
        Ok(removed)
    }

    pub fn query(&self, filter: FilterMode, sort: SortMode) -> Vec<TaskRecord> {
        project(&self.tasks, filter, sort)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            total: self.tasks.len(),
            completed: self.tasks.iter().filter(|task| task.completed).count(),
        }
    }

    /// Inline images found during migration, handed over once
    pub fn take_legacy_images(&mut self) -> Vec<LegacyImage> {
        std::mem::take(&mut self.legacy_images)
    }

    /// Legacy slot the collection was migrated from during `load`
    pub fn migrated_from(&self) -> Option<&'static str> {
        self.migrated_from
    }

    /// Drop the legacy slot once everything in it has been carried over
    pub fn finish_migration(&mut self) -> Result<()> {
        if let Some(legacy_key) = self.migrated_from.take() {
            self.slots.remove(legacy_key)?;
            tracing::info!(key = legacy_key, "removed legacy task slot");
        }
        Ok(())
    }
}

/// Decode a slot into records; the flag reports whether the JSON was usable
fn decode_collection(raw: &str, key: &str) -> (Vec<TaskRecord>, Vec<LegacyImage>, bool) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key, error = %err, "malformed task slot; starting empty");
            return (Vec::new(), Vec::new(), false);
        }
    };
    let Value::Array(entries) = value else {
        tracing::warn!(key, "task slot is not an array; starting empty");
        return (Vec::new(), Vec::new(), false);
    };

    let now = Utc::now();
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(entries.len());
    let mut images = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match normalize_entry(entry, now) {
            Some((mut record, image)) => {
                if !seen.insert(record.id.clone()) {
                    tracing::warn!(key, id = %record.id, "duplicate task id; assigning a new one");
                    record.id = Uuid::new_v4().to_string();
                    seen.insert(record.id.clone());
                }
                if let Some(bytes) = image {
                    images.push(LegacyImage {
                        task_id: record.id.clone(),
                        bytes,
                    });
                }
                tasks.push(record);
            }
            None => tracing::warn!(key, index, "skipping unreadable task entry"),
        }
    }
    (tasks, images, true)
}

/// Turn any stored task shape into the current record shape
fn normalize_entry(entry: &Value, now: DateTime<Utc>) -> Option<(TaskRecord, Option<Vec<u8>>)> {
    let object = entry.as_object()?;

    let text = object.get("text")?.as_str()?.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let (id, id_millis) = match object.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => (id.trim().to_lowercase(), None),
        Some(Value::Number(number)) => (Uuid::new_v4().to_string(), number.as_i64()),
        _ => (Uuid::new_v4().to_string(), None),
    };

    let completed = ["completed", "isCompleted", "done"]
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_bool))
        .unwrap_or(false);

    let created_at = object
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(parse_due_date)
        .or_else(|| id_millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
        .unwrap_or(now);

    let due_date = match object.get("dueDate") {
        Some(Value::String(raw)) => {
            let parsed = parse_due_date(raw);
            if parsed.is_none() && !raw.trim().is_empty() {
                tracing::warn!(due_date = %raw, "dropping unparseable due date");
            }
            parsed
        }
        _ => None,
    };

    let attachment_ref = ["attachmentRef", "file"]
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let image = object
        .get("image")
        .and_then(Value::as_str)
        .and_then(decode_data_url);

    let record = TaskRecord {
        schema_version: TASK_SCHEMA_VERSION,
        id,
        text,
        completed,
        created_at,
        due_date,
        attachment_ref,
    };
    Some((record, image))
}

/// Decode a `data:<mime>;base64,<payload>` URL
fn decode_data_url(value: &str) -> Option<Vec<u8>> {
    let rest = value.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!(error = %err, "dropping undecodable inline image");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySlotStore;
    use std::sync::Arc;

    const KEY: &str = "tasks";

    /// Slot store shared between the record store and the test body
    struct Shared(Arc<MemorySlotStore>);

    impl SlotStore for Shared {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key)
        }
    }

    fn store_with(slots: &Arc<MemorySlotStore>) -> RecordStore {
        RecordStore::load(Box::new(Shared(Arc::clone(slots))), KEY)
    }

    fn record(id: &str, text: &str, created_at: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            schema_version: TASK_SCHEMA_VERSION,
            id: id.to_string(),
            text: text.to_string(),
            completed: false,
            created_at,
            due_date: None,
            attachment_ref: None,
        }
    }

    #[test]
    fn validate_text_trims_and_counts_utf16_units() {
        assert_eq!(validate_text("  milk ").unwrap(), "milk");
        assert!(matches!(validate_text("   "), Err(Error::Validation(_))));
        assert!(validate_text(&"a".repeat(200)).is_ok());
        assert!(matches!(validate_text(&"a".repeat(201)), Err(Error::Validation(_))));
        // Astral characters take two units each
        assert!(validate_text(&"😀".repeat(100)).is_ok());
        assert!(validate_text(&"😀".repeat(101)).is_err());
    }

    #[test]
    fn add_prepends_and_persists() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        let first = store.add(TaskDraft::new("first")).unwrap();
        let second = store.add(TaskDraft::new("  second ")).unwrap();

        assert_eq!(second.text, "second");
        let all = store.get_all();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        let reloaded = store_with(&slots);
        assert_eq!(reloaded.get_all(), all);
    }

    #[test]
    fn add_rolls_back_when_quota_exceeded() {
        let slots = Arc::new(MemorySlotStore::with_quota(400));
        let mut store = store_with(&slots);
        store.add(TaskDraft::new("fits")).unwrap();

        let err = store.add(TaskDraft::new("x".repeat(200))).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(store.len(), 1);
        assert_eq!(store_with(&slots).len(), 1);
    }

    #[test]
    fn toggle_keeps_memory_state_when_write_fails() {
        let slots = Arc::new(MemorySlotStore::with_quota(250));
        let mut store = store_with(&slots);
        let task = store.add(TaskDraft::new("x".repeat(60))).unwrap();

        // Toggling shortens the JSON by one byte; leave even less room than that.
        let current = serde_json::to_string(&store.get_all()).unwrap().len();
        slots.insert_raw("other", &"y".repeat(252 - current));
        let err = store.toggle_completed(&task.id).unwrap_err();
        assert!(err.is_quota());
        assert!(store.get(&task.id).unwrap().completed);
    }

    #[test]
    fn unknown_ids_are_reported_without_changes() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        store.add(TaskDraft::new("keep")).unwrap();

        assert!(matches!(store.remove("nope"), Err(Error::TaskNotFound(_))));
        assert!(matches!(store.toggle_completed("nope"), Err(Error::TaskNotFound(_))));
        assert!(matches!(store.update_text("nope", "x"), Err(Error::TaskNotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_text_validates() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        let task = store.add(TaskDraft::new("old")).unwrap();

        assert!(matches!(store.update_text(&task.id, " "), Err(Error::Validation(_))));
        let updated = store.update_text(&task.id, " new ").unwrap();
        assert_eq!(updated.text, "new");
        assert_eq!(updated.created_at, task.created_at);
    }

    #[test]
    fn clear_completed_returns_removed() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        let a = store.add(TaskDraft::new("a")).unwrap();
        store.add(TaskDraft::new("b")).unwrap();
        store.toggle_completed(&a.id).unwrap();

        let removed = store.clear_completed().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, a.id);
        assert_eq!(store.stats(), TaskStats { total: 1, completed: 0 });
    }

    #[test]
    fn insertion_sort_is_newest_first_and_stable_on_ties() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let tasks = vec![record("b", "tie-1", t0), record("a", "tie-2", t0), record("c", "new", t1)];

        let ids: Vec<_> = project(&tasks, FilterMode::All, SortMode::InsertionOrder)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn alphabetical_sort_breaks_ties_deterministically() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let tasks = vec![
            record("2", "same", t0),
            record("1", "same", t0),
            record("3", "same", t1),
            record("4", "Apple", t0),
            record("5", "apple", t0),
        ];

        let ids: Vec<_> = project(&tasks, FilterMode::All, SortMode::Alphabetical)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["4", "5", "3", "1", "2"]);
    }

    #[test]
    fn resolve_id_accepts_unique_prefix() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        let task = store.add(TaskDraft::new("one")).unwrap();

        assert_eq!(store.resolve_id(&task.id[..8]).unwrap(), task.id);
        assert_eq!(store.resolve_id(&task.id.to_uppercase()).unwrap(), task.id);
        assert!(matches!(store.resolve_id("zzzz"), Err(Error::TaskNotFound(_))));
    }

    #[test]
    fn malformed_slot_loads_empty() {
        let slots = Arc::new(MemorySlotStore::new());
        slots.insert_raw(KEY, "{not json");
        assert!(store_with(&slots).is_empty());

        slots.insert_raw(KEY, "{\"tasks\": []}");
        assert!(store_with(&slots).is_empty());
    }

    #[test]
    fn migrates_v4_shape() {
        let slots = Arc::new(MemorySlotStore::new());
        slots.insert_raw(
            "todo_app_pro_v4",
            r#"[{"id":"3F2504E0-4F89-11D3-9A0C-0305E82C3301","text":"Pay rent","isCompleted":true,
                 "createdAt":"2024-03-01T10:00:00.000Z","dueDate":"2024-03-05T09:30","file":"img-1"}]"#,
        );

        let store = store_with(&slots);
        let task = &store.get_all()[0];
        assert_eq!(task.id, "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
        assert!(task.completed);
        assert_eq!(task.attachment_ref.as_deref(), Some("img-1"));
        assert_eq!(task.due_date, Some(Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()));
        assert_eq!(task.schema_version, TASK_SCHEMA_VERSION);

        // Written under the current key; legacy slot kept until finished
        assert!(slots.get(KEY).unwrap().is_some());
        assert_eq!(store.migrated_from(), Some("todo_app_pro_v4"));
        assert!(slots.get("todo_app_pro_v4").unwrap().is_some());

        let mut store = store;
        store.finish_migration().unwrap();
        assert!(slots.get("todo_app_pro_v4").unwrap().is_none());
        assert!(store_with(&slots).migrated_from().is_none());
    }

    #[test]
    fn migrates_v2_shape_with_inline_image() {
        let slots = Arc::new(MemorySlotStore::new());
        slots.insert_raw(
            "pro_todo_v2",
            r#"[{"id":1709287200000,"text":"Old","done":false,"image":"data:image/png;base64,AQI=","dueDate":null},
                {"id":1709287100000,"text":"   ","done":true}]"#,
        );

        let mut store = store_with(&slots);
        assert_eq!(store.len(), 1);
        let task = store.get_all().remove(0);
        assert!(Uuid::parse_str(&task.id).is_ok());
        assert_eq!(task.created_at, Utc.timestamp_millis_opt(1709287200000).unwrap());
        assert!(task.attachment_ref.is_none());

        let images = store.take_legacy_images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].task_id, task.id);
        assert_eq!(images[0].bytes, vec![1, 2]);
        assert!(store.take_legacy_images().is_empty());
    }

    #[test]
    fn set_attachment_refuses_to_replace() {
        let slots = Arc::new(MemorySlotStore::new());
        let mut store = store_with(&slots);
        let task = store.add(TaskDraft::new("pic")).unwrap();

        store.set_attachment(&task.id, "blob-1").unwrap();
        assert!(matches!(
            store.set_attachment(&task.id, "blob-2"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.get(&task.id).unwrap().attachment_ref.as_deref(), Some("blob-1"));
    }

    #[test]
    fn parse_due_date_accepts_common_forms() {
        assert!(parse_due_date("2024-05-01T10:00:00Z").is_some());
        assert!(parse_due_date("2024-05-01T10:00").is_some());
        assert!(parse_due_date("2024-05-01").is_some());
        assert!(parse_due_date("tomorrow").is_none());
        assert!(parse_due_date("").is_none());
    }
}
