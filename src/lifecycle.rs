//! Task service: keeps records and their attachment blobs in step.
//!
//! Ordering rules:
//! - create: the blob is written and committed before the record that
//!   references it; a failed blob write aborts the creation.
//! - remove / clear: blobs are deleted before their records. A failed blob
//!   delete never blocks the record delete; it is logged and reported.
//! - edit: attachments are immutable, nothing to coordinate.
//!
//! There is no rollback across the two stores. A record write that fails
//! after its blob committed leaves an orphaned blob, which
//! [`TaskService::sweep_orphans`] reclaims.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::blob::{BlobLease, BlobStore};
use crate::error::{Error, Result};
use crate::task::{validate_text, FilterMode, RecordStore, SortMode, TaskDraft, TaskRecord, TaskStats};

/// A blob that could not be deleted alongside its task
#[derive(Debug, Clone, Serialize)]
pub struct BlobCleanupFailure {
    pub task_id: String,
    pub blob_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalReport {
    pub removed: Vec<String>,
    pub blobs_deleted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blob_failures: Vec<BlobCleanupFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdoptionReport {
    pub adopted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

#[derive(Debug)]
pub struct TaskService {
    records: RecordStore,
    blobs: Arc<BlobStore>,
}

impl TaskService {
    pub fn new(records: RecordStore, blobs: Arc<BlobStore>) -> Self {
        Self { records, blobs }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Create a task, storing its attachment first
    pub async fn create_task(
        &mut self,
        text: &str,
        due_date: Option<DateTime<Utc>>,
        attachment: Option<&[u8]>,
    ) -> Result<TaskRecord> {
        // Reject bad text before any bytes are written.
        validate_text(text)?;

        let attachment_ref = match attachment {
            Some(bytes) => Some(self.blobs.save_image(bytes).await?),
            None => None,
        };

        let draft = TaskDraft {
            text: text.to_string(),
            due_date,
            attachment_ref: attachment_ref.clone(),
        };
        self.records.add(draft).map_err(|err| {
            if let Some(blob_id) = &attachment_ref {
                tracing::warn!(blob_id = %blob_id, error = %err, "task write failed; attachment left orphaned");
            }
            err
        })
    }

    /// Delete a task and its attachment
    pub async fn remove_task(&mut self, id: &str) -> Result<RemovalReport> {
        let id = self.records.resolve_id(id)?;
        let mut report = RemovalReport::default();
        if let Some(task) = self.records.get(&id) {
            self.delete_attachment(&task, &mut report).await;
        }
        let removed = self.records.remove(&id)?;
        report.removed.push(removed.id);
        Ok(report)
    }

    /// Delete every completed task and its attachment
    pub async fn clear_completed(&mut self) -> Result<RemovalReport> {
        let mut report = RemovalReport::default();
        let completed = self.records.query(FilterMode::Completed, SortMode::InsertionOrder);
        for task in &completed {
            self.delete_attachment(task, &mut report).await;
        }
        let removed = self.records.clear_completed()?;
        report.removed = removed.into_iter().map(|task| task.id).collect();
        Ok(report)
    }

    async fn delete_attachment(&self, task: &TaskRecord, report: &mut RemovalReport) {
        let Some(blob_id) = &task.attachment_ref else {
            return;
        };
        match self.blobs.delete_image(blob_id).await {
            Ok(()) => report.blobs_deleted += 1,
            Err(err) => {
                tracing::warn!(task_id = %task.id, blob_id = %blob_id, error = %err, "attachment cleanup failed");
                report.blob_failures.push(BlobCleanupFailure {
                    task_id: task.id.clone(),
                    blob_id: blob_id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    pub fn toggle(&mut self, id: &str) -> Result<TaskRecord> {
        let id = self.records.resolve_id(id)?;
        self.records.toggle_completed(&id)
    }

    pub fn update_text(&mut self, id: &str, text: &str) -> Result<TaskRecord> {
        let id = self.records.resolve_id(id)?;
        self.records.update_text(&id, text)
    }

    pub fn get(&self, id: &str) -> Result<TaskRecord> {
        let id = self.records.resolve_id(id)?;
        self.records
            .get(&id)
            .ok_or(Error::TaskNotFound(id))
    }

    pub fn query(&self, filter: FilterMode, sort: SortMode) -> Vec<TaskRecord> {
        self.records.query(filter, sort)
    }

    pub fn stats(&self) -> TaskStats {
        self.records.stats()
    }

    /// Lease the attachment of a task, if it has one still stored
    pub async fn image(&self, id: &str) -> Result<Option<BlobLease>> {
        let task = self.get(id)?;
        match &task.attachment_ref {
            Some(blob_id) => self.blobs.get_image(blob_id).await,
            None => Ok(None),
        }
    }

    pub fn release(&self, lease: &BlobLease) -> bool {
        self.blobs.release(lease)
    }

    /// Delete blobs that no task references
    pub async fn sweep_orphans(&self) -> Result<Vec<String>> {
        let referenced: HashSet<String> = self
            .records
            .get_all()
            .into_iter()
            .filter_map(|task| task.attachment_ref)
            .collect();

        let mut swept = Vec::new();
        for blob_id in self.blobs.list_ids().await? {
            if referenced.contains(&blob_id) {
                continue;
            }
            self.blobs.delete_image(&blob_id).await?;
            swept.push(blob_id);
        }
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "swept orphaned attachments");
        }
        Ok(swept)
    }

    /// Move inline images from migrated records into the blob store
    pub async fn adopt_legacy_images(&mut self) -> AdoptionReport {
        let mut report = AdoptionReport::default();
        for image in self.records.take_legacy_images() {
            let outcome = match self.blobs.save_image(&image.bytes).await {
                Ok(blob_id) => self
                    .records
                    .set_attachment(&image.task_id, &blob_id)
                    .map(|_| ()),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => report.adopted += 1,
                Err(err) => {
                    tracing::warn!(task_id = %image.task_id, error = %err, "legacy image not adopted");
                    report.failed.push(image.task_id);
                }
            }
        }

        if report.failed.is_empty() {
            if let Err(err) = self.records.finish_migration() {
                tracing::warn!(error = %err, "legacy task slot left in place");
            }
        } else if let Some(legacy_key) = self.records.migrated_from() {
            tracing::warn!(key = legacy_key, "keeping legacy task slot; some images were not adopted");
        }
        report
    }
}
