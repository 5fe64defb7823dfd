use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::blobs::{BlobHandle, BlobKey};
use crate::document::{PageRange, SourceDocument};

/// Time-ordered task identifier (UUIDv7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `pending → processing → {completed | failed}`. A pending task may
    /// also fail directly when its dispatch is abandoned.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// Partial update delivered to listeners on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_handle: Option<BlobHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<BlobKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    fn status(status: TaskStatus) -> Self {
        Self {
            status,
            output_handle: None,
            blob_key: None,
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self::status(TaskStatus::Pending)
    }

    pub fn processing() -> Self {
        Self::status(TaskStatus::Processing)
    }

    pub fn completed(handle: BlobHandle, key: BlobKey) -> Self {
        Self {
            output_handle: Some(handle),
            blob_key: Some(key),
            ..Self::status(TaskStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(TaskStatus::Failed)
        }
    }
}

/// One range's trip through extraction
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub source_document_id: Uuid,
    pub derived_file_name: String,
    pub range: PageRange,
    pub status: TaskStatus,
    pub output_handle: Option<BlobHandle>,
    pub blob_key: Option<BlobKey>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn pending(document: &SourceDocument, range: PageRange) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            source_document_id: document.id(),
            derived_file_name: document.derived_file_name(range),
            range,
            status: TaskStatus::Pending,
            output_handle: None,
            blob_key: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A task that still stands for its range: anything but failed.
    pub fn represents_range(&self) -> bool {
        self.status != TaskStatus::Failed
    }

    /// Apply `update` if the transition is legal; returns whether it was.
    pub(crate) fn apply(&mut self, update: &TaskUpdate) -> bool {
        if !self.status.can_transition_to(update.status) {
            return false;
        }
        self.status = update.status;
        if update.output_handle.is_some() {
            self.output_handle = update.output_handle.clone();
        }
        if update.blob_key.is_some() {
            self.blob_key = update.blob_key;
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        self.updated_at = Utc::now();
        true
    }
}
