//! Task store: durable task records over SQLite
//!
//! The store exclusively owns task rows. After creation, every worker-side
//! mutation goes through a conditional UPDATE keyed on the task id and the
//! expected prior state/attempt count, the pipeline's only concurrency
//! control. Methods on [`TaskStore`] are organized by domain:
//! - [`migrations`] — database lifecycle, schema migrations
//! - [`tasks`] — task CRUD and conditional state transitions
//! - [`works`] — work-keyed secondary index queries, reaper scans

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::types::{
    DownloadOptions, FailureKind, TaskError, TaskId, TaskState, TaskStatus, WorkSummary,
};

mod migrations;
mod tasks;
mod works;

/// New task to be inserted by the submission gateway
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    /// Pre-generated task id
    pub task_id: TaskId,
    /// Logical content unit to download
    pub work_id: &'a str,
    /// Submitter identity
    pub owner_id: &'a str,
    /// Caller-supplied parameters
    pub options: &'a DownloadOptions,
}

/// Task record from the database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task identifier
    pub task_id: TaskId,
    /// Logical content unit
    pub work_id: String,
    /// Submitter identity
    pub owner_id: String,
    /// Lifecycle state (see [`TaskState::from_db`])
    pub state: String,
    /// Delivery attempts consumed so far
    pub attempt_count: i64,
    /// Optional first chapter bound
    pub start_chapter: Option<i64>,
    /// Optional last chapter bound
    pub end_chapter: Option<i64>,
    /// Force-refresh flag (0/1)
    pub force_update: i64,
    /// Artifact key, set on success
    pub artifact_ref: Option<String>,
    /// SHA-256 hex digest of the artifact
    pub artifact_digest: Option<String>,
    /// Whether the reaper has deleted the artifact blob (0/1)
    pub artifact_reaped: i64,
    /// Last failure message
    pub error_message: Option<String>,
    /// Last failure classification (see [`FailureKind::from_db`])
    pub error_kind: Option<String>,
    /// Unix timestamp of submission (immutable)
    pub created_at: i64,
    /// Unix timestamp of the last mutation
    pub updated_at: i64,
}

impl TaskRow {
    /// Decoded lifecycle state
    pub fn task_state(&self) -> TaskState {
        TaskState::from_db(&self.state)
    }

    /// Decoded failure classification, if a failure was recorded
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error_kind.as_deref().map(FailureKind::from_db)
    }

    /// Caller-supplied options as submitted
    pub fn options(&self) -> DownloadOptions {
        DownloadOptions {
            start_chapter: self.start_chapter.map(|c| c as u32),
            end_chapter: self.end_chapter.map(|c| c as u32),
            force_update: self.force_update != 0,
        }
    }

    /// Whether the task has reached a state no worker may mutate
    ///
    /// Succeeded and dead-lettered tasks are always terminal; failed tasks
    /// are terminal unless the recorded failure was transient.
    pub fn is_terminal(&self) -> bool {
        match self.task_state() {
            TaskState::Succeeded | TaskState::DeadLettered => true,
            TaskState::Failed => !matches!(self.failure_kind(), Some(FailureKind::Transient)),
            TaskState::Pending | TaskState::Running => false,
        }
    }

    /// Persisted failure detail, if any
    pub fn error(&self) -> Option<TaskError> {
        let message = self.error_message.clone()?;
        Some(TaskError {
            message,
            kind: self.failure_kind().unwrap_or(FailureKind::Permanent),
        })
    }

    /// View returned by the status service
    pub fn to_status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id,
            work_id: self.work_id.clone(),
            state: self.task_state(),
            attempt_count: self.attempt_count.max(0) as u32,
            artifact_ref: self.artifact_ref.clone(),
            error: self.error(),
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        }
    }

    /// Compact view for work listings
    pub fn to_summary(&self) -> WorkSummary {
        WorkSummary {
            task_id: self.task_id,
            work_id: self.work_id.clone(),
            state: self.task_state(),
            artifact_ref: self.artifact_ref.clone(),
            created_at: timestamp_to_datetime(self.created_at),
        }
    }
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Task store handle for novel-dl
pub struct TaskStore {
    pool: SqlitePool,
}

#[cfg(test)]
impl TaskStore {
    /// Rewrite a row's timestamps so ordering/expiry tests don't need to
    /// sleep through real retention windows
    pub(crate) async fn backdate_for_test(
        &self,
        task_id: TaskId,
        created_at: i64,
        updated_at: i64,
    ) {
        #[allow(clippy::unwrap_used)]
        sqlx::query("UPDATE tasks SET created_at = ?, updated_at = ? WHERE task_id = ?")
            .bind(created_at)
            .bind(updated_at)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
