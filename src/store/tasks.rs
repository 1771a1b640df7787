//! Task CRUD and conditional state transitions.
//!
//! The `try_*` methods are compare-and-set writes: each succeeds only when
//! the row still matches the expected prior state and attempt count, and
//! reports the outcome as a bool. A `false` return tells the caller it lost
//! the race to another worker and must discard its result.

use crate::error::DatabaseError;
use crate::types::{FailureKind, TaskId};
use crate::{Error, Result};

use super::{NewTask, TaskRow, TaskStore};

const TASK_COLUMNS: &str = r#"
    task_id, work_id, owner_id, state, attempt_count,
    start_chapter, end_chapter, force_update,
    artifact_ref, artifact_digest, artifact_reaped,
    error_message, error_kind, created_at, updated_at
"#;

impl TaskStore {
    /// Insert a new task record in state `pending` with zero attempts
    pub async fn insert_task(&self, task: &NewTask<'_>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, work_id, owner_id, state, attempt_count,
                start_chapter, end_chapter, force_update,
                created_at, updated_at
            ) VALUES (?, ?, ?, 'pending', 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.task_id)
        .bind(task.work_id)
        .bind(task.owner_id)
        .bind(task.options.start_chapter.map(|c| c as i64))
        .bind(task.options.end_chapter.map(|c| c as i64))
        .bind(task.options.force_update as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a task by id
    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Get a task by id, scoped to its owner
    ///
    /// A task belonging to another owner is indistinguishable from a missing
    /// one.
    pub async fn get_task_for_owner(
        &self,
        owner_id: &str,
        task_id: TaskId,
    ) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ? AND task_id = ?"
        ))
        .bind(owner_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task for owner: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Claim a task for execution: transition to `running` and consume one
    /// attempt
    ///
    /// Conditioned on the attempt count the worker observed when it read the
    /// task, so two receivers of the same message can never both own an
    /// attempt. A task already terminally failed is never revived.
    pub async fn try_claim(&self, task_id: TaskId, expected_attempt: u32) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'running', attempt_count = attempt_count + 1, updated_at = ?
            WHERE task_id = ?
              AND attempt_count = ?
              AND state IN ('pending', 'running', 'failed')
              AND NOT (state = 'failed' AND error_kind IN ('permanent', 'enqueue'))
            "#,
        )
        .bind(now)
        .bind(task_id)
        .bind(expected_attempt as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record success: transition `running → succeeded` and attach the
    /// artifact
    ///
    /// Conditioned on the claiming attempt so a stale worker that lost its
    /// visibility window cannot overwrite a newer attempt's outcome.
    pub async fn try_complete(
        &self,
        task_id: TaskId,
        attempt: u32,
        artifact_ref: &str,
        artifact_digest: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'succeeded', artifact_ref = ?, artifact_digest = ?,
                error_message = NULL, error_kind = NULL, updated_at = ?
            WHERE task_id = ? AND state = 'running' AND attempt_count = ?
            "#,
        )
        .bind(artifact_ref)
        .bind(artifact_digest)
        .bind(now)
        .bind(task_id)
        .bind(attempt as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to complete task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failure: transition `running → failed` with a reason
    ///
    /// Same conditioning as [`try_complete`](Self::try_complete). Transient
    /// failures leave the task claimable by the next delivery; permanent
    /// failures are terminal.
    pub async fn try_fail(
        &self,
        task_id: TaskId,
        attempt: u32,
        message: &str,
        kind: FailureKind,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'failed', error_message = ?, error_kind = ?, updated_at = ?
            WHERE task_id = ? AND state = 'running' AND attempt_count = ?
            "#,
        )
        .bind(message)
        .bind(kind.as_str())
        .bind(now)
        .bind(task_id)
        .bind(attempt as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record task failure: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a freshly created task as failed because its queue message could
    /// not be sent
    ///
    /// Only applies to `pending` records so it cannot clobber a task a worker
    /// already claimed.
    pub async fn mark_enqueue_failed(&self, task_id: TaskId, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'failed', error_message = ?, error_kind = 'enqueue', updated_at = ?
            WHERE task_id = ? AND state = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark enqueue failure: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Quarantine a task whose message was routed to the dead-letter channel
    ///
    /// Never overwrites a success: a message can dead-letter after a slow
    /// worker already completed the task.
    pub async fn try_mark_dead_lettered(&self, task_id: TaskId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'dead_lettered', error_kind = 'dead_letter',
                error_message = COALESCE(error_message, 'retry budget exhausted'),
                updated_at = ?
            WHERE task_id = ? AND state NOT IN ('succeeded', 'dead_lettered')
            "#,
        )
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark task dead-lettered: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Reopen a dead-lettered task for operator replay
    ///
    /// Moves the task back to a retryable `failed` state so the replayed
    /// message's receiver can claim it through the normal conditional write.
    pub async fn try_reopen_dead_lettered(&self, task_id: TaskId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'failed', error_kind = 'transient', updated_at = ?
            WHERE task_id = ? AND state = 'dead_lettered'
            "#,
        )
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reopen dead-lettered task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record that the reaper deleted the task's artifact blob
    ///
    /// Leaves `updated_at` alone: the row still reports when the task itself
    /// last changed, and reaped rows drop out of future reaper scans via the
    /// flag.
    pub async fn mark_artifact_reaped(&self, task_id: TaskId) -> Result<()> {
        sqlx::query("UPDATE tasks SET artifact_reaped = 1 WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark artifact reaped: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
