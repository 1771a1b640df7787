//! Work-keyed secondary index queries and reaper scans.

use crate::error::DatabaseError;
use crate::types::TaskId;
use crate::{Error, Result};

use super::{TaskRow, TaskStore};

const TASK_COLUMNS: &str = r#"
    task_id, work_id, owner_id, state, attempt_count,
    start_chapter, end_chapter, force_update,
    artifact_ref, artifact_digest, artifact_reaped,
    error_message, error_kind, created_at, updated_at
"#;

impl TaskStore {
    /// All tasks for a content unit, newest first
    pub async fn list_tasks_for_work(&self, work_id: &str) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE work_id = ? ORDER BY created_at DESC, task_id"
        ))
        .bind(work_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks for work: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Most recent successful download of a work whose artifact is still on
    /// disk
    pub async fn latest_artifact_for_work(&self, work_id: &str) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE work_id = ? AND state = 'succeeded'
              AND artifact_ref IS NOT NULL AND artifact_reaped = 0
            ORDER BY created_at DESC, task_id
            LIMIT 1
            "#
        ))
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find latest artifact for work: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// A caller's recent tasks, newest first
    pub async fn list_tasks_for_owner(&self, owner_id: &str, limit: u32) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE owner_id = ?
            ORDER BY created_at DESC, task_id
            LIMIT ?
            "#
        ))
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks for owner: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Succeeded tasks whose artifacts are due for deletion
    ///
    /// An artifact is reapable when it is older than the current-artifact
    /// cutoff, or older than the superseded cutoff while a newer successful
    /// download of the same work exists. `updated_at` is the completion time.
    pub async fn list_reapable_artifacts(
        &self,
        current_cutoff: i64,
        superseded_cutoff: i64,
    ) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks t
            WHERE t.state = 'succeeded'
              AND t.artifact_ref IS NOT NULL
              AND t.artifact_reaped = 0
              AND (
                t.updated_at < ?
                OR (
                    t.updated_at < ?
                    AND EXISTS (
                        SELECT 1 FROM tasks n
                        WHERE n.work_id = t.work_id
                          AND n.state = 'succeeded'
                          AND n.created_at > t.created_at
                    )
                )
              )
            "#
        ))
        .bind(current_cutoff)
        .bind(superseded_cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list reapable artifacts: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Attempt counts for a set of tasks (diagnostics)
    pub async fn attempt_count(&self, task_id: TaskId) -> Result<Option<u32>> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT attempt_count FROM tasks WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read attempt count: {}",
                        e
                    )))
                })?;

        Ok(count.map(|c| c.max(0) as u32))
    }
}
