//! Status service: owner-scoped reads of the task store.
//!
//! Pure reads, eventually consistent with worker writes. Callers poll; the
//! pipeline never pushes.

use crate::error::{BlobError, Error, Result};
use crate::types::{TaskId, TaskStatus, WorkSummary};

use super::NovelDownloader;

impl NovelDownloader {
    /// Look up a task's current state
    ///
    /// Fails with [`Error::NotFound`] when the task does not exist or belongs
    /// to another owner; the two cases are deliberately indistinguishable.
    pub async fn get_status(&self, owner_id: &str, task_id: TaskId) -> Result<TaskStatus> {
        let row = self
            .store
            .get_task_for_owner(owner_id, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        Ok(row.to_status())
    }

    /// A caller's recent tasks, newest first
    pub async fn list_works(&self, owner_id: &str, limit: u32) -> Result<Vec<WorkSummary>> {
        let rows = self.store.list_tasks_for_owner(owner_id, limit).await?;
        Ok(rows.iter().map(|r| r.to_summary()).collect())
    }

    /// Every recorded download of a content unit, newest first
    pub async fn work_history(&self, work_id: &str) -> Result<Vec<TaskStatus>> {
        let rows = self.store.list_tasks_for_work(work_id).await?;
        Ok(rows.iter().map(|r| r.to_status()).collect())
    }

    /// Fetch the artifact of a succeeded task
    ///
    /// Fails with [`Error::NotFound`] when the task is unknown to the owner,
    /// has not succeeded, or its artifact has been reaped.
    pub async fn get_artifact(&self, owner_id: &str, task_id: TaskId) -> Result<Vec<u8>> {
        let row = self
            .store
            .get_task_for_owner(owner_id, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        let key = match (&row.artifact_ref, row.artifact_reaped) {
            (Some(key), 0) => key.clone(),
            _ => return Err(Error::NotFound(format!("artifact for task {task_id}"))),
        };

        match self.blob.get(&key).await {
            Ok(data) => Ok(data),
            Err(BlobError::NotFound { .. }) => {
                Err(Error::NotFound(format!("artifact for task {task_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
