//! Submission gateway: validate, create the task record, enqueue.

use crate::error::{Error, Result};
use crate::store::NewTask;
use crate::types::{DownloadOptions, Event, TaskId};

use super::NovelDownloader;

/// Maximum accepted work id length, matching the submission schema
const MAX_WORK_ID_LEN: usize = 50;

/// Reject malformed submissions before any record exists
fn validate_submission(work_id: &str, options: &DownloadOptions) -> Result<()> {
    if work_id.is_empty() || work_id.len() > MAX_WORK_ID_LEN {
        return Err(Error::validation(
            "work_id",
            format!("work_id must be 1-{MAX_WORK_ID_LEN} characters"),
        ));
    }
    if !work_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(
            "work_id",
            "work_id may only contain ASCII letters, digits, '-' and '_'",
        ));
    }

    if let Some(start) = options.start_chapter
        && start == 0
    {
        return Err(Error::validation("start_chapter", "chapters are 1-based"));
    }
    if let Some(end) = options.end_chapter
        && end == 0
    {
        return Err(Error::validation("end_chapter", "chapters are 1-based"));
    }
    if let (Some(start), Some(end)) = (options.start_chapter, options.end_chapter)
        && start > end
    {
        return Err(Error::validation(
            "end_chapter",
            "end_chapter must not precede start_chapter",
        ));
    }

    Ok(())
}

impl NovelDownloader {
    /// Submit a download request
    ///
    /// Validates the request, creates the task record in `pending`, and
    /// enqueues a message referencing it. The record is durable before the
    /// message becomes visible, so a worker that dequeues immediately can
    /// always resolve the task.
    ///
    /// If the enqueue fails after the record was created, the task is marked
    /// failed with an enqueue reason instead of being left as an orphaned
    /// `pending` record, and the error is returned to the caller.
    pub async fn submit(
        &self,
        owner_id: &str,
        work_id: &str,
        options: DownloadOptions,
    ) -> Result<TaskId> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        validate_submission(work_id, &options)?;

        let task_id = TaskId::generate();
        self.store
            .insert_task(&NewTask {
                task_id,
                work_id,
                owner_id,
                options: &options,
            })
            .await?;

        if let Err(e) = self.queue.enqueue(task_id).await {
            let reason = e.to_string();
            tracing::error!(
                task_id = %task_id,
                work_id,
                error = %reason,
                "Enqueue failed after task creation, marking task failed"
            );
            self.store.mark_enqueue_failed(task_id, &reason).await?;
            return Err(Error::Enqueue { task_id, reason });
        }

        tracing::info!(task_id = %task_id, work_id, owner_id, "Task submitted");
        self.emit_event(Event::TaskQueued {
            task_id,
            work_id: work_id.to_string(),
        });

        Ok(task_id)
    }
}
