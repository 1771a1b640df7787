//! Dead-letter monitoring and the operator drain/replay surface.
//!
//! The queue routes a message to the dead-letter channel on its own; the
//! monitor handles the bookkeeping half of that transition, marking the
//! task `dead_lettered` so status polls see the quarantine.

use crate::error::Result;
use crate::queue::DeadLetter;
use crate::types::{Event, TaskId};

use super::NovelDownloader;

impl NovelDownloader {
    /// Spawn the monitor that mirrors dead-letter routing into the task store
    pub(crate) fn spawn_dead_letter_monitor(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move {
            loop {
                let notices = tokio::select! {
                    _ = downloader.shutdown.cancelled() => break,
                    notices = downloader.queue.wait_dead_letter_notices() => notices,
                };

                for task_id in notices {
                    downloader.mark_dead_lettered(task_id).await;
                }
            }
            tracing::debug!("Dead-letter monitor stopped");
        })
    }

    async fn mark_dead_lettered(&self, task_id: TaskId) {
        match self.store.try_mark_dead_lettered(task_id).await {
            Ok(true) => {
                tracing::warn!(task_id = %task_id, "Task dead-lettered after exhausting retries");
                self.emit_event(Event::TaskDeadLettered { task_id });
            }
            Ok(false) => {
                // The task finished (e.g., a slow worker succeeded) after the
                // message was routed; the terminal state wins
                tracing::info!(
                    task_id = %task_id,
                    "Dead-letter routing ignored for already-terminal task"
                );
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to mark task dead-lettered");
            }
        }
    }

    /// List quarantined messages awaiting operator attention
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters().await
    }

    /// Re-enqueue a dead-lettered task with a fresh receive budget
    ///
    /// Returns false when no dead-lettered message exists for the task. The
    /// record is reopened to a retryable `failed` state before the message
    /// becomes visible, so the next delivery claims it through the normal
    /// conditional write and the task resumes through `running` (never
    /// `pending`).
    pub async fn replay_dead_letter(&self, task_id: TaskId) -> Result<bool> {
        if !self.store.try_reopen_dead_lettered(task_id).await? {
            return Ok(false);
        }

        if self.queue.replay_dead_letter(task_id).await {
            tracing::info!(task_id = %task_id, "Dead-lettered task replayed");
            return Ok(true);
        }

        // The record was reopened but no quarantined message existed (expired
        // out of retention, or already replayed); put the quarantine back so
        // the record doesn't claim progress it cannot make
        self.store.try_mark_dead_lettered(task_id).await?;
        Ok(false)
    }
}
