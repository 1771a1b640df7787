//! Worker: per-delivery execution state machine and worker run loops.
//!
//! Retry is owned by the queue, not the worker: a transient failure leaves
//! the message un-acknowledged so the visibility timeout redelivers it (or
//! the queue dead-letters it once the receive budget is spent). The worker
//! never loops in-process, so retry state survives a worker crash.

use rand::Rng;
use std::time::Duration;

use crate::blob::{artifact_key, sha256_hex};
use crate::error::{BlobError, Result, SourceError};
use crate::queue::Delivery;
use crate::source::FetchRequest;
use crate::store::TaskRow;
use crate::types::{Event, FailureKind};

use super::NovelDownloader;

/// What the worker loop should do with the delivery after processing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Acknowledge: delete the message
    Ack,
    /// Leave the message for the visibility timeout to redeliver
    Redeliver,
}

impl NovelDownloader {
    /// Spawn the configured number of independent worker loops
    pub(crate) fn spawn_worker_loops(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.worker.concurrency)
            .map(|worker_id| {
                let downloader = self.clone();
                tokio::spawn(async move { run_worker(downloader, worker_id).await })
            })
            .collect()
    }

    /// Process one delivery through the task state machine
    ///
    /// 1. Resolve the task; terminal tasks acknowledge immediately (handles
    ///    duplicate delivery of finished work).
    /// 2. Claim via conditional write keyed on the observed attempt count; a
    ///    lost claim means another receiver owns the attempt.
    /// 3. Execute and complete, classifying failures transient/permanent.
    pub(crate) async fn process_delivery(&self, delivery: &Delivery) -> Result<Disposition> {
        let task_id = delivery.task_id;

        let Some(row) = self.store.get_task(task_id).await? else {
            // A message without a record cannot make progress; acknowledging
            // keeps it from cycling into the dead-letter channel
            tracing::warn!(task_id = %task_id, "Received message for unknown task, dropping");
            return Ok(Disposition::Ack);
        };

        if row.is_terminal() {
            tracing::debug!(
                task_id = %task_id,
                state = %row.task_state(),
                "Duplicate delivery of finished task, dropping"
            );
            return Ok(Disposition::Ack);
        }

        let observed_attempt = row.attempt_count.max(0) as u32;
        if !self.store.try_claim(task_id, observed_attempt).await? {
            tracing::debug!(
                task_id = %task_id,
                "Lost claim race to another worker, dropping delivery"
            );
            return Ok(Disposition::Ack);
        }

        let attempt = observed_attempt + 1;
        tracing::info!(
            task_id = %task_id,
            work_id = %row.work_id,
            attempt,
            receive_count = delivery.receive_count,
            "Task claimed"
        );
        self.emit_event(Event::TaskStarted { task_id, attempt });

        self.execute_attempt(&row, attempt).await
    }

    /// Run one claimed attempt to a terminal disposition
    async fn execute_attempt(&self, row: &TaskRow, attempt: u32) -> Result<Disposition> {
        let options = row.options();

        // A recent successful artifact for the same work satisfies the task
        // without touching the source, unless the caller forced a refresh
        if !options.force_update
            && let Some(disposition) = self.try_reuse_artifact(row, attempt).await?
        {
            return Ok(disposition);
        }

        let fetched = self
            .source
            .fetch(FetchRequest {
                work_id: &row.work_id,
                options: &options,
            })
            .await;

        match fetched {
            Ok(work) => {
                let text = work.into_text();
                self.finish_with_artifact(row, attempt, text.into_bytes())
                    .await
            }
            Err(e) => self.handle_source_failure(row, attempt, e).await,
        }
    }

    /// Copy the newest artifact of the same work instead of re-fetching
    ///
    /// Only applies to full-range requests whose donor was also full-range:
    /// a chapter-bounded artifact is not interchangeable with any other.
    /// Returns None when no reusable artifact exists (none recorded, ranges
    /// involved, or the blob was already reaped), in which case the caller
    /// falls through to a real fetch.
    async fn try_reuse_artifact(
        &self,
        row: &TaskRow,
        attempt: u32,
    ) -> Result<Option<Disposition>> {
        let options = row.options();
        if options.start_chapter.is_some() || options.end_chapter.is_some() {
            return Ok(None);
        }

        let Some(previous) = self.store.latest_artifact_for_work(&row.work_id).await? else {
            return Ok(None);
        };
        if previous.task_id == row.task_id {
            return Ok(None);
        }
        let prev_options = previous.options();
        if prev_options.start_chapter.is_some() || prev_options.end_chapter.is_some() {
            return Ok(None);
        }
        let Some(prev_key) = previous.artifact_ref.as_deref() else {
            return Ok(None);
        };

        match self.blob.get(prev_key).await {
            Ok(data) => {
                tracing::info!(
                    task_id = %row.task_id,
                    work_id = %row.work_id,
                    reused_from = %previous.task_id,
                    "Reusing existing artifact"
                );
                let disposition = self.finish_with_artifact(row, attempt, data).await?;
                Ok(Some(disposition))
            }
            Err(BlobError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store the artifact and conditionally complete the task
    async fn finish_with_artifact(
        &self,
        row: &TaskRow,
        attempt: u32,
        data: Vec<u8>,
    ) -> Result<Disposition> {
        let task_id = row.task_id;
        let key = artifact_key(&row.owner_id, task_id, &row.work_id);
        let digest = sha256_hex(&data);

        // Write-once: an AlreadyExists here is this task's own earlier write
        // (a crashed prior attempt), never another task's, since the key is
        // derived from the task id
        let created = match self.blob.put(&key, &data).await {
            Ok(()) => true,
            Err(BlobError::AlreadyExists { .. }) => false,
            Err(e) => {
                // Infrastructure trouble, not content trouble: let the queue
                // redeliver
                let message = e.to_string();
                tracing::warn!(task_id = %task_id, error = %message, "Artifact write failed");
                self.store
                    .try_fail(task_id, attempt, &message, FailureKind::Transient)
                    .await?;
                self.emit_event(Event::TaskFailed {
                    task_id,
                    error: message,
                    will_retry: true,
                });
                return Ok(Disposition::Redeliver);
            }
        };

        if self
            .store
            .try_complete(task_id, attempt, &key, &digest)
            .await?
        {
            tracing::info!(task_id = %task_id, artifact_ref = %key, "Task succeeded");
            self.emit_event(Event::TaskSucceeded {
                task_id,
                artifact_ref: key,
            });
            return Ok(Disposition::Ack);
        }

        // Completion rejected: a newer attempt owns the task. Discard this
        // result; only remove the blob if this attempt created it, because a
        // surviving blob under this key may be the newer attempt's artifact.
        tracing::warn!(
            task_id = %task_id,
            attempt,
            "Completion write lost the race, discarding result"
        );
        if created
            && let Err(e) = self.blob.delete(&key).await
        {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to discard stale artifact");
        }
        Ok(Disposition::Ack)
    }

    /// Record a classified source failure
    async fn handle_source_failure(
        &self,
        row: &TaskRow,
        attempt: u32,
        error: SourceError,
    ) -> Result<Disposition> {
        let task_id = row.task_id;
        let message = error.to_string();

        if error.is_transient() {
            let budget = self.config.queue.max_receive_count;
            let will_retry = attempt < budget;
            tracing::warn!(
                task_id = %task_id,
                attempt,
                budget,
                error = %message,
                "Transient failure, leaving message for redelivery"
            );
            self.store
                .try_fail(task_id, attempt, &message, FailureKind::Transient)
                .await?;
            self.emit_event(Event::TaskFailed {
                task_id,
                error: message,
                will_retry,
            });
            Ok(Disposition::Redeliver)
        } else {
            tracing::error!(
                task_id = %task_id,
                attempt,
                error = %message,
                "Permanent failure, task is terminal"
            );
            self.store
                .try_fail(task_id, attempt, &message, FailureKind::Permanent)
                .await?;
            self.emit_event(Event::TaskFailed {
                task_id,
                error: message,
                will_retry: false,
            });
            Ok(Disposition::Ack)
        }
    }
}

/// Pull-process loop for one worker
///
/// Blocks only while waiting for a delivery (long poll) and while executing
/// the external download. Shutdown is observed between deliveries; there is
/// no mid-flight cancellation.
async fn run_worker(downloader: NovelDownloader, worker_id: usize) {
    let batch = downloader.config.queue.receive_batch_size;
    tracing::debug!(worker_id, "Worker started");

    loop {
        let wait = poll_wait(&downloader);
        let deliveries = tokio::select! {
            _ = downloader.shutdown.cancelled() => break,
            deliveries = downloader.queue.receive_wait(batch, wait) => deliveries,
        };

        for delivery in deliveries {
            match downloader.process_delivery(&delivery).await {
                Ok(Disposition::Ack) => {
                    if !downloader.queue.delete(delivery.receipt).await {
                        // Receipt superseded: the visibility window elapsed
                        // mid-processing and another receiver owns it now
                        tracing::warn!(
                            worker_id,
                            task_id = %delivery.task_id,
                            "Acknowledge raced a redelivery; conditional writes protect the record"
                        );
                    }
                }
                Ok(Disposition::Redeliver) => {}
                Err(e) => {
                    // Store/infrastructure error: leave the message, the
                    // queue redelivers once the visibility window elapses
                    tracing::error!(
                        worker_id,
                        task_id = %delivery.task_id,
                        error = %e,
                        "Delivery processing failed"
                    );
                }
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

/// Long-poll window, with optional jitter so idle workers spread their wakeups
fn poll_wait(downloader: &NovelDownloader) -> Duration {
    let base = downloader.config.worker.poll_wait;
    if downloader.config.worker.poll_jitter {
        let factor: f64 = rand::thread_rng().gen_range(1.0..1.5);
        base.mul_f64(factor)
    } else {
        base
    }
}
