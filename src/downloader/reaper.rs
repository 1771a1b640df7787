//! Artifact reaper: background expiry sweeps.
//!
//! Enforces the artifact retention policy outside the pipeline itself:
//! current artifacts expire after the configured retention, superseded
//! artifacts (a newer successful download of the same work exists) after a
//! shorter one. Task records are never deleted; a reaped row keeps its
//! `artifact_ref` but the blob read reports not-found.

use crate::error::Result;
use crate::types::Event;

use super::NovelDownloader;

impl NovelDownloader {
    /// Spawn the periodic reaper task
    pub(crate) fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        let interval = self.config.storage.reaper_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = downloader.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match downloader.reap_artifacts_once().await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::info!(reaped, "Artifact reaper sweep complete"),
                    Err(e) => tracing::error!(error = %e, "Artifact reaper sweep failed"),
                }
            }
            tracing::debug!("Artifact reaper stopped");
        })
    }

    /// Run one expiry sweep, returning how many artifacts were deleted
    pub async fn reap_artifacts_once(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let current_cutoff = now - self.config.storage.artifact_retention.as_secs() as i64;
        let superseded_cutoff = now - self.config.storage.superseded_retention.as_secs() as i64;

        let rows = self
            .store
            .list_reapable_artifacts(current_cutoff, superseded_cutoff)
            .await?;

        let mut reaped = 0;
        for row in rows {
            let Some(key) = row.artifact_ref.as_deref() else {
                continue;
            };
            if let Err(e) = self.blob.delete(key).await {
                tracing::warn!(
                    task_id = %row.task_id,
                    artifact_ref = %key,
                    error = %e,
                    "Failed to delete expired artifact, will retry next sweep"
                );
                continue;
            }
            self.store.mark_artifact_reaped(row.task_id).await?;
            self.emit_event(Event::ArtifactReaped {
                task_id: row.task_id,
            });
            reaped += 1;
        }

        Ok(reaped)
    }
}
