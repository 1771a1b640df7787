//! Startup and shutdown coordination.

use crate::types::Event;

use super::NovelDownloader;

impl NovelDownloader {
    /// Start the pipeline's background tasks: worker loops, the dead-letter
    /// monitor, and (when enabled) the artifact reaper
    ///
    /// Idempotent in effect but not in resource use; call once.
    pub async fn start(&self) {
        let mut handles = self.background.lock().await;

        handles.extend(self.spawn_worker_loops());
        handles.push(self.spawn_dead_letter_monitor());
        if self.config.storage.reaper_enabled {
            handles.push(self.spawn_reaper());
        }

        tracing::info!(
            workers = self.config.worker.concurrency,
            reaper = self.config.storage.reaper_enabled,
            "Pipeline started"
        );
    }

    /// Gracefully shut the pipeline down
    ///
    /// Stops accepting submissions, cancels background tasks at their next
    /// delivery boundary, and waits for them to finish. In-flight attempts
    /// that don't complete are recovered later by queue redelivery, since
    /// retry state lives in the store and queue rather than worker memory.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down pipeline");
        self.queue.close().await;
        self.shutdown.cancel();
        self.emit_event(Event::Shutdown);

        let mut handles = self.background.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Background task panicked during shutdown");
                }
            }
        }

        tracing::info!("Pipeline stopped");
    }
}
