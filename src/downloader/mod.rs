//! Core pipeline implementation split into focused submodules.
//!
//! The `NovelDownloader` struct and its methods are organized by domain:
//! - [`gateway`] - Submission: validation, task creation, enqueue
//! - [`worker`] - Per-delivery execution state machine and worker loops
//! - [`status`] - Owner-scoped status reads and work listings
//! - [`dead_letter`] - Dead-letter monitoring and operator replay
//! - [`reaper`] - Artifact expiry sweeps
//! - [`lifecycle`] - Startup and shutdown coordination

mod dead_letter;
mod gateway;
mod lifecycle;
mod reaper;
mod status;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::Config;
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::source::{ContentSource, HttpContentSource};
use crate::store::TaskStore;
use crate::types::{Event, QueueStats};

/// Main pipeline handle (cloneable - all fields are Arc-wrapped)
///
/// Every collaborator is injected at construction; there are no ambient
/// singletons. Workers, the dead-letter monitor, and the reaper coordinate
/// exclusively through the task store's conditional writes and the queue's
/// delivery semantics.
#[derive(Clone)]
pub struct NovelDownloader {
    /// Task store for persistence.
    /// Public for integration tests and embedders to query task state.
    pub store: Arc<TaskStore>,
    /// Work queue carrying task references from submission to workers
    pub(crate) queue: Arc<WorkQueue>,
    /// Artifact persistence
    pub(crate) blob: Arc<dyn BlobStore>,
    /// External content fetch capability
    pub(crate) source: Arc<dyn ContentSource>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cancellation token observed by all background tasks
    pub(crate) shutdown: CancellationToken,
    /// Handles of spawned background tasks, joined on shutdown
    pub(crate) background: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl NovelDownloader {
    /// Create a pipeline with the bundled filesystem blob store and HTTP
    /// content source
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite task database and runs migrations
    /// - Creates the work queue from the configured parameters
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(HttpContentSource::new(&config.source)?);
        let blob = Arc::new(FsBlobStore::new(config.storage.artifact_dir.clone()));
        Self::with_components(config, source, blob).await
    }

    /// Create a pipeline with injected collaborators
    ///
    /// Embedders (and tests) supply their own content source and blob store;
    /// the task store and queue are always owned by the pipeline.
    pub async fn with_components(
        config: Config,
        source: Arc<dyn ContentSource>,
        blob: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(TaskStore::new(&config.storage.database_path).await?);
        let queue = Arc::new(WorkQueue::new(&config.queue));

        // Buffered broadcast channel; slow subscribers lag rather than block
        let (event_tx, _rx) = broadcast::channel(1024);

        Ok(Self {
            store,
            queue,
            blob,
            source,
            config: Arc::new(config),
            event_tx,
            shutdown: CancellationToken::new(),
            background: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber that falls behind by more than the buffer
    /// size receives a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Snapshot of work queue depth
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// pipeline progress never depends on anyone listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server runs concurrently with the workers and listens on the
    /// configured bind address.
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let downloader = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(downloader, config).await })
    }
}
