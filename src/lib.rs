//! # novel-dl
//!
//! Backend library for an asynchronous web-novel download and archive
//! service: a submission accepts a work identifier, becomes a durable task,
//! is dispatched to exactly one worker at a time over an at-least-once queue,
//! survives worker failure through bounded retries and dead-lettering, and
//! exposes a pollable status until a plain-text artifact is ready.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Injected collaborators** - Task store, work queue, blob store, and
//!   content source are passed in at construction; no ambient singletons
//! - **Queue-owned retries** - Transient failures ride the visibility
//!   timeout, so retry state survives worker crashes
//! - **Conditional writes** - Compare-and-set updates on the task record are
//!   the only concurrency control; there are no distributed locks
//!
//! ## Quick Start
//!
//! ```no_run
//! use novel_dl::{Config, DownloadOptions, NovelDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloader = NovelDownloader::new(config).await?;
//!     downloader.start().await;
//!
//!     let task_id = downloader
//!         .submit("user-1", "n4830bu", DownloadOptions::default())
//!         .await?;
//!
//!     // Poll until the task reaches a terminal state
//!     let status = downloader.get_status("user-1", task_id).await?;
//!     println!("task {task_id} is {:?}", status.state);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Artifact blob storage
pub mod blob;
/// Configuration types
pub mod config;
/// Core pipeline implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Work queue with at-least-once delivery and dead-lettering
pub mod queue;
/// Content source boundary
pub mod source;
/// Task store persistence layer
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use blob::{BlobStore, FsBlobStore};
pub use config::{ApiConfig, Config, QueueConfig, SourceConfig, StorageConfig, WorkerConfig};
pub use downloader::NovelDownloader;
pub use error::{
    ApiError, BlobError, DatabaseError, Error, ErrorDetail, Result, SourceError, ToHttpStatus,
};
pub use queue::{DeadLetter, Delivery, WorkQueue};
pub use source::{Chapter, ContentSource, DownloadedWork, FetchRequest, HttpContentSource};
pub use store::TaskStore;
pub use types::{
    DownloadOptions, Event, FailureKind, QueueStats, TaskError, TaskId, TaskState, TaskStatus,
    WorkSummary,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use novel_dl::{Config, NovelDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = NovelDownloader::new(Config::default()).await?;
///     downloader.start().await;
///
///     run_with_shutdown(downloader).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: NovelDownloader) {
    wait_for_signal().await;
    downloader.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
