//! Shared helpers for pipeline tests: a scriptable content source and a
//! fully wired pipeline over temp storage with fast queue timings.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::error::SourceError;
use crate::source::{Chapter, ContentSource, DownloadedWork, FetchRequest};
use crate::types::{TaskId, TaskState, TaskStatus};

use super::NovelDownloader;

/// One scripted outcome for [`MockSource::fetch`]
#[derive(Clone, Copy, Debug)]
pub(crate) enum MockOutcome {
    /// Succeed with a small two-chapter work
    Ok,
    /// Fail transiently (upstream 503)
    Transient,
    /// Fail permanently (work not found)
    Permanent,
}

/// Content source that plays back a script of outcomes, then succeeds
pub(crate) struct MockSource {
    script: Mutex<VecDeque<MockOutcome>>,
    calls: AtomicU32,
}

impl MockSource {
    pub(crate) fn new(script: Vec<MockOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    /// Total fetch invocations across all tasks
    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
    ) -> std::result::Result<DownloadedWork, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Ok);

        match outcome {
            MockOutcome::Ok => Ok(DownloadedWork {
                work_id: request.work_id.to_string(),
                title: "Mock Novel".into(),
                author: "Mock Author".into(),
                chapters: vec![
                    Chapter {
                        number: 1,
                        title: "One".into(),
                        body: "First chapter body.".into(),
                    },
                    Chapter {
                        number: 2,
                        title: "Two".into(),
                        body: "Second chapter body.".into(),
                    },
                ],
            }),
            MockOutcome::Transient => Err(SourceError::Upstream { status: 503 }),
            MockOutcome::Permanent => Err(SourceError::WorkNotFound {
                work_id: request.work_id.to_string(),
            }),
        }
    }
}

/// A wired pipeline over temp storage; dropping it removes the storage
pub(crate) struct TestPipeline {
    pub(crate) downloader: NovelDownloader,
    pub(crate) source: Arc<MockSource>,
    _dir: tempfile::TempDir,
}

/// Queue/worker timings shrunk so paused-clock tests sweep through retries
/// instantly; the reaper stays off for determinism and is tested directly
pub(crate) async fn pipeline_with(script: Vec<MockOutcome>) -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.storage.database_path = dir.path().join("tasks.db");
    config.storage.artifact_dir = dir.path().join("artifacts");
    config.queue.visibility_timeout = Duration::from_secs(1);
    config.worker.poll_wait = Duration::from_millis(50);
    config.worker.poll_jitter = false;
    config.worker.concurrency = 1;
    config.storage.reaper_enabled = false;

    let source = MockSource::new(script);
    let blob = Arc::new(FsBlobStore::new(config.storage.artifact_dir.clone()));
    let downloader = NovelDownloader::with_components(config, source.clone(), blob)
        .await
        .unwrap();

    TestPipeline {
        downloader,
        source,
        _dir: dir,
    }
}

/// Poll the status service until the task reaches `state`
pub(crate) async fn wait_for_state(
    downloader: &NovelDownloader,
    owner_id: &str,
    task_id: TaskId,
    state: TaskState,
) -> TaskStatus {
    for _ in 0..5_000 {
        let status = downloader.get_status(owner_id, task_id).await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {state:?}");
}

/// Poll until the queue holds no messages (everything acked or dead-lettered)
pub(crate) async fn wait_for_drained_queue(downloader: &NovelDownloader) {
    for _ in 0..5_000 {
        let stats = downloader.queue_stats().await;
        if stats.visible == 0 && stats.in_flight == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never drained");
}
