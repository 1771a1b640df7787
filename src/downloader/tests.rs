//! End-to-end pipeline tests: submission through worker execution to
//! terminal state, driven on a paused clock so visibility windows and
//! retention periods elapse instantly.

use super::test_helpers::{MockOutcome, pipeline_with, wait_for_drained_queue, wait_for_state};
use crate::error::Error;
use crate::types::{DownloadOptions, Event, FailureKind, TaskState};

const OWNER: &str = "user-1";

#[tokio::test(start_paused = true)]
async fn submitted_task_succeeds_on_first_attempt() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();

    // Freshly submitted tasks are visible as pending/running before success
    let early = pipeline.downloader.get_status(OWNER, task_id).await.unwrap();
    assert!(matches!(
        early.state,
        TaskState::Pending | TaskState::Running | TaskState::Succeeded
    ));

    let status = wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;
    assert_eq!(status.attempt_count, 1);
    assert_eq!(status.work_id, "novel-42");
    let artifact_ref = status.artifact_ref.expect("succeeded task must carry an artifact ref");
    assert!(!artifact_ref.is_empty());
    assert!(status.error.is_none());

    // The artifact is fetchable and contains the assembled text
    let artifact = pipeline.downloader.get_artifact(OWNER, task_id).await.unwrap();
    let text = String::from_utf8(artifact).unwrap();
    assert!(text.contains("Mock Novel"));
    assert!(text.contains("Chapter 1 - One"));

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_work_id_is_rejected_without_creating_a_task() {
    let pipeline = pipeline_with(vec![]).await;

    let err = pipeline
        .downloader
        .submit(OWNER, "", DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    assert!(
        pipeline.downloader.list_works(OWNER, 10).await.unwrap().is_empty(),
        "a rejected submission must leave no task record"
    );
    assert_eq!(pipeline.downloader.queue_stats().await.visible, 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_and_succeed_within_the_budget() {
    // Fails twice, succeeds on the third and final allowed attempt
    let pipeline = pipeline_with(vec![MockOutcome::Transient, MockOutcome::Transient]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "n4830bu", DownloadOptions::default())
        .await
        .unwrap();

    let status = wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;
    assert_eq!(
        status.attempt_count, 3,
        "two transient failures plus the successful attempt"
    );
    assert_eq!(pipeline.source.calls(), 3);
    assert!(status.error.is_none(), "success must clear the failure detail");
    assert!(pipeline.downloader.dead_letters().await.is_empty());

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_dead_letters_the_task() {
    let pipeline = pipeline_with(vec![
        MockOutcome::Transient,
        MockOutcome::Transient,
        MockOutcome::Transient,
    ])
    .await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "n4830bu", DownloadOptions::default())
        .await
        .unwrap();

    let status =
        wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::DeadLettered).await;
    assert_eq!(
        status.state,
        TaskState::DeadLettered,
        "budget exhaustion must quarantine, not plain-fail"
    );
    assert_eq!(
        status.attempt_count, 3,
        "attempt count is bounded by the receive budget"
    );
    let error = status.error.unwrap();
    assert_eq!(error.kind, FailureKind::DeadLetter);

    let dead = pipeline.downloader.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task_id, task_id);

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_terminal_without_retries() {
    let pipeline = pipeline_with(vec![MockOutcome::Permanent]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "gone-forever", DownloadOptions::default())
        .await
        .unwrap();

    let status = wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Failed).await;
    assert_eq!(status.attempt_count, 1);
    let error = status.error.unwrap();
    assert_eq!(error.kind, FailureKind::Permanent);

    // The message was deleted immediately: no redelivery, no dead-letter
    wait_for_drained_queue(&pipeline.downloader).await;
    assert_eq!(pipeline.source.calls(), 1, "permanent failures are never retried");
    assert!(pipeline.downloader.dead_letters().await.is_empty());

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_of_a_finished_task_is_a_no_op() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    let done = wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;

    // Simulate at-least-once delivery handing the same task out again
    pipeline.downloader.queue.enqueue(task_id).await.unwrap();
    wait_for_drained_queue(&pipeline.downloader).await;

    let after = pipeline.downloader.get_status(OWNER, task_id).await.unwrap();
    assert_eq!(after.state, TaskState::Succeeded);
    assert_eq!(
        after.attempt_count, done.attempt_count,
        "a duplicate delivery must not consume an attempt"
    );
    assert_eq!(after.updated_at, done.updated_at, "no mutation after terminal state");
    assert_eq!(
        pipeline.source.calls(),
        1,
        "a duplicate delivery must not re-fetch or rewrite the artifact"
    );

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replayed_dead_letter_runs_to_success() {
    let pipeline = pipeline_with(vec![
        MockOutcome::Transient,
        MockOutcome::Transient,
        MockOutcome::Transient,
    ])
    .await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "n4830bu", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::DeadLettered).await;

    // Operator replays; the script is exhausted so the next fetch succeeds
    assert!(pipeline.downloader.replay_dead_letter(task_id).await.unwrap());
    let status = wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;
    assert_eq!(status.attempt_count, 4);
    assert!(pipeline.downloader.dead_letters().await.is_empty());

    // A second replay has nothing to work with
    assert!(!pipeline.downloader.replay_dead_letter(task_id).await.unwrap());

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fresh_download_reuses_a_recent_artifact() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let first = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, first, TaskState::Succeeded).await;

    let second = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    let status = wait_for_state(&pipeline.downloader, OWNER, second, TaskState::Succeeded).await;

    assert_eq!(
        pipeline.source.calls(),
        1,
        "without force_update the second task copies the existing artifact"
    );
    assert!(status.artifact_ref.is_some());

    let a = pipeline.downloader.get_artifact(OWNER, first).await.unwrap();
    let b = pipeline.downloader.get_artifact(OWNER, second).await.unwrap();
    assert_eq!(a, b, "the reused artifact must be byte-identical");

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn chapter_bounded_requests_never_reuse_artifacts() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok, MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let first = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, first, TaskState::Succeeded).await;

    let second = pipeline
        .downloader
        .submit(
            OWNER,
            "novel-42",
            DownloadOptions {
                start_chapter: Some(2),
                end_chapter: Some(2),
                force_update: false,
            },
        )
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, second, TaskState::Succeeded).await;

    assert_eq!(
        pipeline.source.calls(),
        2,
        "a ranged request is not interchangeable with the full artifact"
    );

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn force_update_bypasses_artifact_reuse() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok, MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let first = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, first, TaskState::Succeeded).await;

    let second = pipeline
        .downloader
        .submit(
            OWNER,
            "novel-42",
            DownloadOptions {
                force_update: true,
                ..DownloadOptions::default()
            },
        )
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, second, TaskState::Succeeded).await;

    assert_eq!(pipeline.source.calls(), 2, "force_update must hit the source again");

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn enqueue_failure_surfaces_as_a_failed_task() {
    let pipeline = pipeline_with(vec![]).await;
    // Simulate a queue outage without shutting the gateway down
    pipeline.downloader.queue.close().await;

    let err = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap_err();
    let Error::Enqueue { task_id, .. } = err else {
        panic!("expected an enqueue failure, got {err}");
    };

    // The record is visible to polling rather than silently lost
    let status = pipeline.downloader.get_status(OWNER, task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.error.unwrap().kind, FailureKind::Enqueue);
}

#[tokio::test(start_paused = true)]
async fn status_lookup_is_owner_scoped() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;

    let err = pipeline
        .downloader
        .get_status("someone-else", task_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn work_listing_and_history_cover_submitted_tasks() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok, MockOutcome::Permanent]).await;
    pipeline.downloader.start().await;

    let ok = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, ok, TaskState::Succeeded).await;

    let failed = pipeline
        .downloader
        .submit(
            OWNER,
            "other-work",
            DownloadOptions {
                force_update: true,
                ..DownloadOptions::default()
            },
        )
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, failed, TaskState::Failed).await;

    let works = pipeline.downloader.list_works(OWNER, 10).await.unwrap();
    assert_eq!(works.len(), 2);

    let history = pipeline.downloader.work_history("novel-42").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_id, ok);

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reaper_deletes_expired_artifacts_but_keeps_the_record() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;

    // Pretend the artifact is 100 days old
    let old = chrono::Utc::now().timestamp() - 100 * 24 * 3600;
    pipeline.downloader.store.backdate_for_test(task_id, old, old).await;

    assert_eq!(pipeline.downloader.reap_artifacts_once().await.unwrap(), 1);
    // A second sweep finds nothing left to do
    assert_eq!(pipeline.downloader.reap_artifacts_once().await.unwrap(), 0);

    let status = pipeline.downloader.get_status(OWNER, task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Succeeded, "reaping never rewrites task state");
    assert!(status.artifact_ref.is_some());

    let err = pipeline.downloader.get_artifact(OWNER, task_id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "the blob itself is gone");

    pipeline.downloader.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_submissions() {
    let pipeline = pipeline_with(vec![]).await;
    pipeline.downloader.start().await;
    pipeline.downloader.shutdown().await;

    let err = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_are_broadcast_in_order() {
    let pipeline = pipeline_with(vec![MockOutcome::Ok]).await;
    let mut events = pipeline.downloader.subscribe();
    pipeline.downloader.start().await;

    let task_id = pipeline
        .downloader
        .submit(OWNER, "novel-42", DownloadOptions::default())
        .await
        .unwrap();
    wait_for_state(&pipeline.downloader, OWNER, task_id, TaskState::Succeeded).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(
        seen.first(),
        Some(Event::TaskQueued { task_id: id, .. }) if *id == task_id
    ));
    assert!(
        seen.iter()
            .any(|e| matches!(e, Event::TaskStarted { task_id: id, attempt: 1 } if *id == task_id))
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, Event::TaskSucceeded { task_id: id, .. } if *id == task_id))
    );

    pipeline.downloader.shutdown().await;
}
