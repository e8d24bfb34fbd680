//! Batch execution tests.
//!
//! These tests verify the concurrency cap, start order and outcome
//! classification against real child processes.

#![cfg(unix)]

use ferry::core::TaskStatus;
use ferry::orchestration::DispatchEvent;

use crate::fixtures::{count_status, identities, RunHarness};

/// Test: Concurrency cap
/// Given 5 tasks and a cap of 2
/// When the run completes
/// Then no snapshot ever shows more than 2 tasks running
#[tokio::test]
async fn test_never_exceeds_max_concurrent() {
    let mut harness = RunHarness::new(2);
    let tasks = identities(&["ok-1", "ok-2", "ok-3", "ok-4", "ok-5"]);

    let summary = harness.dispatcher.run(tasks).await.unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.success, 5);
    assert_eq!(summary.failure, 0);

    let snapshots = harness.sink.all();
    let peak = snapshots
        .iter()
        .map(|s| count_status(s, TaskStatus::Running))
        .max()
        .unwrap();
    assert_eq!(peak, 2, "cap should be reached but never exceeded");
    assert!(
        snapshots.iter().any(|s| count_status(s, TaskStatus::Running) == 2
            && count_status(s, TaskStatus::Pending) == 3),
        "steady state should show 2 running and 3 pending"
    );
}

/// Test: Partition
/// Given 5 tasks and a cap of 2
/// When every snapshot is inspected
/// Then pending, running and finished tasks always add up to 5
#[tokio::test]
async fn test_every_snapshot_accounts_for_every_task() {
    let mut harness = RunHarness::new(2);
    let tasks = identities(&["ok-1", "fail-2", "ok-3", "nomarker-4", "ok-5"]);

    let summary = harness.dispatcher.run(tasks).await.unwrap();
    assert_eq!(summary.success + summary.failure, 5);

    for snapshot in harness.sink.all() {
        let pending = count_status(&snapshot, TaskStatus::Pending);
        let running = count_status(&snapshot, TaskStatus::Running);
        let finished = snapshot.iter().filter(|r| r.status().is_terminal()).count();
        assert_eq!(pending + running + finished, 5);
        assert!(running <= 2);
        for record in &snapshot {
            assert_eq!(
                record.log_path().is_some(),
                record.status() != TaskStatus::Pending
            );
        }
    }
}

/// Test: FIFO start order
/// Given tasks in source order
/// When they are started one at a time
/// Then they start in exactly that order
#[tokio::test]
async fn test_tasks_start_in_source_order() {
    let mut harness = RunHarness::new(1);
    let tasks = identities(&["ok-a", "ok-b", "ok-c"]);

    harness.dispatcher.run(tasks).await.unwrap();

    let started: Vec<usize> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::TaskStarted { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![0, 1, 2]);
}

/// Test: Outcome classification
/// Given a success, a missing marker, a nonzero exit and a no-op
/// When the run completes
/// Then only the first is a success
#[tokio::test]
async fn test_outcomes_are_classified_from_exit_code_and_log() {
    let mut harness = RunHarness::new(4);
    let tasks = identities(&["ok-main", "nomarker-docs", "fail-infra", "noop-legacy"]);

    let summary = harness.dispatcher.run(tasks).await.unwrap();
    assert_eq!(summary.success, 1);
    assert_eq!(summary.failure, 3);

    let last = harness.sink.last();
    let statuses: Vec<TaskStatus> = last.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Success,
            TaskStatus::Failure,
            TaskStatus::Failure,
            TaskStatus::Failure,
        ]
    );
}

/// Test: Snapshot ordering
/// Given any run
/// When snapshots are taken
/// Then the first is all pending and the last has no pending or running rows
#[tokio::test]
async fn test_snapshots_start_pending_and_end_terminal() {
    let mut harness = RunHarness::new(2);
    harness
        .dispatcher
        .run(identities(&["ok-x", "fail-y", "ok-z"]))
        .await
        .unwrap();

    let snapshots = harness.sink.all();
    let first = snapshots.first().unwrap();
    assert_eq!(count_status(first, TaskStatus::Pending), 3);
    assert!(first.iter().all(|r| r.log_path().is_none()));

    let last = snapshots.last().unwrap();
    assert!(last.iter().all(|r| r.status().is_terminal()));
    assert!(last.iter().all(|r| r.log_path().is_some()));
}

/// Test: Log capture
/// Given a task that prints output
/// When it finishes
/// Then its log file holds the output and the console shows prefixed lines
#[tokio::test]
async fn test_output_is_logged_and_streamed() {
    let mut harness = RunHarness::new(1);
    harness
        .dispatcher
        .run(identities(&["ok-api"]))
        .await
        .unwrap();

    let record = harness.sink.last().remove(0);
    let log_path = record.log_path().unwrap().to_path_buf();
    assert!(log_path.starts_with(harness.log_dir()));
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Queued migration for ok-api"));
    assert!(log.contains("State: SUCCEEDED"));

    let console = harness.console.text();
    assert!(console.contains("[platform/ok-api] Queued migration for ok-api"));
    assert!(console.contains("[platform/ok-api] State: SUCCEEDED"));
    assert!(console.contains("Total: 1"));
}

/// Test: Completion event
/// Given a finished run
/// When events are drained
/// Then the last one carries the summary
#[tokio::test]
async fn test_all_tasks_complete_is_last_event() {
    let mut harness = RunHarness::new(3);
    let summary = harness
        .dispatcher
        .run(identities(&["ok-1", "nomarker-2"]))
        .await
        .unwrap();

    let events = harness.drain_events();
    let finished = events
        .iter()
        .filter(|e| matches!(e, DispatchEvent::TaskFinished { .. }))
        .count();
    assert_eq!(finished, 2);
    assert_eq!(
        events.last(),
        Some(&DispatchEvent::AllTasksComplete(summary))
    );
}
