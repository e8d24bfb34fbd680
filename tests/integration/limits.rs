//! Time limit and cancellation tests.
//!
//! A hung migration must never stall the run: these tests check that task
//! timeouts, run timeouts and cancellation all end in terminal records.

#![cfg(unix)]

use std::time::{Duration, Instant};

use ferry::core::TaskStatus;
use ferry::orchestration::{DispatchEvent, TimeLimits};

use crate::fixtures::{count_status, identities, RunHarness};

/// Test: Task timeout
/// Given a task that outlives its limit
/// When the limit passes
/// Then it is killed and recorded as a failure while others still succeed
#[tokio::test]
async fn test_task_timeout_kills_and_fails() {
    let mut harness = RunHarness::with_settings(2, |s| {
        s.with_limits(TimeLimits::none().with_task_timeout(Duration::from_secs(1)))
    });

    let begun = Instant::now();
    let summary = harness
        .dispatcher
        .run(identities(&["slow-monolith", "ok-web"]))
        .await
        .unwrap();
    assert!(begun.elapsed() < Duration::from_secs(20));
    assert_eq!(summary.success, 1);
    assert_eq!(summary.failure, 1);

    let timed_out: Vec<usize> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::TaskTimedOut { index, elapsed } => {
                assert!(elapsed >= Duration::from_secs(1));
                Some(index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(timed_out, vec![0]);

    let last = harness.sink.last();
    assert_eq!(last[0].status(), TaskStatus::Failure);
    let log = std::fs::read_to_string(last[0].log_path().unwrap()).unwrap();
    assert!(log.contains("is slow"));
    assert!(log.contains("[ferry] killed: task timeout exceeded"));
}

/// Test: Timeout reaches descendants
/// Given a migration command that runs its work in a nested shell
/// When the task times out
/// Then the nested process is killed too and never finishes its work
#[tokio::test]
async fn test_task_timeout_kills_whole_process_group() {
    let mut harness = RunHarness::with_settings(1, |s| {
        s.with_limits(TimeLimits::none().with_task_timeout(Duration::from_millis(300)))
    });

    let summary = harness
        .dispatcher
        .run(identities(&["nested-mono"]))
        .await
        .unwrap();
    assert_eq!(summary.failure, 1);

    let log_path = harness.sink.last()[0].log_path().unwrap().to_path_buf();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let late = std::path::PathBuf::from(format!("{}.late", log_path.display()));
    assert!(!late.exists(), "nested process kept running after the timeout");
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(!log.contains("State: SUCCEEDED"));
}

/// Test: Run timeout
/// Given one slot held by a hung task and more work queued
/// When the run limit passes
/// Then the running task is killed and queued tasks fail without starting
#[tokio::test]
async fn test_run_timeout_fails_running_and_queued() {
    let mut harness = RunHarness::with_settings(1, |s| {
        s.with_limits(TimeLimits::none().with_run_timeout(Duration::from_secs(1)))
    });

    let begun = Instant::now();
    let summary = harness
        .dispatcher
        .run(identities(&["slow-a", "ok-b", "ok-c"]))
        .await
        .unwrap();
    assert!(begun.elapsed() < Duration::from_secs(20));
    assert_eq!(summary.total, 3);
    assert_eq!(summary.failure, 3);

    let started = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, DispatchEvent::TaskStarted { .. }))
        .count();
    assert_eq!(started, 1);

    let last = harness.sink.last();
    for record in &last[1..] {
        let log = std::fs::read_to_string(record.log_path().unwrap()).unwrap();
        assert!(log.contains("not started: run timeout exceeded"));
    }
}

/// Test: Cancellation
/// Given hung tasks
/// When the cancel token fires
/// Then the run returns promptly with every task failed
#[tokio::test]
async fn test_cancel_stops_run() {
    let mut harness = RunHarness::new(2);
    let cancel = harness.dispatcher.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let begun = Instant::now();
    let summary = harness
        .dispatcher
        .run(identities(&["slow-1", "slow-2", "slow-3"]))
        .await
        .unwrap();
    assert!(begun.elapsed() < Duration::from_secs(20));
    assert_eq!(summary.failure, 3);

    let last = harness.sink.last();
    assert_eq!(count_status(&last, TaskStatus::Failure), 3);
    let first_log = std::fs::read_to_string(last[0].log_path().unwrap()).unwrap();
    assert!(first_log.contains("[ferry] killed: run cancelled"));
}
