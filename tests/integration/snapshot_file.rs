//! Snapshot file tests.
//!
//! These tests run a batch from a task source file into a real snapshot CSV
//! and read it back the way `ferry status` does.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use ferry::core::{load_tasks, TaskStatus};
use ferry::orchestration::{CommandExecutor, DispatchSettings, Dispatcher};
use ferry::status::{read_snapshot, CsvSnapshot, StatusBar};

use crate::fixtures::{script_executor, source_csv, Console};

/// Test: File round trip
/// Given a task source on disk
/// When a run writes its snapshot to disk
/// Then the snapshot parses back with the final statuses and no temp file remains
#[tokio::test]
async fn test_run_from_source_file_to_snapshot_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("repos.csv");
    let output = dir.path().join("out").join("status.csv");
    std::fs::write(&input, source_csv(&["ok-one", "fail-two", "ok-three"])).unwrap();

    let tasks = load_tasks(&input).unwrap();
    assert_eq!(tasks.len(), 3);

    let settings = DispatchSettings::new(2, dir.path().join("logs"))
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let mut dispatcher = Dispatcher::new(
        settings,
        Arc::new(CommandExecutor::new(script_executor())),
        Arc::new(CsvSnapshot::new(&output)),
    )
    .with_status_bar(StatusBar::new(Box::new(Console::default()), false));

    let summary = dispatcher.run(tasks).await.unwrap();
    assert_eq!(summary.success, 2);
    assert_eq!(summary.failure, 1);

    let records = read_snapshot(&output).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].identity.source_repo, "ok-one");
    assert_eq!(records[1].status(), TaskStatus::Failure);
    assert!(records.iter().all(|r| r.log_path().is_some_and(|p| p.exists())));

    assert!(!dir.path().join("out").join("status.csv.tmp").exists());
}

/// Test: Snapshot header
/// Given a finished run
/// When the snapshot is read as text
/// Then it starts with the task source columns followed by status and log path
#[tokio::test]
async fn test_snapshot_columns() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("repos.csv");
    let output = dir.path().join("status.csv");
    std::fs::write(&input, source_csv(&["noop-archive"])).unwrap();

    let settings = DispatchSettings::new(1, dir.path().join("logs"))
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let mut dispatcher = Dispatcher::new(
        settings,
        Arc::new(CommandExecutor::new(script_executor())),
        Arc::new(CsvSnapshot::new(&output)),
    )
    .with_status_bar(StatusBar::new(Box::new(Console::default()), false));
    dispatcher.run(load_tasks(&input).unwrap()).await.unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        "org,teamproject,repo,github_org,github_repo,gh_repo_visibility,status,log_path"
    );
    let row = text.lines().nth(1).unwrap();
    assert!(row.starts_with("contoso,platform,noop-archive,contoso-gh,noop-archive,private,Failure,"));
}

/// Test: Extra source columns
/// Given a task source with columns beyond the required six
/// When the run writes its snapshot
/// Then those columns and values appear between the source columns and status
#[tokio::test]
async fn test_extra_source_columns_reach_snapshot() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("repos.csv");
    let output = dir.path().join("status.csv");
    std::fs::write(
        &input,
        "org,teamproject,repo,github_org,github_repo,gh_repo_visibility,owner\n\
         contoso,platform,ok-api,contoso-gh,ok-api,private,alice\n",
    )
    .unwrap();

    let settings = DispatchSettings::new(1, dir.path().join("logs"))
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let mut dispatcher = Dispatcher::new(
        settings,
        Arc::new(CommandExecutor::new(script_executor())),
        Arc::new(CsvSnapshot::new(&output)),
    )
    .with_status_bar(StatusBar::new(Box::new(Console::default()), false));
    dispatcher.run(load_tasks(&input).unwrap()).await.unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "org,teamproject,repo,github_org,github_repo,gh_repo_visibility,owner,status,log_path"
    );
    assert!(lines
        .next()
        .unwrap()
        .starts_with("contoso,platform,ok-api,contoso-gh,ok-api,private,alice,Success,"));

    let records = read_snapshot(&output).unwrap();
    assert_eq!(
        records[0].identity.extra,
        vec![("owner".to_string(), "alice".to_string())]
    );
}
