//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Writing task source CSVs
//! - A scripted stand-in for the migration command
//! - A snapshot sink that keeps every persisted table

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use ferry::core::{TaskIdentity, TaskRecord, TaskStatus, Visibility};
use ferry::orchestration::{
    CommandExecutor, DispatchEvent, DispatchSettings, Dispatcher, ExecutorConfig,
};
use ferry::status::{SnapshotSink, StatusBar};
use ferry::Result;

/// Migration stand-in. `$1` is the source repo name; its prefix picks the
/// behavior. `$2` is the task's log path.
pub const MIGRATE_SCRIPT: &str = r#"
case "$1" in
  ok*)
    echo "Queued migration for $1"
    sleep 0.2
    echo "State: SUCCEEDED"
    ;;
  nomarker*)
    echo "Migration for $1 went quiet"
    ;;
  fail*)
    echo "State: SUCCEEDED"
    exit 3
    ;;
  noop*)
    echo "No operation will be performed"
    echo "State: SUCCEEDED"
    ;;
  nested*)
    sh -c 'sleep 2; echo LATE > "$0.late"' "$2"
    echo "State: SUCCEEDED"
    ;;
  slow*)
    echo "Migration for $1 is slow"
    sleep 30
    echo "State: SUCCEEDED"
    ;;
  *)
    echo "unknown repo $1" >&2
    exit 64
    ;;
esac
"#;

pub fn script_executor() -> ExecutorConfig {
    ExecutorConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            MIGRATE_SCRIPT.to_string(),
            "migrate".to_string(),
            "{source_repo}".to_string(),
            "{log_path}".to_string(),
        ],
    }
}

pub fn identity(repo: &str) -> TaskIdentity {
    TaskIdentity {
        source_org: "contoso".to_string(),
        source_project: "platform".to_string(),
        source_repo: repo.to_string(),
        target_org: "contoso-gh".to_string(),
        target_repo: repo.to_string(),
        visibility: Visibility::Private,
        extra: Vec::new(),
    }
}

pub fn identities(repos: &[&str]) -> Vec<TaskIdentity> {
    repos.iter().map(|r| identity(r)).collect()
}

/// Task source CSV content for the given repos.
pub fn source_csv(repos: &[&str]) -> String {
    let mut out = String::from("org,teamproject,repo,github_org,github_repo,gh_repo_visibility\n");
    for repo in repos {
        out.push_str(&format!(
            "contoso,platform,{},contoso-gh,{},private\n",
            repo, repo
        ));
    }
    out
}

/// Keeps every snapshot the dispatcher persists.
#[derive(Default)]
pub struct RecordingSink {
    pub snapshots: Mutex<Vec<Vec<TaskRecord>>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<Vec<TaskRecord>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Vec<TaskRecord> {
        self.snapshots.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl SnapshotSink for RecordingSink {
    fn persist(&self, records: &[TaskRecord]) -> Result<()> {
        self.snapshots.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

/// Console writer whose contents the test can read back.
#[derive(Clone, Default)]
pub struct Console(pub Arc<Mutex<Vec<u8>>>);

impl Console {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for Console {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A dispatcher wired to the scripted executor, a recording sink, an event
/// channel and an in-memory console.
pub struct RunHarness {
    pub temp_dir: TempDir,
    pub sink: Arc<RecordingSink>,
    pub console: Console,
    pub event_rx: mpsc::Receiver<DispatchEvent>,
    pub dispatcher: Dispatcher,
}

impl RunHarness {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_settings(max_concurrent, |s| s)
    }

    pub fn with_settings(
        max_concurrent: usize,
        adjust: impl FnOnce(DispatchSettings) -> DispatchSettings,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = DispatchSettings::new(max_concurrent, temp_dir.path().join("logs"))
            .expect("valid concurrency")
            .with_poll_interval(Duration::from_millis(20));
        let settings = adjust(settings);

        let sink = Arc::new(RecordingSink::default());
        let console = Console::default();
        let (event_tx, event_rx) = mpsc::channel(1024);
        let dispatcher = Dispatcher::new(
            settings,
            Arc::new(CommandExecutor::new(script_executor())),
            sink.clone(),
        )
        .with_status_bar(
            StatusBar::new(Box::new(console.clone()), false).with_plain_interval(Duration::ZERO),
        )
        .with_events(event_tx);

        Self {
            temp_dir,
            sink,
            console,
            event_rx,
            dispatcher,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.temp_dir.path().join("logs")
    }

    pub fn drain_events(&mut self) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn count_status(records: &[TaskRecord], status: TaskStatus) -> usize {
    records.iter().filter(|r| r.status() == status).count()
}
