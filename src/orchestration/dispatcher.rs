//! Dispatcher: the control loop that drives a batch of migrations.
//!
//! A single loop owns the `RunState`. Each iteration it starts queued tasks
//! while slots are free, streams new log output, and reaps processes that
//! have exited (or outlived their time limit). When an iteration makes no
//! progress the loop sleeps for the polling interval. Every status change is
//! followed by a snapshot write and a status bar refresh.

use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{TaskIdentity, TaskRecord, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::classifier::CompletionClassifier;
use crate::orchestration::executor::{terminate, TaskExecutor};
use crate::orchestration::run_state::{ActiveTask, MaxConcurrent, RunState, RunSummary};
use crate::orchestration::tailer::{LineSplitter, LogTailer};
use crate::orchestration::timeouts::{TimeLimits, DEFAULT_POLL_INTERVAL_SECS};
use crate::status::{persist_blocking, SnapshotSink, StatusBar};
use crate::{flog, flog_debug, flog_error, flog_warn};

/// Events emitted as tasks move through the run.
///
/// Purely observational; the dispatcher never waits for a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DispatchEvent {
    /// A task's process was launched.
    TaskStarted { index: usize, log_path: PathBuf },
    /// The executor could not be started; the task failed without running.
    LaunchFailed { index: usize, error: String },
    /// A task exceeded its time limit and was killed.
    TaskTimedOut { index: usize, elapsed: Duration },
    /// A task reached Success or Failure.
    TaskFinished { index: usize, status: TaskStatus },
    /// Queue and active set are both empty.
    AllTasksComplete(RunSummary),
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_concurrent: MaxConcurrent,
    pub poll_interval: Duration,
    pub limits: TimeLimits,
    /// Directory receiving one log file per task.
    pub log_dir: PathBuf,
}

impl DispatchSettings {
    /// Settings with the default polling interval and no time limits.
    pub fn new(max_concurrent: usize, log_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            max_concurrent: MaxConcurrent::new(max_concurrent)?,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            limits: TimeLimits::none(),
            log_dir: log_dir.into(),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_limits(mut self, limits: TimeLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// How a process left the active set.
enum Exit {
    Code(i32),
    TimedOut(Duration),
    WaitFailed(String),
}

pub struct Dispatcher {
    settings: DispatchSettings,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn SnapshotSink>,
    classifier: CompletionClassifier,
    bar: StatusBar,
    event_tx: Option<mpsc::Sender<DispatchEvent>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            settings,
            executor,
            sink,
            classifier: CompletionClassifier::default(),
            bar: StatusBar::stdout(),
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: CompletionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_status_bar(mut self, bar: StatusBar) -> Self {
        self.bar = bar;
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<DispatchEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run: active processes are killed and every task
    /// not yet finished is recorded as a failure.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every task to a terminal status.
    ///
    /// Only configuration problems return an error, and they do so before any
    /// task is launched. Individual task failures are reported in the summary.
    pub async fn run(&mut self, tasks: Vec<TaskIdentity>) -> Result<RunSummary> {
        if tasks.is_empty() {
            return Err(Error::EmptyTaskList);
        }
        std::fs::create_dir_all(&self.settings.log_dir).map_err(|e| {
            Error::Config(format!(
                "cannot create log directory {}: {}",
                self.settings.log_dir.display(),
                e
            ))
        })?;

        let mut state = RunState::new(tasks);
        flog!(
            "Run started: {} tasks, max_concurrent={}, poll_interval={:?}",
            state.records().len(),
            self.settings.max_concurrent.get(),
            self.settings.poll_interval
        );
        self.notify(&state).await;

        let deadline = self.settings.limits.run_deadline(Instant::now());
        loop {
            if self.cancel.is_cancelled() {
                self.abort_remaining(&mut state, "run cancelled").await?;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                flog_warn!("Run timeout reached");
                self.abort_remaining(&mut state, "run timeout exceeded")
                    .await?;
                break;
            }

            let started = self.start_ready(&mut state).await?;
            self.pump_output(&mut state).await;
            let reaped = self.reap(&mut state).await?;

            if state.is_finished() {
                break;
            }
            if !started && !reaped {
                let pause = match deadline {
                    Some(d) => self
                        .settings
                        .poll_interval
                        .min(d.saturating_duration_since(Instant::now())),
                    None => self.settings.poll_interval,
                };
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        let summary = state.summary();
        self.bar.finish();
        flog!("Run finished: {}", summary);
        self.emit(DispatchEvent::AllTasksComplete(summary));
        Ok(summary)
    }

    /// Launch queued tasks in FIFO order while slots are free.
    async fn start_ready(&mut self, state: &mut RunState) -> Result<bool> {
        let mut progressed = false;
        while state.has_capacity(self.settings.max_concurrent) {
            let Some(index) = state.pop_queued() else {
                break;
            };
            progressed = true;

            let log_path = self.allocate_log_path(state.record(index));
            let identity = state.record(index).identity.clone();
            let label = identity.label();

            match self.executor.launch(&identity, &log_path) {
                Ok(child) => {
                    state.record_mut(index).start(log_path.clone())?;
                    state.push_active(ActiveTask {
                        index,
                        label: label.clone(),
                        child,
                        tailer: LogTailer::new(&log_path),
                        lines: LineSplitter::new(),
                        started: Instant::now(),
                    });
                    flog!("Task {} started: {} -> {}", index, label, log_path.display());
                    self.bar.print_line(&format!("[{}] started", label));
                    self.emit(DispatchEvent::TaskStarted { index, log_path });
                }
                Err(e) => {
                    flog_error!("Task {} ({}) failed to launch: {}", index, label, e);
                    append_note(&log_path, &format!("launch failed: {}", e));
                    state.record_mut(index).fail_unstarted(log_path)?;
                    state.mark_completed(index);
                    self.bar
                        .print_line(&format!("[{}] Failure (launch failed: {})", label, e));
                    self.emit(DispatchEvent::LaunchFailed {
                        index,
                        error: e.to_string(),
                    });
                }
            }
            self.notify(state).await;
        }
        Ok(progressed)
    }

    /// Forward newly appended log lines of every active task to the console.
    async fn pump_output(&mut self, state: &mut RunState) {
        for task in state.active_mut() {
            if let Some(chunk) = task.tailer.poll().await {
                for line in task.lines.push(&chunk) {
                    self.bar.print_line(&format!("[{}] {}", task.label, line));
                }
            }
        }
    }

    /// Complete tasks whose process exited or ran out of time.
    async fn reap(&mut self, state: &mut RunState) -> Result<bool> {
        let now = Instant::now();
        let mut exits = Vec::new();
        for task in state.active_mut() {
            match task.child.try_wait() {
                Ok(Some(status)) => exits.push((task.index, Exit::Code(status.code().unwrap_or(-1)))),
                Ok(None) => {
                    if self.settings.limits.task_expired(task.started, now) {
                        exits.push((task.index, Exit::TimedOut(now - task.started)));
                    }
                }
                Err(e) => exits.push((task.index, Exit::WaitFailed(e.to_string()))),
            }
        }

        let reaped = !exits.is_empty();
        for (index, exit) in exits {
            let Some(mut task) = state.take_active(index) else {
                continue;
            };
            let exit_code = match exit {
                Exit::Code(code) => code,
                Exit::TimedOut(elapsed) => {
                    flog_warn!("Task {} ({}) timed out after {:?}", index, task.label, elapsed);
                    kill(&mut task, "task timeout exceeded").await;
                    self.emit(DispatchEvent::TaskTimedOut { index, elapsed });
                    -1
                }
                Exit::WaitFailed(err) => {
                    flog_warn!("Task {} ({}) could not be waited on: {}", index, task.label, err);
                    kill(&mut task, &format!("wait failed: {}", err)).await;
                    -1
                }
            };
            self.complete(state, task, exit_code).await?;
        }
        Ok(reaped)
    }

    /// Drain the remaining output, classify, and move the task to completed.
    async fn complete(
        &mut self,
        state: &mut RunState,
        mut task: ActiveTask,
        exit_code: i32,
    ) -> Result<()> {
        let rest = task.tailer.drain().await;
        for line in task.lines.push(&rest) {
            self.bar.print_line(&format!("[{}] {}", task.label, line));
        }
        if let Some(line) = task.lines.finish() {
            self.bar.print_line(&format!("[{}] {}", task.label, line));
        }

        let verdict = self
            .classifier
            .classify(exit_code, &task.tailer.transcript_text());
        let index = task.index;
        state.record_mut(index).finish(verdict.status)?;
        state.mark_completed(index);

        flog!(
            "Task {} ({}) finished: {} ({}), exit code {}, ran {:?}",
            index,
            task.label,
            verdict.status,
            verdict.reason,
            exit_code,
            task.started.elapsed()
        );
        self.bar.print_line(&format!(
            "[{}] {} ({})",
            task.label, verdict.status, verdict.reason
        ));
        self.emit(DispatchEvent::TaskFinished {
            index,
            status: verdict.status,
        });
        self.notify(state).await;
        Ok(())
    }

    /// Kill everything still running and fail everything still queued.
    async fn abort_remaining(&mut self, state: &mut RunState, reason: &str) -> Result<()> {
        flog_warn!(
            "Aborting run ({}): {} active, {} queued",
            reason,
            state.active_len(),
            state.queue_len()
        );
        let active: Vec<usize> = state.active_mut().iter().map(|t| t.index).collect();
        for index in active {
            let Some(mut task) = state.take_active(index) else {
                continue;
            };
            kill(&mut task, reason).await;
            self.complete(state, task, -1).await?;
        }

        while let Some(index) = state.pop_queued() {
            let log_path = self.allocate_log_path(state.record(index));
            append_note(&log_path, &format!("not started: {}", reason));
            state.record_mut(index).fail_unstarted(log_path)?;
            state.mark_completed(index);
            let label = state.record(index).identity.label();
            self.bar
                .print_line(&format!("[{}] Failure (not started: {})", label, reason));
            self.emit(DispatchEvent::TaskFinished {
                index,
                status: TaskStatus::Failure,
            });
            self.notify(state).await;
        }
        Ok(())
    }

    /// A fresh log path: identity, start time and the task's unique id.
    fn allocate_log_path(&self, record: &TaskRecord) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        self.settings.log_dir.join(format!(
            "{}-{}-{}.log",
            record.identity.file_stem(),
            stamp,
            record.id.short()
        ))
    }

    /// Persist the snapshot and refresh the status bar.
    async fn notify(&mut self, state: &RunState) {
        let records = state.records().to_vec();
        if let Err(e) = persist_blocking(Arc::clone(&self.sink), records).await {
            flog_error!("Snapshot persist failed, continuing in memory: {}", e);
        }
        debug_assert!(state.check_partition());
        self.bar.render(&state.counts());
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                flog_debug!("Dispatch event dropped: {}", e);
            }
        }
    }
}

/// Kill a task's process group and note why in its log.
async fn kill(task: &mut ActiveTask, reason: &str) {
    if let Err(e) = terminate(&mut task.child).await {
        flog_warn!("Kill of task {} failed: {}", task.index, e);
    }
    append_note(task.tailer.path(), &format!("killed: {}", reason));
}

/// Best-effort line appended to a task log on ferry's behalf.
fn append_note(path: &Path, note: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "\n[ferry] {}", note));
    if let Err(e) = result {
        flog_debug!("Could not annotate {}: {}", path.display(), e);
    }
}
