//! Run state: the partition of all tasks into queued, active and completed.
//!
//! Owned and mutated only by the dispatcher loop. Every task index lives in
//! exactly one of the three collections for the whole run.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::process::Child;

use crate::core::{TaskIdentity, TaskRecord, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::tailer::{LineSplitter, LogTailer};

/// Validated concurrency cap, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct MaxConcurrent(usize);

impl MaxConcurrent {
    pub const MIN: usize = 1;
    pub const MAX: usize = 5;

    pub fn new(value: usize) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidConcurrency(value))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for MaxConcurrent {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MaxConcurrent> for usize {
    fn from(value: MaxConcurrent) -> Self {
        value.0
    }
}

/// A task with a live process.
#[derive(Debug)]
pub struct ActiveTask {
    pub index: usize,
    /// Prefix for this task's console lines.
    pub label: String,
    pub child: Child,
    pub tailer: LogTailer,
    pub lines: LineSplitter,
    pub started: Instant,
}

/// Counts per state, handed to the status bar and the summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.success + self.failure
    }
}

/// Final tally of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total: {}, Success: {}, Failure: {}",
            self.total, self.success, self.failure
        )
    }
}

#[derive(Debug)]
pub struct RunState {
    records: Vec<TaskRecord>,
    queue: VecDeque<usize>,
    active: Vec<ActiveTask>,
    completed: Vec<usize>,
}

impl RunState {
    /// Queue every task in source order.
    pub fn new(tasks: Vec<TaskIdentity>) -> Self {
        let records: Vec<TaskRecord> = tasks.into_iter().map(TaskRecord::new).collect();
        let queue = (0..records.len()).collect();
        Self {
            records,
            queue,
            active: Vec::new(),
            completed: Vec::new(),
        }
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> &TaskRecord {
        &self.records[index]
    }

    pub(crate) fn record_mut(&mut self, index: usize) -> &mut TaskRecord {
        &mut self.records[index]
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn has_capacity(&self, max: MaxConcurrent) -> bool {
        self.active.len() < max.get()
    }

    /// True once nothing is queued or running.
    pub fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty()
    }

    /// Take the next task in FIFO order.
    pub(crate) fn pop_queued(&mut self) -> Option<usize> {
        self.queue.pop_front()
    }

    pub(crate) fn push_active(&mut self, task: ActiveTask) {
        self.active.push(task);
    }

    pub(crate) fn active_mut(&mut self) -> &mut [ActiveTask] {
        &mut self.active
    }

    /// Remove an active task by its task index.
    pub(crate) fn take_active(&mut self, index: usize) -> Option<ActiveTask> {
        let pos = self.active.iter().position(|a| a.index == index)?;
        Some(self.active.swap_remove(pos))
    }

    pub(crate) fn mark_completed(&mut self, index: usize) {
        self.completed.push(index);
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts {
            pending: self.queue.len(),
            running: self.active.len(),
            ..Default::default()
        };
        for &i in &self.completed {
            match self.records[i].status() {
                TaskStatus::Success => counts.success += 1,
                _ => counts.failure += 1,
            }
        }
        counts
    }

    pub fn summary(&self) -> RunSummary {
        let counts = self.counts();
        RunSummary {
            total: self.records.len(),
            success: counts.success,
            failure: counts.failure,
        }
    }

    /// Check that queue, active and completed partition the task set and agree
    /// with each record's status.
    pub fn check_partition(&self) -> bool {
        let mut seen = vec![false; self.records.len()];
        let members = self
            .queue
            .iter()
            .map(|&i| (i, Place::Queued))
            .chain(self.active.iter().map(|a| (a.index, Place::Active)))
            .chain(self.completed.iter().map(|&i| (i, Place::Completed)));
        for (i, place) in members {
            if i >= seen.len() || seen[i] {
                return false;
            }
            seen[i] = true;
            let record = &self.records[i];
            let status_ok = match place {
                Place::Queued => record.status() == TaskStatus::Pending,
                Place::Active => record.status() == TaskStatus::Running,
                Place::Completed => record.status().is_terminal(),
            };
            let log_ok = (record.status() == TaskStatus::Pending) == record.log_path().is_none();
            if !status_ok || !log_ok {
                return false;
            }
        }
        seen.into_iter().all(|s| s)
    }
}

#[derive(Clone, Copy)]
enum Place {
    Queued,
    Active,
    Completed,
}
