//! Time limits for tasks and for the whole run.
//!
//! Neither limit has a default: a migration that legitimately takes hours must
//! not be killed unless the operator asked for it. When a limit is configured
//! and exceeded, the dispatcher kills the process, records `Failure`, and
//! frees the slot.

use std::time::{Duration, Instant};

/// Default pause between loop iterations that made no progress.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeLimits {
    /// Longest a single task may run.
    pub task: Option<Duration>,
    /// Longest the whole run may take, queue included.
    pub run: Option<Duration>,
}

impl TimeLimits {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task = Some(timeout);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run = Some(timeout);
        self
    }

    /// Whether a task started at `started` has outlived its limit.
    pub fn task_expired(&self, started: Instant, now: Instant) -> bool {
        self.task
            .is_some_and(|limit| now.saturating_duration_since(started) >= limit)
    }

    /// The instant the run must stop, given when it began.
    ///
    /// A limit too large to represent as an `Instant` means no deadline.
    pub fn run_deadline(&self, run_started: Instant) -> Option<Instant> {
        self.run.and_then(|limit| run_started.checked_add(limit))
    }
}
