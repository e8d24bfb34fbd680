//! Completion classification for finished migrations.
//!
//! The wrapped tool can exit 0 while the remote migration it queued is still
//! reported in a non-terminal state, so the success marker in the log is
//! authoritative and the exit code only ever narrows a success to a failure.

use serde::{Deserialize, Serialize};

use crate::core::TaskStatus;

/// Marker printed when the remote migration reached its succeeded state.
pub const DEFAULT_SUCCESS_MARKER: &str = "State: SUCCEEDED";

/// Marker printed when the tool decided there was nothing to migrate.
pub const DEFAULT_NO_OP_MARKER: &str = "No operation will be performed";

/// Textual markers searched for in a task's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    #[serde(default = "default_success")]
    pub success: String,
    #[serde(default = "default_no_op")]
    pub no_op: String,
}

fn default_success() -> String {
    DEFAULT_SUCCESS_MARKER.to_string()
}

fn default_no_op() -> String {
    DEFAULT_NO_OP_MARKER.to_string()
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            success: default_success(),
            no_op: default_no_op(),
        }
    }
}

/// Which rule decided a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The tool reported there was nothing to do.
    NoOperation,
    /// The success marker never appeared.
    MissingSuccessMarker,
    /// Marker present, process exited cleanly.
    Succeeded,
    /// Marker present, but the process exited with this code.
    NonZeroExit(i32),
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::NoOperation => write!(f, "no operation performed"),
            Reason::MissingSuccessMarker => write!(f, "success marker not found in log"),
            Reason::Succeeded => write!(f, "succeeded"),
            Reason::NonZeroExit(code) => write!(f, "exited with code {}", code),
        }
    }
}

/// Outcome of classifying one finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Always `Success` or `Failure`.
    pub status: TaskStatus,
    pub reason: Reason,
}

/// Turns an exit code and log text into a terminal status.
#[derive(Debug, Clone, Default)]
pub struct CompletionClassifier {
    markers: Markers,
}

impl CompletionClassifier {
    pub fn new(markers: Markers) -> Self {
        Self { markers }
    }

    /// Classify a finished task. Rules apply in order; the first match wins.
    pub fn classify(&self, exit_code: i32, log_text: &str) -> Verdict {
        let (status, reason) = if log_text.contains(&self.markers.no_op) {
            (TaskStatus::Failure, Reason::NoOperation)
        } else if !log_text.contains(&self.markers.success) {
            (TaskStatus::Failure, Reason::MissingSuccessMarker)
        } else if exit_code == 0 {
            (TaskStatus::Success, Reason::Succeeded)
        } else {
            (TaskStatus::Failure, Reason::NonZeroExit(exit_code))
        };
        Verdict { status, reason }
    }
}
