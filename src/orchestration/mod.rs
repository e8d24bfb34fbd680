//! Orchestration layer: the dispatcher and the pieces it drives.
//!
//! The dispatcher launches tasks through a `TaskExecutor`, streams their logs
//! with a `LogTailer`, and settles each finished task with the
//! `CompletionClassifier`.

pub mod classifier;
pub mod dispatcher;
pub mod executor;
pub mod run_state;
pub mod tailer;
pub mod timeouts;

pub use classifier::{CompletionClassifier, Markers, Reason, Verdict};
pub use dispatcher::{DispatchEvent, DispatchSettings, Dispatcher};
pub use executor::{terminate, CommandExecutor, ExecutorConfig, TaskExecutor};
pub use run_state::{MaxConcurrent, RunCounts, RunState, RunSummary};
pub use tailer::{LineSplitter, LogCursor, LogTailer};
pub use timeouts::{TimeLimits, DEFAULT_POLL_INTERVAL_SECS};
