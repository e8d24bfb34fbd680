//! Core domain models: migration tasks and the task source they come from.

pub mod source;
pub mod task;

pub use source::{load_tasks, read_tasks, REQUIRED_COLUMNS, RESERVED_COLUMNS};
pub use task::{TaskId, TaskIdentity, TaskRecord, TaskStatus, Visibility};
