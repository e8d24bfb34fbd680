//! ferry: run a batch of repository migrations with bounded concurrency.
//!
//! Tasks come from a CSV task source, each one is handed to an external
//! migration command, and the dispatcher keeps at most `max_concurrent` of
//! them running while streaming their logs, classifying their outcomes and
//! rewriting a status snapshot after every change.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod status;

pub use error::{Error, Result};
pub use orchestration::{Dispatcher, RunSummary};
