//! Integration test suite for ferry.
//!
//! These tests drive the dispatcher end to end against a small `sh` script
//! standing in for the migration command. The script's behavior is chosen by
//! the repository name, so a task source can mix successes, failures and
//! hangs without any network access.
//!
//! # Test Categories
//!
//! - `batch_run`: concurrency cap, FIFO start order, outcome classification
//! - `limits`: task and run timeouts, cancellation
//! - `snapshot_file`: the on-disk snapshot and the task source round trip

mod fixtures;

mod batch_run;
mod limits;
mod snapshot_file;
