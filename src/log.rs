//! Diagnostic logging for ferry.
//!
//! Per-task executor output lives in each task's own log file and is streamed
//! to the console. This module covers ferry's own diagnostics, written to
//! `ferry.log` inside the run's log directory.
//!
//! Log levels:
//! - ERROR: failures that stop an operation (snapshot unwritable, launch failed)
//! - WARN: recoverable surprises (timeouts, kill failures, missing executor)
//! - INFO: run lifecycle and task transitions
//! - DEBUG: loop iterations, tailer reads, persistence timings
//! - TRACE: raw chunk sizes
//!
//! Debug mode is enabled with `--debug` or `FERRY_DEBUG=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log file name inside the run's log directory.
pub const LOG_FILE_NAME: &str = "ferry.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Whether `FERRY_DEBUG` asks for debug output.
fn env_debug() -> bool {
    std::env::var("FERRY_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Start logging into `dir/ferry.log`, appending to any earlier run's log.
///
/// Only the first call picks the destination; later calls just adjust the level.
pub fn init(dir: Option<PathBuf>, debug: bool) {
    let level = if debug || env_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    set_level(level);

    if let Some(dir) = dir {
        let _ = std::fs::create_dir_all(&dir);
        LOG_PATH.set(dir.join(LOG_FILE_NAME)).ok();
    }
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Path of the diagnostic log, once initialized.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log at INFO level.
#[macro_export]
macro_rules! flog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! flog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
