//! Task data model.
//!
//! A task is one repository migration: a source repository identity paired
//! with a destination. The identity never changes after it is read from the
//! task source; only the dispatcher moves a record through its statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a task within a run.
///
/// Identities may repeat in a task source, so records are keyed by a
/// generated UUID rather than by their fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility of the destination repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
            Visibility::Internal => "internal",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            "internal" => Ok(Visibility::Internal),
            other => Err(Error::Config(format!(
                "unknown visibility '{}', expected private, public or internal",
                other
            ))),
        }
    }
}

/// The immutable fields naming a migration's source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub source_org: String,
    pub source_project: String,
    pub source_repo: String,
    pub target_org: String,
    pub target_repo: String,
    pub visibility: Visibility,
    /// Task source columns beyond the required six, as (header, value) pairs
    /// in source order. Carried through to the snapshot untouched.
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl TaskIdentity {
    /// Short human label, used to prefix streamed output lines.
    pub fn label(&self) -> String {
        format!("{}/{}", self.source_project, self.source_repo)
    }

    /// Filesystem-safe stem built from the identity.
    pub fn file_stem(&self) -> String {
        let raw = format!(
            "{}-{}-{}",
            self.source_org, self.source_project, self.source_repo
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Executor launched and not yet classified.
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failure => "Failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Running" => Ok(TaskStatus::Running),
            "Success" => Ok(TaskStatus::Success),
            "Failure" => Ok(TaskStatus::Failure),
            other => Err(Error::Config(format!("unknown task status '{}'", other))),
        }
    }
}

/// One unit of work and its mutable status.
///
/// The log path is set exactly when the record leaves `Pending`, so it is
/// present iff the status is Running, Success or Failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub identity: TaskIdentity,
    status: TaskStatus,
    log_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(identity: TaskIdentity) -> Self {
        Self {
            id: TaskId::new(),
            identity,
            status: TaskStatus::Pending,
            log_path: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Rebuild a record read back from a snapshot.
    pub fn restored(
        identity: TaskIdentity,
        status: TaskStatus,
        log_path: Option<PathBuf>,
    ) -> Result<Self> {
        if (status == TaskStatus::Pending) != log_path.is_none() {
            return Err(Error::Config(format!(
                "{} record for {} has inconsistent log path",
                status,
                identity.label()
            )));
        }
        Ok(Self {
            status,
            log_path,
            ..Self::new(identity)
        })
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Pending -> Running, binding the record to its log file.
    pub(crate) fn start(&mut self, log_path: PathBuf) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.log_path = Some(log_path);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Success/Failure.
    pub(crate) fn finish(&mut self, outcome: TaskStatus) -> Result<()> {
        if !outcome.is_terminal() {
            return Err(self.invalid(outcome));
        }
        self.transition(outcome)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Pending -> Failure for a task that never got a running process.
    ///
    /// The record still receives a log path, which holds the reason.
    pub(crate) fn fail_unstarted(&mut self, log_path: PathBuf) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid(TaskStatus::Failure));
        }
        let now = Utc::now();
        self.status = TaskStatus::Failure;
        self.log_path = Some(log_path);
        self.started_at = Some(now);
        self.finished_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failure)
        );
        if !allowed {
            return Err(self.invalid(to));
        }
        self.status = to;
        Ok(())
    }

    fn invalid(&self, to: TaskStatus) -> Error {
        Error::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}
