//! Status snapshot: the full task table, rewritten after every transition.
//!
//! The table is written to a sibling temporary file and renamed over the
//! previous snapshot, so a reader sees either the old or the new table in
//! full, never a torn row.

use csv::StringRecord;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{TaskIdentity, TaskRecord, TaskStatus, REQUIRED_COLUMNS, RESERVED_COLUMNS};
use crate::error::{Error, Result};
use crate::flog_debug;

/// Persists the complete set of task records.
///
/// Called from a blocking thread after every status change. Errors are
/// reported to the caller, which logs them and carries on.
pub trait SnapshotSink: Send + Sync {
    fn persist(&self, records: &[TaskRecord]) -> Result<()>;
}

/// One snapshot row: the task-source columns plus status and log path.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub org: String,
    pub teamproject: String,
    pub repo: String,
    pub github_org: String,
    pub github_repo: String,
    pub gh_repo_visibility: String,
    /// Extra task source columns, (header, value) in source order.
    pub extra: Vec<(String, String)>,
    pub status: String,
    pub log_path: String,
}

impl From<&TaskRecord> for SnapshotRow {
    fn from(record: &TaskRecord) -> Self {
        let id = &record.identity;
        Self {
            org: id.source_org.clone(),
            teamproject: id.source_project.clone(),
            repo: id.source_repo.clone(),
            github_org: id.target_org.clone(),
            github_repo: id.target_repo.clone(),
            gh_repo_visibility: id.visibility.to_string(),
            extra: id.extra.clone(),
            status: record.status().to_string(),
            log_path: record
                .log_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

impl SnapshotRow {
    /// Field values in header order. Extra columns this row lacks are blank.
    fn fields<'a>(&'a self, extra_columns: &[String]) -> Vec<&'a str> {
        let mut fields = vec![
            self.org.as_str(),
            self.teamproject.as_str(),
            self.repo.as_str(),
            self.github_org.as_str(),
            self.github_repo.as_str(),
            self.gh_repo_visibility.as_str(),
        ];
        for column in extra_columns {
            let value = self
                .extra
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, v)| v.as_str())
                .unwrap_or_default();
            fields.push(value);
        }
        fields.push(self.status.as_str());
        fields.push(self.log_path.as_str());
        fields
    }

    /// Parse one data row against the snapshot header.
    fn parse(headers: &StringRecord, record: &StringRecord) -> Result<Self> {
        let column = |name: &str| -> Result<String> {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|i| record.get(i))
                .map(str::to_string)
                .ok_or_else(|| Error::MissingColumns {
                    missing: vec![name.to_string()],
                })
        };
        let extra = headers
            .iter()
            .zip(record.iter())
            .filter(|(h, _)| !REQUIRED_COLUMNS.contains(h) && !RESERVED_COLUMNS.contains(h))
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        Ok(Self {
            org: column("org")?,
            teamproject: column("teamproject")?,
            repo: column("repo")?,
            github_org: column("github_org")?,
            github_repo: column("github_repo")?,
            gh_repo_visibility: column("gh_repo_visibility")?,
            extra,
            status: column("status")?,
            log_path: column("log_path")?,
        })
    }

    /// Rebuild the record this row was written from.
    pub fn into_record(self) -> Result<TaskRecord> {
        let identity = TaskIdentity {
            source_org: self.org,
            source_project: self.teamproject,
            source_repo: self.repo,
            target_org: self.github_org,
            target_repo: self.github_repo,
            visibility: self.gh_repo_visibility.parse()?,
            extra: self.extra,
        };
        let status: TaskStatus = self.status.parse()?;
        let log_path = (!self.log_path.is_empty()).then(|| PathBuf::from(self.log_path));
        TaskRecord::restored(identity, status, log_path)
    }
}

/// Extra column names across all records, in first-seen order.
fn extra_columns(records: &[TaskRecord]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for (name, _) in &record.identity.extra {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// Serialize records as a CSV table: the required source columns, any extra
/// source columns, then `status` and `log_path`.
pub fn render_table(records: &[TaskRecord]) -> Result<Vec<u8>> {
    let extra = extra_columns(records);
    let mut wtr = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = REQUIRED_COLUMNS.to_vec();
    header.extend(extra.iter().map(String::as_str));
    header.extend(RESERVED_COLUMNS);
    wtr.write_record(&header)?;

    for record in records {
        wtr.write_record(SnapshotRow::from(record).fields(&extra))?;
    }
    wtr.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// Read a snapshot back into records.
pub fn read_snapshot(path: &Path) -> Result<Vec<TaskRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    rdr.records()
        .map(|record| SnapshotRow::parse(&headers, &record?)?.into_record())
        .collect()
}

/// Snapshot written to a CSV file with atomic replace.
#[derive(Debug, Clone)]
pub struct CsvSnapshot {
    path: PathBuf,
}

impl CsvSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotSink for CsvSnapshot {
    fn persist(&self, records: &[TaskRecord]) -> Result<()> {
        let contents = render_table(records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;
        flog_debug!(
            "Snapshot saved: {} ({} rows)",
            self.path.display(),
            records.len()
        );
        Ok(())
    }
}
