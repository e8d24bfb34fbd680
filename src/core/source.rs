//! Task source: the CSV listing which repositories to migrate.

use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use crate::core::task::{TaskIdentity, Visibility};
use crate::error::{Error, Result};
use crate::flog_debug;

/// Header names every task source must carry, in snapshot column order.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "org",
    "teamproject",
    "repo",
    "github_org",
    "github_repo",
    "gh_repo_visibility",
];

#[derive(Debug, Deserialize)]
struct SourceRow {
    org: String,
    teamproject: String,
    repo: String,
    github_org: String,
    github_repo: String,
    gh_repo_visibility: String,
}

/// Load task identities from a CSV file.
///
/// Every failure here is a configuration error and happens before any task
/// is started.
pub fn load_tasks(path: &Path) -> Result<Vec<TaskIdentity>> {
    flog_debug!("load_tasks path={}", path.display());
    let file = std::fs::File::open(path).map_err(|e| {
        Error::Config(format!("cannot open task source {}: {}", path.display(), e))
    })?;
    read_tasks(file)
}

/// Snapshot columns a task source may not reuse for its own data.
pub const RESERVED_COLUMNS: [&str; 2] = ["status", "log_path"];

/// Parse task identities from any CSV reader.
///
/// Columns beyond `REQUIRED_COLUMNS` are kept on each identity in source
/// order so the snapshot can reproduce them.
pub fn read_tasks<R: Read>(reader: R) -> Result<Vec<TaskIdentity>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingColumns { missing });
    }
    if let Some(reserved) = headers.iter().find(|h| RESERVED_COLUMNS.contains(h)) {
        return Err(Error::Config(format!(
            "task source column '{}' is reserved for the status snapshot",
            reserved
        )));
    }
    let extra_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !REQUIRED_COLUMNS.contains(h))
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut tasks = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        // Row numbers count the header as row 1.
        let row_no = i + 2;
        let invalid = |e: csv::Error| Error::InvalidRow {
            row: row_no,
            message: e.to_string(),
        };
        let record = record.map_err(invalid)?;
        let row: SourceRow = record.deserialize(Some(&headers)).map_err(invalid)?;
        let extra = extra_columns
            .iter()
            .map(|(idx, name)| (name.clone(), record.get(*idx).unwrap_or_default().to_string()))
            .collect();
        tasks.push(identity_from_row(row, extra, row_no)?);
    }

    if tasks.is_empty() {
        return Err(Error::EmptyTaskList);
    }
    flog_debug!(
        "Task source loaded: {} tasks, {} extra columns",
        tasks.len(),
        extra_columns.len()
    );
    Ok(tasks)
}

fn identity_from_row(
    row: SourceRow,
    extra: Vec<(String, String)>,
    row_no: usize,
) -> Result<TaskIdentity> {
    let required = [
        ("org", &row.org),
        ("teamproject", &row.teamproject),
        ("repo", &row.repo),
        ("github_org", &row.github_org),
        ("github_repo", &row.github_repo),
    ];
    if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
        return Err(Error::InvalidRow {
            row: row_no,
            message: format!("column '{}' is empty", name),
        });
    }

    let visibility: Visibility =
        row.gh_repo_visibility
            .parse()
            .map_err(|e: Error| Error::InvalidRow {
                row: row_no,
                message: e.to_string(),
            })?;

    Ok(TaskIdentity {
        source_org: row.org,
        source_project: row.teamproject,
        source_repo: row.repo,
        target_org: row.github_org,
        target_repo: row.github_repo,
        visibility,
        extra,
    })
}
