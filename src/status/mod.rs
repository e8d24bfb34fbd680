//! Run status outputs: the persisted snapshot table and the live console line.

pub mod bar;
pub mod snapshot;

pub use bar::StatusBar;
pub use snapshot::{read_snapshot, render_table, CsvSnapshot, SnapshotRow, SnapshotSink};

use std::sync::Arc;
use tokio::task::spawn_blocking;

use crate::core::TaskRecord;
use crate::{Error, Result};

/// Write a snapshot on the blocking pool so the control loop's runtime thread
/// never performs file I/O itself.
pub async fn persist_blocking(sink: Arc<dyn SnapshotSink>, records: Vec<TaskRecord>) -> Result<()> {
    spawn_blocking(move || sink.persist(&records))
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}
