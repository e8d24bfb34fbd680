//! Incremental reads of a task's growing log file.
//!
//! The executor appends to the log; the tailer hands each appended byte to the
//! caller exactly once and in order. A missing file or a failed read just means
//! "nothing new yet": the cursor does not move, so the bytes are picked up on a
//! later poll.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{flog_debug, flog_trace};

/// Offset into a log already handed out. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    bytes_consumed: u64,
}

impl LogCursor {
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    fn advance(&mut self, n: u64) {
        self.bytes_consumed += n;
    }
}

/// Tails one task's log file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    cursor: LogCursor,
    transcript: Vec<u8>,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursor: LogCursor::default(),
            transcript: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> LogCursor {
        self.cursor
    }

    /// Everything emitted so far, in order.
    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Lossy UTF-8 view of the transcript, for classification.
    pub fn transcript_text(&self) -> String {
        String::from_utf8_lossy(&self.transcript).into_owned()
    }

    /// Return bytes appended since the last poll, or `None` if there are none.
    pub async fn poll(&mut self) -> Option<Vec<u8>> {
        match self.read_new().await {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => {
                flog_trace!("tail {} +{} bytes", self.path.display(), chunk.len());
                self.cursor.advance(chunk.len() as u64);
                self.transcript.extend_from_slice(&chunk);
                Some(chunk)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                flog_debug!("tail {} read deferred: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Poll until the file yields nothing more. Used once the writer has exited.
    pub async fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.poll().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    async fn read_new(&self) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        let consumed = self.cursor.bytes_consumed();
        if len <= consumed {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(consumed)).await?;
        let mut buf = Vec::with_capacity((len - consumed) as usize);
        file.take(len - consumed).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Reassembles complete lines from raw chunks so that concurrent tasks'
/// output interleaves at line boundaries on the console.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(pos + 1);
            let line = std::mem::replace(&mut self.partial, rest);
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Return the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        Some(decode_line(&line))
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
