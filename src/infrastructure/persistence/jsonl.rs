//! Append-only JSONL persistence. Two logs exist: the incident/audit log
//! and the opportunity/execution history log. Records carry a monotonic
//! sequence number and are flushed on every append.

use crate::domain::ports::AuditSink;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub ts: i64,
    pub category: String,
    pub payload: serde_json::Value,
}

struct LogInner {
    writer: BufWriter<File>,
    next_seq: u64,
}

/// Append-only JSONL log with a monotonic sequence number. Reopening an
/// existing file resumes the sequence after the last persisted record.
pub struct JsonlLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl JsonlLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let next_seq = match Self::read_all_from(&path) {
            Ok(records) => records.last().map(|r| r.seq + 1).unwrap_or(0),
            Err(_) => 0,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log {}", path.display()))?;

        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                writer: BufWriter::new(file),
                next_seq,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush. Returns the assigned sequence number.
    pub fn append(&self, ts: i64, category: &str, payload: serde_json::Value) -> Result<u64> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = LogRecord {
            seq: inner.next_seq,
            ts,
            category: category.to_string(),
            payload,
        };
        let line = serde_json::to_string(&record).context("Failed to serialize log record")?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.next_seq += 1;
        Ok(record.seq)
    }

    /// Replay every record in sequence order.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        // Flush buffered writes so the reader sees them.
        {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.writer.flush()?;
        }
        Self::read_all_from(&self.path)
    }

    fn read_all_from(path: &Path) -> Result<Vec<LogRecord>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord =
                serde_json::from_str(&line).context("Corrupt record in JSONL log")?;
            records.push(record);
        }
        Ok(records)
    }
}

impl AuditSink for JsonlLog {
    fn record(&self, category: &str, payload: serde_json::Value) -> Result<()> {
        self.append(chrono::Utc::now().timestamp_millis(), category, payload)?;
        Ok(())
    }
}
