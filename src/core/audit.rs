//! Append-only lifecycle audit log (`lifecycle.events.jsonl`).
//!
//! Every job lifecycle mutation leaves one line here next to the collections
//! it touched. The log is advisory: a failed append is reported through
//! `tracing` and never fails the mutation it describes.

use crate::core::error::MissionctlError;
use crate::core::lock::{self, LockMode};
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const AUDIT_LOG_NAME: &str = "lifecycle.events.jsonl";
const AUDIT_LOCK_NAME: &str = "lifecycle.events.lock";
const AUDIT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub job_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AuditLog {
    pub fn new(data_root: &Path) -> Self {
        Self {
            path: data_root.join(AUDIT_LOG_NAME),
            lock_path: data_root.join(AUDIT_LOCK_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, op: &str, job_id: Option<&str>, status: &str, detail: serde_json::Value) {
        let ev = LifecycleEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            job_id: job_id.map(|s| s.to_string()),
            status: status.to_string(),
            detail,
        };
        if let Err(e) = self.append(&ev) {
            tracing::warn!(op, error = %e, "failed to append lifecycle audit event");
        }
    }

    /// One event, one `write_all` of the whole line, under the log's own
    /// exclusive lock so concurrent appenders never merge lines.
    fn append(&self, ev: &LifecycleEvent) -> Result<(), MissionctlError> {
        let mut line = serde_json::to_string(ev)?;
        line.push('\n');
        let _guard = lock::acquire(
            &self.lock_path,
            "lifecycle.events",
            LockMode::Exclusive,
            AUDIT_LOCK_TIMEOUT,
        )?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(MissionctlError::IoError)?;
        f.write_all(line.as_bytes()).map_err(MissionctlError::IoError)
    }

    /// Events in append order; unreadable lines are skipped.
    pub fn events(&self) -> Result<Vec<LifecycleEvent>, MissionctlError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MissionctlError::IoError(e)),
        };
        Ok(raw
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
