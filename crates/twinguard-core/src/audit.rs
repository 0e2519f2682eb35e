//! Append-only audit logs.
//!
//! Every stability ingest and every evaluated gate decision appends one JSON
//! line. Appends are best-effort: a failed write is reported as
//! [`AuditStatus::Failed`] and counted, but never interrupts the pipeline.
//! Files are opened in append mode on first use; creating the parent
//! directory is the caller's job.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default stability audit file name.
pub const STABILITY_LOG_FILE: &str = "flight_recorder.jsonl";
/// Default gate audit file name.
pub const GATE_LOG_FILE: &str = "omega_gate.jsonl";

/// Outcome of a single append. Callers may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Written,
    Disabled,
    Failed(io::ErrorKind),
}

impl AuditStatus {
    #[must_use]
    pub const fn is_written(self) -> bool {
        matches!(self, Self::Written)
    }
}

/// One stability tracker record. Signal fields are `None` before the first
/// fused signal has been ingested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityRecord {
    pub psi: Option<f64>,
    pub gamma: Option<f64>,
    pub omega: Option<f64>,
    pub weave_integrity: f64,
    pub twist: f64,
}

/// One safety gate record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    #[serde(rename = "V")]
    pub validity: f64,
    #[serde(rename = "O")]
    pub oversight: f64,
    #[serde(rename = "E")]
    pub envelope: f64,
    #[serde(rename = "L")]
    pub leak: f64,
    pub export_allowed: bool,
}

#[derive(Debug)]
enum Target {
    File { path: PathBuf, file: Option<File> },
    Memory(Vec<String>),
    Disabled,
}

/// A JSONL audit sink. Appends from multiple threads are serialized.
#[derive(Debug)]
pub struct AuditLog {
    target: Mutex<Target>,
    written: AtomicU64,
    failures: AtomicU64,
}

impl AuditLog {
    fn with_target(target: Target) -> Self {
        Self {
            target: Mutex::new(target),
            written: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Append to `path`, opening it lazily on the first record.
    #[must_use]
    pub fn append_to(path: impl Into<PathBuf>) -> Self {
        Self::with_target(Target::File {
            path: path.into(),
            file: None,
        })
    }

    /// Keep records in memory (tests, embedding).
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_target(Target::Memory(Vec::new()))
    }

    /// Drop every record.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_target(Target::Disabled)
    }

    /// Serialize `record` as one JSON line and append it.
    pub fn append<T: Serialize>(&self, record: &T) -> AuditStatus {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => return self.record_failure(None, &io::Error::other(err)),
        };

        let mut target = self.target.lock();
        let result = match &mut *target {
            Target::Disabled => return AuditStatus::Disabled,
            Target::Memory(lines) => {
                lines.push(line);
                Ok(())
            }
            Target::File { path, file } => append_line(path, file, &line),
        };
        let path = match &*target {
            Target::File { path, .. } => Some(path.clone()),
            _ => None,
        };
        drop(target);

        match result {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                AuditStatus::Written
            }
            Err(err) => self.record_failure(path.as_deref(), &err),
        }
    }

    fn record_failure(&self, path: Option<&Path>, err: &io::Error) -> AuditStatus {
        let previous = self.failures.fetch_add(1, Ordering::Relaxed);
        let shown = path.map(|p| p.display().to_string()).unwrap_or_default();
        if previous == 0 {
            tracing::warn!(path = %shown, error = %err, "audit append failed; continuing without record");
        } else {
            tracing::debug!(path = %shown, error = %err, failures = previous + 1, "audit append failed");
        }
        AuditStatus::Failed(err.kind())
    }

    /// File path for file-backed logs.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.target.lock() {
            Target::File { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    /// Lines held by an in-memory log; empty for other targets.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match &*self.target.lock() {
            Target::Memory(lines) => lines.clone(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::disabled()
    }
}

fn append_line(path: &Path, slot: &mut Option<File>, line: &str) -> io::Result<()> {
    if slot.is_none() {
        *slot = Some(OpenOptions::new().create(true).append(true).open(path)?);
    }
    let Some(file) = slot.as_mut() else {
        return Err(io::Error::other("audit file handle unavailable"));
    };
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    let result = file.write_all(buf.as_bytes());
    if result.is_err() {
        // Reopen on the next record.
        *slot = None;
    }
    result
}
