//! Structured run log for replay sessions.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required and optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - [`validate_log_line`]: validates a single JSONL line against the contract.
//! - [`validate_log_file`]: validates an entire JSONL file.
//!
//! Required fields are `timestamp`, `trace_id`, `level`, `event`. Entries that
//! carry a `decision` must also carry `time_hours` and `snapshot`; gate
//! outcomes (`Rejected`, `Recovered`) additionally carry `gate_metrics` and
//! `plan`. Snapshot scalars must lie in [0, 1].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use twinguard_core::{AnomalyCause, GateMetrics, RecoveryPlan, StabilitySnapshot};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Pipeline decision recorded for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Nominal,
    Anomaly,
    Rejected,
    Recovered,
}

const DECISIONS: [&str; 4] = ["Nominal", "Anomaly", "Rejected", "Recovered"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Telemetry timestamp of the sample this entry describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<AnomalyCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StabilitySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_metrics: Option<GateMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RecoveryPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            time_hours: None,
            decision: None,
            cause: None,
            snapshot: None,
            gate_metrics: None,
            plan: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_time_hours(mut self, t: f64) -> Self {
        self.time_hours = Some(t);
        self
    }

    /// Decision plus the snapshot it was taken on.
    #[must_use]
    pub fn with_decision(mut self, decision: Decision, snapshot: StabilitySnapshot) -> Self {
        self.decision = Some(decision);
        self.snapshot = Some(snapshot);
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: AnomalyCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Plan submitted to the gate and the metrics it was judged on.
    #[must_use]
    pub fn with_gate(mut self, plan: RecoveryPlan, metrics: Option<GateMetrics>) -> Self {
        self.plan = Some(plan);
        self.gate_metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

enum Sink {
    File(BufWriter<File>),
    Buffer(Vec<u8>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::File(w) => w,
            Self::Buffer(b) => b,
        }
    }
}

/// Writes entries as JSONL, stamping `trace_id` as `<run_id>::<seq>`.
pub struct LogEmitter {
    sink: Sink,
    seq: u64,
    run_id: String,
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl LogEmitter {
    /// Emitter that truncates and writes `path`.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            seq: 0,
            run_id: run_id.to_string(),
        })
    }

    /// Emitter that keeps lines in memory; read them with [`LogEmitter::buffered_lines`].
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn entries_written(&self) -> u64 {
        self.seq
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:03}", self.run_id, self.seq)
    }

    /// Emit an entry carrying only the required fields.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(String::new(), level, event);
        self.emit_entry(entry)
    }

    /// Emit `entry`, filling `trace_id` and `run_id` when unset.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<LogEntry> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        } else {
            self.seq += 1;
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.sink.writer(), "{line}")?;
        Ok(entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.sink.writer().flush()
    }

    /// Lines held by a buffer emitter; empty for file emitters.
    #[must_use]
    pub fn buffered_lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Buffer(bytes) => String::from_utf8_lossy(bytes)
                .lines()
                .map(str::to_string)
                .collect(),
            Sink::File(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: field '{field}': {message}")]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl LogValidationError {
    fn new(line_number: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            line_number,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a single JSONL line, returning the parsed entry when it conforms.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError::new(line_number, "<json>", format!("invalid JSON: {e}")));
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError::new(line_number, "<root>", "expected JSON object"));
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError::new(line_number, field, "required field missing"));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LEVELS.contains(&level)
    {
        errors.push(LogValidationError::new(line_number, "level", format!("invalid level: '{level}'")));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(LogValidationError::new(
            line_number,
            "trace_id",
            format!("trace_id should follow <run_id>::<seq> format, got: '{trace_id}'"),
        ));
    }

    if let Some(t) = obj.get("time_hours")
        && !t.as_f64().is_some_and(f64::is_finite)
    {
        errors.push(LogValidationError::new(line_number, "time_hours", "must be a finite number"));
    }

    match obj.get("decision").map(|v| v.as_str()) {
        None => {}
        Some(None) => {
            errors.push(LogValidationError::new(line_number, "decision", "must be a string"));
        }
        Some(Some(decision)) if !DECISIONS.contains(&decision) => {
            errors.push(LogValidationError::new(
                line_number,
                "decision",
                format!("invalid decision: '{decision}'"),
            ));
        }
        Some(Some(decision)) => {
            // Decision events must be reproducible from the record alone.
            for field in ["time_hours", "snapshot"] {
                if !obj.contains_key(field) {
                    errors.push(LogValidationError::new(
                        line_number,
                        field,
                        format!("{decision} events must include {field}"),
                    ));
                }
            }
            if matches!(decision, "Rejected" | "Recovered") {
                for field in ["gate_metrics", "plan"] {
                    if !obj.get(field).is_some_and(serde_json::Value::is_object) {
                        errors.push(LogValidationError::new(
                            line_number,
                            field,
                            format!("{decision} events must include {field} object"),
                        ));
                    }
                }
            }
        }
    }

    if let Some(snapshot) = obj.get("snapshot") {
        check_snapshot(snapshot, line_number, &mut errors);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(LogValidationError::new(
                line_number,
                "<deserialization>",
                format!("failed to deserialize: {e}"),
            ));
            Err(errors)
        }
    }
}

/// Snapshot scalars and the last fused signal must lie in [0, 1].
fn check_snapshot(snapshot: &serde_json::Value, line_number: usize, errors: &mut Vec<LogValidationError>) {
    let Some(obj) = snapshot.as_object() else {
        errors.push(LogValidationError::new(line_number, "snapshot", "expected JSON object"));
        return;
    };
    let mut unit = |value: Option<&serde_json::Value>, field: &str| match value.and_then(|v| v.as_f64()) {
        Some(x) if (0.0..=1.0).contains(&x) => {}
        Some(x) => errors.push(LogValidationError::new(line_number, field, format!("{x} outside [0, 1]"))),
        None => errors.push(LogValidationError::new(line_number, field, "must be a number")),
    };
    unit(obj.get("integrity"), "snapshot.integrity");
    unit(obj.get("twist"), "snapshot.twist");
    match obj.get("last_signal") {
        None | Some(serde_json::Value::Null) => {}
        Some(signal) => {
            for (key, field) in [
                ("psi", "snapshot.last_signal.psi"),
                ("gamma", "snapshot.last_signal.gamma"),
                ("omega", "snapshot.last_signal.omega"),
            ] {
                unit(signal.get(key), field);
            }
        }
    }
}

/// Validate an entire JSONL file. Returns the non-blank line count and every
/// violation found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub(crate) fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )
}

/// Proleptic Gregorian date for a day count relative to 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
