//! Telemetry samples and pull-based replay sources.
//!
//! A source yields `(time_hours, channels)` samples one at a time and can be
//! restarted from the beginning. The only structural requirement on a replay
//! is the `time_hours` column; every other column is passed through as a
//! numeric channel. Cells that do not parse as finite numbers are dropped
//! from their sample rather than failing the stream.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural time axis column required in every CSV replay.
pub const TIME_COLUMN: &str = "time_hours";

/// Core temperature channel (K).
pub const CORE_TEMP_K: &str = "core_temp_K";
/// Primary loop pressure channel (MPa).
pub const PRIMARY_PRESSURE_MPA: &str = "primary_pressure_MPa";
/// Coolant flow channel (kg/s).
pub const FLOW_RATE_KG_S: &str = "flow_rate_kg_s";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry replay {path} has no header row")]
    EmptyInput { path: PathBuf },
    #[error("telemetry replay {path} must contain a '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
    #[error("line {line}: timestamp '{value}' is not a number")]
    BadTimestamp { line: usize, value: String },
    #[error("line {line}: timestamp {current} precedes previous sample at {previous}")]
    NonMonotonicTimestamp {
        line: usize,
        previous: f64,
        current: f64,
    },
}

/// One immutable telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    time_hours: f64,
    channels: BTreeMap<String, f64>,
}

impl TelemetrySample {
    /// A sample with no channels.
    #[must_use]
    pub fn new(time_hours: f64) -> Self {
        Self {
            time_hours,
            channels: BTreeMap::new(),
        }
    }

    /// Add a channel. Non-finite values are dropped.
    #[must_use]
    pub fn with_channel(mut self, name: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.channels.insert(name.into(), value);
        }
        self
    }

    #[must_use]
    pub fn time_hours(&self) -> f64 {
        self.time_hours
    }

    #[must_use]
    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels.get(name).copied()
    }

    #[must_use]
    pub fn channels(&self) -> &BTreeMap<String, f64> {
        &self.channels
    }
}

/// Pull interface over a finite, restartable telemetry stream.
pub trait TelemetrySource {
    /// Next sample, or `Ok(None)` once the stream is exhausted.
    fn next_sample(&mut self) -> Result<Option<TelemetrySample>, TelemetryError>;

    /// Rewind to the first sample.
    fn restart(&mut self) -> Result<(), TelemetryError>;
}

// ---------------------------------------------------------------------------
// CSV replay
// ---------------------------------------------------------------------------

/// Lazy CSV replay with a `time_hours` column.
pub struct CsvReplay {
    path: PathBuf,
    columns: Vec<String>,
    time_idx: usize,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    strict_order: bool,
    last_time: Option<f64>,
}

impl std::fmt::Debug for CsvReplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvReplay")
            .field("path", &self.path)
            .field("columns", &self.columns)
            .field("line_no", &self.line_no)
            .field("strict_order", &self.strict_order)
            .finish()
    }
}

impl CsvReplay {
    /// Open a replay and validate its header.
    ///
    /// Fails immediately if the file is missing, empty, or lacks the
    /// `time_hours` column.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        let mut lines = BufReader::new(File::open(&path)?).lines();
        let mut line_no = 0;

        let header = loop {
            match lines.next() {
                Some(line) => {
                    line_no += 1;
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(TelemetryError::EmptyInput { path }),
            }
        };

        let columns: Vec<String> = split_csv_line(header.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        let Some(time_idx) = columns.iter().position(|c| c == TIME_COLUMN) else {
            return Err(TelemetryError::MissingColumn {
                path,
                column: TIME_COLUMN.to_string(),
            });
        };

        Ok(Self {
            path,
            columns,
            time_idx,
            lines,
            line_no,
            strict_order: false,
            last_time: None,
        })
    }

    /// Reject rows whose timestamp goes backwards.
    #[must_use]
    pub fn with_strict_order(mut self, strict: bool) -> Self {
        self.strict_order = strict;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header columns other than the time axis.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.time_idx)
            .map(|(_, c)| c.as_str())
    }

    fn parse_row(&self, line: &str) -> Result<TelemetrySample, TelemetryError> {
        let cells = split_csv_line(line);
        let raw_time = cells.get(self.time_idx).map(|c| c.trim()).unwrap_or("");
        let time_hours = match raw_time.parse::<f64>() {
            Ok(t) if t.is_finite() => t,
            _ => {
                return Err(TelemetryError::BadTimestamp {
                    line: self.line_no,
                    value: raw_time.to_string(),
                });
            }
        };

        let mut sample = TelemetrySample::new(time_hours);
        for (idx, name) in self.columns.iter().enumerate() {
            if idx == self.time_idx {
                continue;
            }
            // Malformed or absent cells drop only this channel.
            if let Some(Ok(value)) = cells.get(idx).map(|c| c.trim().parse::<f64>()) {
                sample = sample.with_channel(name.clone(), value);
            }
        }
        Ok(sample)
    }
}

impl TelemetrySource for CsvReplay {
    fn next_sample(&mut self) -> Result<Option<TelemetrySample>, TelemetryError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample = self.parse_row(&line)?;
            if self.strict_order
                && let Some(previous) = self.last_time
                && sample.time_hours() < previous
            {
                return Err(TelemetryError::NonMonotonicTimestamp {
                    line: self.line_no,
                    previous,
                    current: sample.time_hours(),
                });
            }
            self.last_time = Some(sample.time_hours());
            return Ok(Some(sample));
        }
    }

    fn restart(&mut self) -> Result<(), TelemetryError> {
        let strict = self.strict_order;
        *self = Self::open(&self.path)?.with_strict_order(strict);
        Ok(())
    }
}

/// Split one CSV record. Double-quoted fields may contain commas and `""`
/// escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

// ---------------------------------------------------------------------------
// In-memory replay
// ---------------------------------------------------------------------------

/// Replay over an owned vector of samples.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplay {
    samples: Vec<TelemetrySample>,
    cursor: usize,
}

impl MemoryReplay {
    #[must_use]
    pub fn new(samples: Vec<TelemetrySample>) -> Self {
        Self { samples, cursor: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<TelemetrySample>> for MemoryReplay {
    fn from(samples: Vec<TelemetrySample>) -> Self {
        Self::new(samples)
    }
}

impl TelemetrySource for MemoryReplay {
    fn next_sample(&mut self) -> Result<Option<TelemetrySample>, TelemetryError> {
        let sample = self.samples.get(self.cursor).cloned();
        if sample.is_some() {
            self.cursor += 1;
        }
        Ok(sample)
    }

    fn restart(&mut self) -> Result<(), TelemetryError> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_csv(name: &str, body: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!(
            "twinguard-telemetry-{name}-{}-{nanos}.csv",
            std::process::id()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn split_handles_quotes_and_escapes() {
        assert_eq!(split_csv_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_csv_line("\"x,y\",2"), vec!["x,y", "2"]);
        assert_eq!(split_csv_line("\"say \"\"hi\"\"\",1"), vec!["say \"hi\"", "1"]);
        assert_eq!(split_csv_line("1,,3\r"), vec!["1", "", "3"]);
    }

    #[test]
    fn sample_drops_non_finite_channels() {
        let s = TelemetrySample::new(0.5)
            .with_channel(CORE_TEMP_K, 600.0)
            .with_channel("bad", f64::NAN)
            .with_channel("worse", f64::INFINITY);
        assert_eq!(s.channel(CORE_TEMP_K), Some(600.0));
        assert_eq!(s.channel("bad"), None);
        assert_eq!(s.channels().len(), 1);
    }

    #[test]
    fn csv_replay_streams_rows_and_drops_bad_cells() {
        let path = temp_csv(
            "stream",
            "time_hours,core_temp_K,primary_pressure_MPa,note\n0.0,600,12,ok\n\n0.5,n/a,11.5,\n",
        );
        let mut replay = CsvReplay::open(&path).unwrap();
        assert_eq!(
            replay.channel_names().collect::<Vec<_>>(),
            vec!["core_temp_K", "primary_pressure_MPa", "note"]
        );

        let first = replay.next_sample().unwrap().unwrap();
        assert_eq!(first.time_hours(), 0.0);
        assert_eq!(first.channel(CORE_TEMP_K), Some(600.0));
        assert_eq!(first.channel("note"), None);

        let second = replay.next_sample().unwrap().unwrap();
        assert_eq!(second.time_hours(), 0.5);
        assert_eq!(second.channel(CORE_TEMP_K), None);
        assert_eq!(second.channel(PRIMARY_PRESSURE_MPA), Some(11.5));

        assert!(replay.next_sample().unwrap().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn csv_replay_requires_time_column() {
        let path = temp_csv("notime", "t,core_temp_K\n0,600\n");
        let err = CsvReplay::open(&path).unwrap_err();
        assert!(matches!(err, TelemetryError::MissingColumn { ref column, .. } if column == TIME_COLUMN));
        assert!(err.to_string().contains("time_hours"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn csv_replay_rejects_empty_and_missing_files() {
        let path = temp_csv("empty", "\n\n");
        assert!(matches!(
            CsvReplay::open(&path),
            Err(TelemetryError::EmptyInput { .. })
        ));
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            CsvReplay::open(&path),
            Err(TelemetryError::Io(_))
        ));
    }

    #[test]
    fn csv_replay_bad_timestamp_is_fatal() {
        let path = temp_csv("badtime", "time_hours,x\nsoon,1\n");
        let mut replay = CsvReplay::open(&path).unwrap();
        let err = replay.next_sample().unwrap_err();
        assert!(matches!(err, TelemetryError::BadTimestamp { line: 2, .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn strict_order_rejects_backwards_time() {
        let path = temp_csv("order", "time_hours\n1.0\n0.5\n");
        let mut lax = CsvReplay::open(&path).unwrap();
        assert!(lax.next_sample().unwrap().is_some());
        assert!(lax.next_sample().unwrap().is_some());

        let mut strict = CsvReplay::open(&path).unwrap().with_strict_order(true);
        assert!(strict.next_sample().unwrap().is_some());
        assert!(matches!(
            strict.next_sample(),
            Err(TelemetryError::NonMonotonicTimestamp { line: 3, .. })
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn csv_replay_restarts_from_first_row() {
        let path = temp_csv("restart", "time_hours,flow_rate_kg_s\n0,50\n1,40\n");
        let mut replay = CsvReplay::open(&path).unwrap();
        while replay.next_sample().unwrap().is_some() {}
        replay.restart().unwrap();
        let again = replay.next_sample().unwrap().unwrap();
        assert_eq!(again.time_hours(), 0.0);
        assert_eq!(again.channel(FLOW_RATE_KG_S), Some(50.0));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn memory_replay_is_restartable() {
        let mut replay = MemoryReplay::new(vec![TelemetrySample::new(0.0), TelemetrySample::new(1.0)]);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.next_sample().unwrap().unwrap().time_hours(), 0.0);
        assert_eq!(replay.next_sample().unwrap().unwrap().time_hours(), 1.0);
        assert!(replay.next_sample().unwrap().is_none());
        replay.restart().unwrap();
        assert_eq!(replay.next_sample().unwrap().unwrap().time_hours(), 0.0);
    }
}
