//! Run report for a replay session.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use twinguard_core::{RunSummary, TwinConfig};

use crate::structured_log::now_utc;

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Files produced by a run, each pinned by SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Hash `path` and add it under `kind`.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> std::io::Result<&mut Self> {
        let data = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&data),
            size_bytes: data.len() as u64,
        });
        Ok(self)
    }

    /// Recompute every digest and return the paths that no longer match.
    pub fn verify(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|a| {
                std::fs::read(&a.path)
                    .map(|data| !sha256_hex(&data).eq_ignore_ascii_case(&a.sha256))
                    .unwrap_or(true)
            })
            .map(|a| a.path.clone())
            .collect()
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Append counters of both audit logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditCounters {
    pub stability_written: u64,
    pub stability_failures: u64,
    pub gate_written: u64,
    pub gate_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub report_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub telemetry: String,
    pub config: TwinConfig,
    pub summary: RunSummary,
    pub audit: AuditCounters,
    pub artifacts: ArtifactIndex,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        writeln!(out, "# twinguard replay `{}`", self.run_id).ok();
        writeln!(out).ok();
        writeln!(out, "- Telemetry: `{}`", self.telemetry).ok();
        writeln!(out, "- Generated: {}", self.generated_utc).ok();
        writeln!(out).ok();

        writeln!(out, "## Outcome").ok();
        writeln!(out).ok();
        writeln!(out, "| Metric | Value |").ok();
        writeln!(out, "|--------|------:|").ok();
        writeln!(out, "| Samples processed | {} |", s.samples_processed).ok();
        writeln!(out, "| Anomalies detected | {} |", s.anomalies_detected).ok();
        writeln!(out, "| Plans rejected | {} |", s.plans_rejected).ok();
        writeln!(out, "| First anomaly (h) | {} |", hours(s.first_anomaly_at_hours)).ok();
        writeln!(out, "| Recovered at (h) | {} |", hours(s.recovered_at_hours)).ok();
        writeln!(out, "| Max twist | {:.4} |", s.max_twist).ok();
        writeln!(out, "| Final integrity | {:.4} |", s.final_integrity).ok();
        writeln!(out).ok();

        writeln!(out, "## Audit").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "- Stability records: {} written, {} failed",
            self.audit.stability_written, self.audit.stability_failures
        )
        .ok();
        writeln!(
            out,
            "- Gate records: {} written, {} failed",
            self.audit.gate_written, self.audit.gate_failures
        )
        .ok();

        if !self.artifacts.artifacts.is_empty() {
            writeln!(out).ok();
            writeln!(out, "## Artifacts").ok();
            writeln!(out).ok();
            writeln!(out, "| Kind | Path | SHA-256 | Bytes |").ok();
            writeln!(out, "|------|------|---------|------:|").ok();
            for a in &self.artifacts.artifacts {
                writeln!(out, "| {} | `{}` | `{}` | {} |", a.kind, a.path, a.sha256, a.size_bytes).ok();
            }
        }
        out
    }
}

fn hours(t: Option<f64>) -> String {
    t.map_or_else(|| "-".to_string(), |t| format!("{t:.2}"))
}
