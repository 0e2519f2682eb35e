//! Contract checks for the two audit logs written by a replay.
//!
//! Stability log (`flight_recorder.jsonl`), one object per line:
//! - `psi`, `gamma`, `omega`: number in [0, 1] or `null`; either all three are
//!   `null` (no signal ingested yet) or none are
//! - `weave_integrity`, `twist`: number in [0, 1]
//!
//! Gate log (`omega_gate.jsonl`), one object per line:
//! - `V`, `O`, `E`, `L`: finite numbers
//! - `export_allowed`: boolean; with thresholds supplied it must agree with
//!   the V/O/E/L checks

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use twinguard_core::{GateMetrics, GateThresholds};

use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Stability,
    Gate,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stability => "stability",
            Self::Gate => "gate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditViolation {
    pub log: AuditKind,
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for AuditViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} log line {}: field '{}': {}",
            self.log, self.line_number, self.field, self.message
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditCheckReport {
    pub stability_records: usize,
    pub gate_records: usize,
    pub gate_approvals: usize,
    pub violations: Vec<AuditViolation>,
}

impl AuditCheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turn a dirty report into [`HarnessError::AuditContract`].
    pub fn into_result(self) -> Result<Self, HarnessError> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(HarnessError::AuditContract {
                violations: self.violations.len(),
            })
        }
    }
}

struct LineChecker<'a> {
    log: AuditKind,
    line_number: usize,
    out: &'a mut Vec<AuditViolation>,
}

impl LineChecker<'_> {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.out.push(AuditViolation {
            log: self.log,
            line_number: self.line_number,
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn object<'v>(&mut self, line: &str, value: &'v mut Option<Value>) -> Option<&'v Map<String, Value>> {
        match serde_json::from_str::<Value>(line) {
            Ok(v) => *value = Some(v),
            Err(e) => {
                self.push("<json>", format!("invalid JSON: {e}"));
                return None;
            }
        }
        let obj = value.as_ref().and_then(Value::as_object);
        if obj.is_none() {
            self.push("<root>", "expected JSON object");
        }
        obj
    }

    fn number(&mut self, obj: &Map<String, Value>, field: &str) -> Option<f64> {
        match obj.get(field) {
            None => {
                self.push(field, "required field missing");
                None
            }
            Some(v) => match v.as_f64() {
                Some(x) if x.is_finite() => Some(x),
                _ => {
                    self.push(field, format!("expected finite number, got {v}"));
                    None
                }
            },
        }
    }

    fn unit_number(&mut self, obj: &Map<String, Value>, field: &str) -> Option<f64> {
        let x = self.number(obj, field)?;
        if (0.0..=1.0).contains(&x) {
            Some(x)
        } else {
            self.push(field, format!("{x} outside [0, 1]"));
            None
        }
    }
}

/// Check one stability log line. Violations are appended to `out`.
pub fn check_stability_line(line: &str, line_number: usize, out: &mut Vec<AuditViolation>) {
    let mut c = LineChecker {
        log: AuditKind::Stability,
        line_number,
        out,
    };
    let mut value = None;
    let Some(obj) = c.object(line, &mut value) else {
        return;
    };

    let mut nulls = 0;
    for field in ["psi", "gamma", "omega"] {
        match obj.get(field) {
            None => c.push(field, "required field missing (use null before the first signal)"),
            Some(Value::Null) => nulls += 1,
            Some(_) => {
                c.unit_number(obj, field);
            }
        }
    }
    if nulls != 0 && nulls != 3 {
        c.push("psi/gamma/omega", "signal fields must be all null or all present");
    }
    c.unit_number(obj, "weave_integrity");
    c.unit_number(obj, "twist");
}

/// Check one gate log line. Returns the logged approval when the line is
/// well formed.
pub fn check_gate_line(
    line: &str,
    line_number: usize,
    thresholds: Option<&GateThresholds>,
    out: &mut Vec<AuditViolation>,
) -> Option<bool> {
    let mut c = LineChecker {
        log: AuditKind::Gate,
        line_number,
        out,
    };
    let mut value = None;
    let obj = c.object(line, &mut value)?;

    let validity = c.number(obj, "V");
    let oversight = c.number(obj, "O");
    let envelope = c.number(obj, "E");
    let leak = c.number(obj, "L");
    let allowed = match obj.get("export_allowed") {
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            c.push("export_allowed", format!("expected boolean, got {other}"));
            None
        }
        None => {
            c.push("export_allowed", "required field missing");
            None
        }
    };

    let (Some(validity), Some(oversight), Some(envelope), Some(leak), Some(allowed)) =
        (validity, oversight, envelope, leak, allowed)
    else {
        return None;
    };
    if let Some(t) = thresholds {
        let metrics = GateMetrics {
            validity,
            oversight,
            envelope,
            leak,
        };
        let expected = metrics.passes(t);
        if expected != allowed {
            c.push(
                "export_allowed",
                format!("logged {allowed} but V/O/E/L checks give {expected}"),
            );
        }
    }
    Some(allowed)
}

fn for_each_line(path: &Path, mut f: impl FnMut(&str, usize)) -> Result<usize, HarnessError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        // Audit logs are created on first append; no file means no records.
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "audit log absent; treating as empty");
            return Ok(0);
        }
        Err(err) => return Err(err.into()),
    };
    let mut count = 0;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        count += 1;
        f(line, i + 1);
    }
    Ok(count)
}

/// Check both logs. A missing file counts as an empty log; any other read
/// failure is an I/O error.
pub fn check_audit_files(
    stability: &Path,
    gate: &Path,
    thresholds: Option<&GateThresholds>,
) -> Result<AuditCheckReport, HarnessError> {
    let mut report = AuditCheckReport::default();
    let mut violations = Vec::new();

    report.stability_records =
        for_each_line(stability, |line, n| check_stability_line(line, n, &mut violations))?;
    let mut approvals = 0;
    report.gate_records = for_each_line(gate, |line, n| {
        if check_gate_line(line, n, thresholds, &mut violations) == Some(true) {
            approvals += 1;
        }
    })?;
    report.gate_approvals = approvals;
    report.violations = violations;

    tracing::info!(
        stability = report.stability_records,
        gate = report.gate_records,
        violations = report.violations.len(),
        "audit logs checked"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stability(line: &str) -> Vec<AuditViolation> {
        let mut out = Vec::new();
        check_stability_line(line, 1, &mut out);
        out
    }

    #[test]
    fn stability_lines_accept_full_and_pre_signal_records() {
        assert!(stability(r#"{"psi":0.9,"gamma":0.1,"omega":0.8,"weave_integrity":0.97,"twist":0.0}"#).is_empty());
        assert!(stability(r#"{"psi":null,"gamma":null,"omega":null,"weave_integrity":0.98,"twist":0.0}"#).is_empty());
    }

    #[test]
    fn stability_lines_flag_partial_nulls_and_range() {
        let v = stability(r#"{"psi":null,"gamma":0.1,"omega":0.8,"weave_integrity":1.2,"twist":0.0}"#);
        assert!(v.iter().any(|e| e.field == "psi/gamma/omega"));
        assert!(v.iter().any(|e| e.field == "weave_integrity"));
        let v = stability(r#"{"psi":0.9,"gamma":0.1,"weave_integrity":0.9,"twist":"high"}"#);
        assert!(v.iter().any(|e| e.field == "omega"));
        assert!(v.iter().any(|e| e.field == "twist"));
        assert_eq!(stability("{broken")[0].field, "<json>");
    }

    #[test]
    fn gate_lines_check_consistency_when_asked() {
        let t = GateThresholds::default();
        let mut out = Vec::new();
        let ok = r#"{"V":0.9,"O":1.0,"E":0.9,"L":0.05,"export_allowed":true}"#;
        assert_eq!(check_gate_line(ok, 1, Some(&t), &mut out), Some(true));
        assert!(out.is_empty());

        let lying = r#"{"V":0.5,"O":1.0,"E":0.9,"L":0.05,"export_allowed":true}"#;
        assert_eq!(check_gate_line(lying, 2, None, &mut out), Some(true));
        assert!(out.is_empty());
        check_gate_line(lying, 2, Some(&t), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line_number, 2);
        assert_eq!(out[0].log, AuditKind::Gate);
    }

    #[test]
    fn gate_lines_require_every_field() {
        let mut out = Vec::new();
        assert_eq!(check_gate_line(r#"{"V":0.9,"O":1.0,"export_allowed":"yes"}"#, 1, None, &mut out), None);
        let fields: Vec<_> = out.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["E", "L", "export_allowed"]);
    }

    #[test]
    fn absent_logs_count_as_empty() {
        let dir = std::env::temp_dir().join(format!(
            "twinguard-absent-audit-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        let report = check_audit_files(
            &dir.join("flight_recorder.jsonl"),
            &dir.join("omega_gate.jsonl"),
            Some(&GateThresholds::default()),
        )
        .unwrap();
        assert_eq!(report.stability_records, 0);
        assert_eq!(report.gate_records, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn unreadable_log_is_still_an_io_error() {
        // A directory in place of the log file cannot be read as text.
        let dir = std::env::temp_dir();
        assert!(matches!(
            check_audit_files(&dir, &dir.join("twinguard-no-gate.jsonl"), None),
            Err(HarnessError::Io(_))
        ));
    }

    #[test]
    fn dirty_report_becomes_contract_error() {
        let report = AuditCheckReport {
            violations: vec![AuditViolation {
                log: AuditKind::Stability,
                line_number: 3,
                field: "twist".into(),
                message: "bad".into(),
            }],
            ..AuditCheckReport::default()
        };
        assert_eq!(report.violations[0].to_string(), "stability log line 3: field 'twist': bad");
        assert!(matches!(
            report.into_result(),
            Err(HarnessError::AuditContract { violations: 1 })
        ));
    }
}
