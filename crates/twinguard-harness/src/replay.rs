//! Replay a CSV telemetry file through the pipeline.
//!
//! Outputs, all optional except the audit logs:
//! - `<log_dir>/flight_recorder.jsonl` and `<log_dir>/omega_gate.jsonl` (appended)
//! - a structured run log (truncated per run)
//! - the returned [`RunReport`], which the caller may persist

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use twinguard_core::audit::{GATE_LOG_FILE, STABILITY_LOG_FILE};
use twinguard_core::{CsvReplay, StepOutcome, TelemetrySample, TwinConfig, TwinPipeline};

use crate::error::HarnessError;
use crate::report::{ArtifactIndex, AuditCounters, RunReport};
use crate::structured_log::{Decision, LogEmitter, LogEntry, LogLevel, now_utc};

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub telemetry: PathBuf,
    /// Falls back to `TWINGUARD_CONFIG`, then built-in defaults.
    pub config: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub run_log: Option<PathBuf>,
    pub strict_order: bool,
    pub run_id: String,
}

impl ReplayOptions {
    #[must_use]
    pub fn new(telemetry: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            telemetry: telemetry.into(),
            config: None,
            log_dir: log_dir.into(),
            run_log: None,
            strict_order: false,
            run_id: default_run_id(),
        }
    }
}

/// `replay-<unix secs>-<pid>`.
#[must_use]
pub fn default_run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("replay-{secs}-{}", std::process::id())
}

/// Run-log entries describing one pipeline step.
#[must_use]
pub fn outcome_entries(sample: &TelemetrySample, outcome: &StepOutcome) -> Vec<LogEntry> {
    let t = sample.time_hours();
    let entry = |level, event: &str| LogEntry::new(String::new(), level, event).with_time_hours(t);
    match outcome {
        StepOutcome::Nominal { signal, snapshot } => vec![
            entry(LogLevel::Debug, "sample_nominal")
                .with_decision(Decision::Nominal, *snapshot)
                .with_details(json!({ "signal": signal })),
        ],
        StepOutcome::Rejected {
            cause,
            plan,
            decision,
            snapshot,
        } => vec![
            entry(LogLevel::Info, "anomaly_detected")
                .with_decision(Decision::Anomaly, *snapshot)
                .with_cause(*cause),
            entry(LogLevel::Warn, "plan_rejected")
                .with_decision(Decision::Rejected, *snapshot)
                .with_cause(*cause)
                .with_gate(plan.clone(), decision.metrics),
        ],
        StepOutcome::Recovered {
            cause,
            plan,
            decision,
            before,
            after,
        } => vec![
            entry(LogLevel::Info, "anomaly_detected")
                .with_decision(Decision::Anomaly, *before)
                .with_cause(*cause),
            entry(LogLevel::Info, "recovery_applied")
                .with_decision(Decision::Recovered, *after)
                .with_cause(*cause)
                .with_gate(plan.clone(), decision.metrics)
                .with_details(json!({ "before": before })),
        ],
    }
}

/// Replay `opts.telemetry` until it is exhausted or a plan is accepted.
pub fn run_replay(opts: &ReplayOptions) -> Result<RunReport, HarnessError> {
    let started = Instant::now();
    let config_path = TwinConfig::resolve_path(opts.config.as_deref());
    let config = TwinConfig::load_or_default(config_path.as_deref());

    let mut source = CsvReplay::open(&opts.telemetry)?.with_strict_order(opts.strict_order);
    std::fs::create_dir_all(&opts.log_dir)?;
    let mut pipeline = TwinPipeline::with_log_dir(config, &opts.log_dir);
    let mut emitter = opts
        .run_log
        .as_deref()
        .map(|p| LogEmitter::to_file(p, &opts.run_id))
        .transpose()?;

    tracing::info!(
        run_id = %opts.run_id,
        telemetry = %opts.telemetry.display(),
        log_dir = %opts.log_dir.display(),
        "replay started"
    );
    if let Some(em) = emitter.as_mut() {
        let channels: Vec<&str> = source.channel_names().collect();
        em.emit_entry(
            LogEntry::new(String::new(), LogLevel::Info, "replay_start").with_details(json!({
                "telemetry": opts.telemetry.display().to_string(),
                "config_path": config_path.as_ref().map(|p| p.display().to_string()),
                "channels": channels,
                "strict_order": opts.strict_order,
                "thresholds": config.thresholds,
            })),
        )?;
    }

    let mut log_error: Option<std::io::Error> = None;
    let result = pipeline.run_with(&mut source, |sample, outcome| {
        let Some(em) = emitter.as_mut() else {
            return;
        };
        if log_error.is_some() {
            return;
        }
        for entry in outcome_entries(sample, outcome) {
            if let Err(err) = em.emit_entry(entry) {
                log_error = Some(err);
                break;
            }
        }
    });

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(error = %err, "replay aborted");
            if let Some(em) = emitter.as_mut() {
                let aborted = LogEntry::new(String::new(), LogLevel::Error, "replay_aborted")
                    .with_details(json!({ "error": err.to_string() }));
                let _ = em.emit_entry(aborted);
                let _ = em.flush();
            }
            return Err(err.into());
        }
    };
    if let Some(err) = log_error {
        return Err(err.into());
    }

    let mut artifacts = ArtifactIndex::new(&opts.run_id);
    index_if_present(&mut artifacts, &opts.log_dir.join(STABILITY_LOG_FILE), "stability_log")?;
    index_if_present(&mut artifacts, &opts.log_dir.join(GATE_LOG_FILE), "gate_log")?;

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if let Some(mut em) = emitter.take() {
        let refs = artifacts.artifacts.iter().map(|a| a.path.clone()).collect();
        em.emit_entry(
            LogEntry::new(String::new(), LogLevel::Info, "replay_end")
                .with_duration_ms(duration_ms)
                .with_artifacts(refs)
                .with_details(serde_json::to_value(summary)?),
        )?;
        em.flush()?;
    }
    if let Some(run_log) = opts.run_log.as_deref() {
        index_if_present(&mut artifacts, run_log, "run_log")?;
    }

    let stability_audit = pipeline.tracker().audit();
    let gate_audit = pipeline.gate().audit();
    Ok(RunReport {
        report_version: REPORT_VERSION,
        run_id: opts.run_id.clone(),
        generated_utc: now_utc(),
        telemetry: opts.telemetry.display().to_string(),
        config: *pipeline.config(),
        summary,
        audit: AuditCounters {
            stability_written: stability_audit.records_written(),
            stability_failures: stability_audit.write_failures(),
            gate_written: gate_audit.records_written(),
            gate_failures: gate_audit.write_failures(),
        },
        artifacts,
    })
}

fn index_if_present(index: &mut ArtifactIndex, path: &Path, kind: &str) -> std::io::Result<()> {
    if path.exists() {
        index.add_file(path, kind)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinguard_core::{AuditLog, Thresholds};

    fn sample(t: f64, temp: f64) -> TelemetrySample {
        TelemetrySample::new(t)
            .with_channel("core_temp_K", temp)
            .with_channel("primary_pressure_MPa", 12.0)
            .with_channel("flow_rate_kg_s", 60.0)
    }

    #[test]
    fn nominal_step_yields_one_debug_entry() {
        let mut pipeline = TwinPipeline::default();
        let s = sample(0.0, 600.0);
        let out = pipeline.step(&s);
        let entries = outcome_entries(&s, &out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Debug);
        assert_eq!(entries[0].decision, Some(Decision::Nominal));
        assert_eq!(entries[0].time_hours, Some(0.0));
        assert!(entries[0].plan.is_none());
    }

    #[test]
    fn recovered_step_yields_anomaly_then_recovery() {
        let config = TwinConfig {
            thresholds: Thresholds {
                threshold_twist: 0.0,
                ..Thresholds::default()
            },
            ..TwinConfig::default()
        };
        let mut pipeline = TwinPipeline::new(config, AuditLog::disabled(), AuditLog::disabled());
        pipeline.step(&sample(0.0, 600.0));
        let s = sample(1.0, 1_200.0);
        let out = pipeline.step(&s);
        assert!(out.is_recovered());

        let entries = outcome_entries(&s, &out);
        let decisions: Vec<_> = entries.iter().map(|e| e.decision).collect();
        assert_eq!(decisions, [Some(Decision::Anomaly), Some(Decision::Recovered)]);
        assert!(entries[1].plan.is_some());
        assert!(entries[1].gate_metrics.is_some());
        assert_eq!(entries[1].snapshot.as_ref(), Some(out.snapshot()));
    }

    #[test]
    fn default_run_id_has_prefix() {
        assert!(default_run_id().starts_with("replay-"));
    }
}
