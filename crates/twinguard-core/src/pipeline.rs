//! Single-threaded monitoring loop.
//!
//! Each sample is fully processed before the next is pulled:
//!
//! 1. fuse the sample into ψ/γ/ω
//! 2. fold the fused signal into the stability tracker (audited)
//! 3. run the collapse predicate on the fresh snapshot
//! 4. on anomaly, plan a recovery and submit it to the safety gate (audited)
//! 5. if the gate approves, apply the recovery effect and stop
//!
//! A rejected plan is not an error; the loop continues and re-plans on the
//! next anomalous sample.

use std::path::Path;

use serde::Serialize;

use crate::audit::{AuditLog, GATE_LOG_FILE, STABILITY_LOG_FILE};
use crate::config::TwinConfig;
use crate::detector::{AnomalyCause, AnomalyDetector};
use crate::fusion::{FusedSignal, SignalFusionUnit};
use crate::gate::{GateDecision, SafetyGate};
use crate::planner::{RecoveryPlan, RemediationPlanner};
use crate::telemetry::{TelemetryError, TelemetrySample, TelemetrySource};
use crate::tracker::{StabilitySnapshot, StabilityTracker};

/// What one pipeline step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No anomaly on this sample.
    Nominal {
        signal: FusedSignal,
        snapshot: StabilitySnapshot,
    },
    /// Anomaly detected; the gate refused the plan.
    Rejected {
        cause: AnomalyCause,
        plan: RecoveryPlan,
        decision: GateDecision,
        snapshot: StabilitySnapshot,
    },
    /// Anomaly detected; the gate approved and the recovery effect was applied.
    Recovered {
        cause: AnomalyCause,
        plan: RecoveryPlan,
        decision: GateDecision,
        before: StabilitySnapshot,
        after: StabilitySnapshot,
    },
}

impl StepOutcome {
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, Self::Nominal { .. })
    }

    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    /// Snapshot at the end of the step.
    #[must_use]
    pub fn snapshot(&self) -> &StabilitySnapshot {
        match self {
            Self::Nominal { snapshot, .. } | Self::Rejected { snapshot, .. } => snapshot,
            Self::Recovered { after, .. } => after,
        }
    }
}

/// Aggregate over every step taken by one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub samples_processed: u64,
    pub anomalies_detected: u64,
    pub plans_rejected: u64,
    pub first_anomaly_at_hours: Option<f64>,
    pub recovered_at_hours: Option<f64>,
    pub max_twist: f64,
    pub final_integrity: f64,
    pub final_snapshot: StabilitySnapshot,
}

#[derive(Debug)]
pub struct TwinPipeline {
    config: TwinConfig,
    fusion: SignalFusionUnit,
    tracker: StabilityTracker,
    detector: AnomalyDetector,
    gate: SafetyGate,
    planner: RemediationPlanner,
    samples_processed: u64,
    anomalies_detected: u64,
    plans_rejected: u64,
    first_anomaly_at_hours: Option<f64>,
    recovered_at_hours: Option<f64>,
    max_twist: f64,
}

impl TwinPipeline {
    #[must_use]
    pub fn new(config: TwinConfig, stability_audit: AuditLog, gate_audit: AuditLog) -> Self {
        let thresholds = config.thresholds;
        Self {
            config,
            fusion: SignalFusionUnit::new(),
            tracker: StabilityTracker::with_audit(stability_audit),
            detector: AnomalyDetector::new(thresholds.detector()),
            gate: SafetyGate::new(thresholds.gate(), gate_audit),
            planner: RemediationPlanner::new(),
            samples_processed: 0,
            anomalies_detected: 0,
            plans_rejected: 0,
            first_anomaly_at_hours: None,
            recovered_at_hours: None,
            max_twist: 0.0,
        }
    }

    /// Pipeline appending to `flight_recorder.jsonl` and `omega_gate.jsonl`
    /// under `log_dir`. The directory is not created here.
    #[must_use]
    pub fn with_log_dir(config: TwinConfig, log_dir: &Path) -> Self {
        Self::new(
            config,
            AuditLog::append_to(log_dir.join(STABILITY_LOG_FILE)),
            AuditLog::append_to(log_dir.join(GATE_LOG_FILE)),
        )
    }

    #[must_use]
    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    #[must_use]
    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    #[must_use]
    pub fn recovered(&self) -> bool {
        self.recovered_at_hours.is_some()
    }

    /// Process one sample.
    pub fn step(&mut self, sample: &TelemetrySample) -> StepOutcome {
        let t = sample.time_hours();
        let signal = self.fusion.update(sample);
        self.tracker.ingest(sample, Some(signal));
        let snapshot = self.tracker.snapshot();
        self.samples_processed += 1;
        self.max_twist = self.max_twist.max(snapshot.twist());
        tracing::debug!(
            t_hours = t,
            psi = signal.coherence,
            gamma = signal.drift_pressure,
            omega = signal.reserve,
            integrity = snapshot.integrity(),
            twist = snapshot.twist(),
            "sample processed"
        );

        let Some(cause) = self.detector.cause(&snapshot) else {
            return StepOutcome::Nominal { signal, snapshot };
        };
        self.anomalies_detected += 1;
        self.first_anomaly_at_hours.get_or_insert(t);
        tracing::info!(t_hours = t, ?cause, "collapse predicate fired");

        let plan = self.planner.plan(&snapshot);
        let decision = self.gate.evaluate(&plan, Some(&snapshot));
        if !decision.approved {
            self.plans_rejected += 1;
            return StepOutcome::Rejected {
                cause,
                plan,
                decision,
                snapshot,
            };
        }

        let after = self.tracker.apply_recovery();
        self.recovered_at_hours.get_or_insert(t);
        StepOutcome::Recovered {
            cause,
            plan,
            decision,
            before: snapshot,
            after,
        }
    }

    /// Drain `source` until it is exhausted or a plan is accepted.
    pub fn run<S: TelemetrySource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<RunSummary, TelemetryError> {
        self.run_with(source, |_, _| {})
    }

    /// As [`TwinPipeline::run`], handing every step to `observer`.
    pub fn run_with<S, F>(&mut self, source: &mut S, mut observer: F) -> Result<RunSummary, TelemetryError>
    where
        S: TelemetrySource + ?Sized,
        F: FnMut(&TelemetrySample, &StepOutcome),
    {
        while let Some(sample) = source.next_sample()? {
            let outcome = self.step(&sample);
            observer(&sample, &outcome);
            if outcome.is_recovered() {
                break;
            }
        }
        let summary = self.summary();
        tracing::info!(
            samples = summary.samples_processed,
            anomalies = summary.anomalies_detected,
            rejected = summary.plans_rejected,
            recovered_at = ?summary.recovered_at_hours,
            final_integrity = summary.final_integrity,
            max_twist = summary.max_twist,
            "run finished"
        );
        Ok(summary)
    }

    /// Totals since construction. Repeated runs accumulate.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let final_snapshot = self.tracker.snapshot();
        RunSummary {
            samples_processed: self.samples_processed,
            anomalies_detected: self.anomalies_detected,
            plans_rejected: self.plans_rejected,
            first_anomaly_at_hours: self.first_anomaly_at_hours,
            recovered_at_hours: self.recovered_at_hours,
            max_twist: self.max_twist,
            final_integrity: final_snapshot.integrity(),
            final_snapshot,
        }
    }
}

impl Default for TwinPipeline {
    fn default() -> Self {
        Self::new(TwinConfig::default(), AuditLog::disabled(), AuditLog::disabled())
    }
}
