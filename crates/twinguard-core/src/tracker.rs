//! # Stability Tracker
//!
//! Maintains two rolling scalars over the fused signal stream:
//!
//! - **twist** reacts to *positive jumps* in drift-pressure and decays
//!   geometrically otherwise: `twist ← 0.9·twist + 0.8·max(0, Δγ)`.
//! - **integrity** erodes slowly under sustained drift and twist:
//!   `integrity ← 0.995·integrity − 0.01·γ − 0.005·twist + 0.002`.
//!
//! The two time constants differ on purpose: a transient spike registers as
//! twist while sustained drift wears down integrity. Both stay in [0, 1].
//!
//! Every ingest appends one [`StabilityRecord`] to the audit log, whether or
//! not a fused signal was supplied.

use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, AuditStatus, StabilityRecord};
use crate::fusion::FusedSignal;
use crate::telemetry::TelemetrySample;
use crate::unit;

pub const INITIAL_INTEGRITY: f64 = 0.98;
pub const INITIAL_TWIST: f64 = 0.0;

const TWIST_DECAY: f64 = 0.9;
const TWIST_GAIN: f64 = 0.8;
const INTEGRITY_DECAY: f64 = 0.995;
const INTEGRITY_GAMMA_LOSS: f64 = 0.01;
const INTEGRITY_TWIST_LOSS: f64 = 0.005;
const INTEGRITY_RECOVERY: f64 = 0.002;

/// Fraction of twist left after an accepted recovery plan.
const RECOVERY_TWIST_KEEP: f64 = 0.3;
const RECOVERY_INTEGRITY_BASE: f64 = 0.85;
const RECOVERY_INTEGRITY_GAIN: f64 = 0.10;

/// Immutable view of the tracker handed to the detector, gate and planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilitySnapshot {
    integrity: f64,
    twist: f64,
    last_signal: Option<FusedSignal>,
    samples_ingested: u64,
}

impl StabilitySnapshot {
    /// Build a snapshot directly, clamping scalars into [0, 1].
    #[must_use]
    pub fn new(integrity: f64, twist: f64, last_signal: Option<FusedSignal>) -> Self {
        Self {
            integrity: unit(integrity),
            twist: unit(twist),
            last_signal: last_signal.map(|s| FusedSignal::new(s.coherence, s.drift_pressure, s.reserve)),
            samples_ingested: 0,
        }
    }

    #[must_use]
    pub fn integrity(&self) -> f64 {
        self.integrity
    }

    #[must_use]
    pub fn twist(&self) -> f64 {
        self.twist
    }

    #[must_use]
    pub fn last_signal(&self) -> Option<FusedSignal> {
        self.last_signal
    }

    #[must_use]
    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested
    }

    /// Last ψ, or 1.0 before any signal.
    #[must_use]
    pub fn psi(&self) -> f64 {
        self.last_signal.map_or(1.0, |s| s.coherence)
    }

    /// Last γ, or 0.0 before any signal.
    #[must_use]
    pub fn gamma(&self) -> f64 {
        self.last_signal.map_or(0.0, |s| s.drift_pressure)
    }

    /// Last ω, or 1.0 before any signal.
    #[must_use]
    pub fn omega(&self) -> f64 {
        self.last_signal.map_or(1.0, |s| s.reserve)
    }
}

/// Owns integrity/twist state. One instance per run.
#[derive(Debug)]
pub struct StabilityTracker {
    integrity: f64,
    twist: f64,
    last_signal: Option<FusedSignal>,
    samples_ingested: u64,
    last_time_hours: Option<f64>,
    audit: AuditLog,
}

impl StabilityTracker {
    /// Tracker with auditing disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_audit(AuditLog::disabled())
    }

    #[must_use]
    pub fn with_audit(audit: AuditLog) -> Self {
        Self {
            integrity: INITIAL_INTEGRITY,
            twist: INITIAL_TWIST,
            last_signal: None,
            samples_ingested: 0,
            last_time_hours: None,
            audit,
        }
    }

    /// Fold one sample into the rolling metrics and append an audit record.
    ///
    /// Without `fused` the metrics are left untouched but the record is still
    /// written. The returned status only describes the audit append; ingest
    /// itself cannot fail.
    pub fn ingest(&mut self, sample: &TelemetrySample, fused: Option<FusedSignal>) -> AuditStatus {
        if let Some(fused) = fused {
            let fused = FusedSignal::new(fused.coherence, fused.drift_pressure, fused.reserve);
            let gamma = fused.drift_pressure;
            // The first signal has no predecessor to jump from.
            let jump = self
                .last_signal
                .map_or(0.0, |prev| (gamma - prev.drift_pressure).max(0.0));

            self.twist = unit(TWIST_DECAY * self.twist + TWIST_GAIN * jump);
            self.integrity = unit(
                INTEGRITY_DECAY * self.integrity - INTEGRITY_GAMMA_LOSS * gamma
                    - INTEGRITY_TWIST_LOSS * self.twist
                    + INTEGRITY_RECOVERY,
            );
            self.last_signal = Some(fused);
        }
        self.samples_ingested += 1;
        self.last_time_hours = Some(sample.time_hours());

        let status = self.audit.append(&self.record());
        tracing::trace!(
            t_hours = sample.time_hours(),
            integrity = self.integrity,
            twist = self.twist,
            audit = ?status,
            "stability ingest"
        );
        status
    }

    /// Current snapshot. Idempotent between ingests.
    #[must_use]
    pub fn snapshot(&self) -> StabilitySnapshot {
        StabilitySnapshot {
            integrity: self.integrity,
            twist: self.twist,
            last_signal: self.last_signal,
            samples_ingested: self.samples_ingested,
        }
    }

    /// Apply the synthetic effect of an accepted recovery plan: most of the
    /// twist is shed and integrity is restored toward a baseline that shrinks
    /// with the twist observed before recovery.
    pub fn apply_recovery(&mut self) -> StabilitySnapshot {
        let twist_before = self.twist;
        self.twist = unit(twist_before * RECOVERY_TWIST_KEEP);
        self.integrity =
            unit(RECOVERY_INTEGRITY_BASE + RECOVERY_INTEGRITY_GAIN * (1.0 - twist_before));
        tracing::info!(
            twist_before,
            twist = self.twist,
            integrity = self.integrity,
            "recovery effect applied"
        );
        self.snapshot()
    }

    /// Timestamp of the most recent ingest.
    #[must_use]
    pub fn last_time_hours(&self) -> Option<f64> {
        self.last_time_hours
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn record(&self) -> StabilityRecord {
        StabilityRecord {
            psi: self.last_signal.map(|s| s.coherence),
            gamma: self.last_signal.map(|s| s.drift_pressure),
            omega: self.last_signal.map(|s| s.reserve),
            weave_integrity: self.integrity,
            twist: self.twist,
        }
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(gamma: f64) -> FusedSignal {
        FusedSignal::new(1.0 - 0.7 * gamma, gamma, 0.8)
    }

    fn at(t: f64) -> TelemetrySample {
        TelemetrySample::new(t)
    }

    #[test]
    fn initial_snapshot() {
        let tracker = StabilityTracker::new();
        let snap = tracker.snapshot();
        assert_eq!(snap.integrity(), INITIAL_INTEGRITY);
        assert_eq!(snap.twist(), INITIAL_TWIST);
        assert!(snap.last_signal().is_none());
        assert_eq!(snap.psi(), 1.0);
        assert_eq!(snap.gamma(), 0.0);
        assert_eq!(snap.omega(), 1.0);
        assert_eq!(snap.samples_ingested(), 0);
    }

    #[test]
    fn ingest_without_signal_only_logs() {
        let mut tracker = StabilityTracker::with_audit(AuditLog::in_memory());
        let status = tracker.ingest(&at(0.0), None);
        assert_eq!(status, AuditStatus::Written);
        let snap = tracker.snapshot();
        assert_eq!(snap.integrity(), INITIAL_INTEGRITY);
        assert_eq!(snap.twist(), 0.0);
        assert_eq!(snap.samples_ingested(), 1);

        let lines = tracker.audit().lines();
        assert_eq!(lines.len(), 1);
        let rec: StabilityRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(rec.psi, None);
        assert_eq!(rec.gamma, None);
        assert_eq!(rec.omega, None);
        assert_eq!(rec.weave_integrity, INITIAL_INTEGRITY);
    }

    #[test]
    fn first_signal_has_no_jump() {
        let mut tracker = StabilityTracker::new();
        tracker.ingest(&at(0.0), Some(sig(0.5)));
        let snap = tracker.snapshot();
        assert_eq!(snap.twist(), 0.0);
        let expected = 0.995 * 0.98 - 0.01 * 0.5 + 0.002;
        assert!((snap.integrity() - expected).abs() < 1e-12);
        assert_eq!(snap.gamma(), 0.5);
    }

    #[test]
    fn positive_jump_raises_twist() {
        let mut tracker = StabilityTracker::new();
        tracker.ingest(&at(0.0), Some(sig(0.1)));
        tracker.ingest(&at(1.0), Some(sig(0.4)));
        let twist = tracker.snapshot().twist();
        assert!((twist - 0.8 * 0.3).abs() < 1e-12, "twist {twist}");
    }

    #[test]
    fn non_increasing_gamma_never_raises_twist() {
        let mut tracker = StabilityTracker::new();
        tracker.ingest(&at(0.0), Some(sig(0.1)));
        tracker.ingest(&at(1.0), Some(sig(0.9)));
        let mut last = tracker.snapshot().twist();
        assert!(last > 0.0);
        for (i, g) in [0.9, 0.8, 0.8, 0.5, 0.2, 0.2, 0.0].into_iter().enumerate() {
            tracker.ingest(&at(2.0 + i as f64), Some(sig(g)));
            let twist = tracker.snapshot().twist();
            assert!(twist <= last, "twist rose from {last} to {twist}");
            last = twist;
        }
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut tracker = StabilityTracker::new();
        tracker.ingest(&at(0.0), Some(sig(0.3)));
        tracker.ingest(&at(1.0), Some(sig(0.6)));
        assert_eq!(tracker.snapshot(), tracker.snapshot());
    }

    #[test]
    fn metrics_stay_bounded_under_extremes() {
        let mut tracker = StabilityTracker::new();
        for i in 0..500 {
            let g = if i % 2 == 0 { 0.0 } else { 1.0 };
            tracker.ingest(&at(i as f64), Some(sig(g)));
            let snap = tracker.snapshot();
            assert!((0.0..=1.0).contains(&snap.integrity()));
            assert!((0.0..=1.0).contains(&snap.twist()));
        }
        assert_eq!(tracker.snapshot().integrity(), 0.0);
    }

    #[test]
    fn out_of_range_signal_is_clamped_on_ingest() {
        let mut tracker = StabilityTracker::new();
        let raw = FusedSignal {
            coherence: 2.0,
            drift_pressure: -1.0,
            reserve: 7.0,
        };
        tracker.ingest(&at(0.0), Some(raw));
        let snap = tracker.snapshot();
        assert_eq!(snap.psi(), 1.0);
        assert_eq!(snap.gamma(), 0.0);
        assert_eq!(snap.omega(), 1.0);
    }

    #[test]
    fn audit_failure_does_not_abort_ingest() {
        let dir = std::env::temp_dir().join(format!(
            "twinguard-tracker-missing-{}",
            std::process::id()
        ));
        let mut tracker = StabilityTracker::with_audit(AuditLog::append_to(dir.join("x/y.jsonl")));
        let status = tracker.ingest(&at(0.0), Some(sig(0.2)));
        assert!(matches!(status, AuditStatus::Failed(_)));
        assert_eq!(tracker.snapshot().samples_ingested(), 1);
        assert_eq!(tracker.snapshot().gamma(), 0.2);
        assert_eq!(tracker.audit().write_failures(), 1);
    }

    #[test]
    fn recovery_sheds_twist_and_restores_integrity() {
        let mut tracker = StabilityTracker::new();
        tracker.ingest(&at(0.0), Some(sig(0.0)));
        tracker.ingest(&at(1.0), Some(sig(0.8)));
        let before = tracker.snapshot();
        let after = tracker.apply_recovery();
        assert!((after.twist() - before.twist() * 0.3).abs() < 1e-12);
        let expected = 0.85 + 0.10 * (1.0 - before.twist());
        assert!((after.integrity() - expected).abs() < 1e-12);
        assert_eq!(after.last_signal(), before.last_signal());
    }

    #[test]
    fn snapshot_constructor_clamps() {
        let snap = StabilitySnapshot::new(1.4, -0.3, Some(FusedSignal {
            coherence: -1.0,
            drift_pressure: 3.0,
            reserve: 0.5,
        }));
        assert_eq!(snap.integrity(), 1.0);
        assert_eq!(snap.twist(), 0.0);
        assert_eq!(snap.psi(), 0.0);
        assert_eq!(snap.gamma(), 1.0);
    }
}
