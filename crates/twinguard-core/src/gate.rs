//! # Safety Gate (VOEL check)
//!
//! A remediation plan may only take effect if four conservation checks pass
//! against the current snapshot:
//!
//! | metric | meaning   | source            | passes when |
//! |--------|-----------|-------------------|-------------|
//! | V      | validity  | integrity         | `V ≥ V_c`   |
//! | O      | oversight | fixed 1.0         | `O ≥ O_c`   |
//! | E      | envelope  | fixed 0.90        | `E ≥ E_c`   |
//! | L      | leak      | 0.5·twist         | `L < L_c`   |
//!
//! O and E are placeholders for independently computed signals; they are
//! constants here so the four-check shape of the gate stays stable.
//!
//! Without a snapshot the gate approves unconditionally (no-context mode) and
//! writes no audit record.

use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, AuditStatus, GateRecord};
use crate::planner::RecoveryPlan;
use crate::tracker::StabilitySnapshot;

pub const DEFAULT_V_C: f64 = 0.65;
pub const DEFAULT_O_C: f64 = 0.80;
pub const DEFAULT_E_C: f64 = 0.80;
pub const DEFAULT_L_C: f64 = 0.20;

/// Oversight metric until an independent oversight signal exists.
pub const FIXED_OVERSIGHT: f64 = 1.0;
/// Envelope metric until an independent envelope signal exists.
pub const FIXED_ENVELOPE: f64 = 0.90;

const LEAK_PER_TWIST: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub v_c: f64,
    pub o_c: f64,
    pub e_c: f64,
    pub l_c: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            v_c: DEFAULT_V_C,
            o_c: DEFAULT_O_C,
            e_c: DEFAULT_E_C,
            l_c: DEFAULT_L_C,
        }
    }
}

/// Derived on demand; never stored between calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateMetrics {
    #[serde(rename = "V")]
    pub validity: f64,
    #[serde(rename = "O")]
    pub oversight: f64,
    #[serde(rename = "E")]
    pub envelope: f64,
    #[serde(rename = "L")]
    pub leak: f64,
}

impl GateMetrics {
    #[must_use]
    pub fn from_snapshot(snapshot: &StabilitySnapshot) -> Self {
        Self {
            validity: snapshot.integrity(),
            oversight: FIXED_OVERSIGHT,
            envelope: FIXED_ENVELOPE,
            leak: LEAK_PER_TWIST * snapshot.twist(),
        }
    }

    /// All four checks must pass.
    #[must_use]
    pub fn passes(&self, t: &GateThresholds) -> bool {
        self.envelope >= t.e_c
            && self.validity >= t.v_c
            && self.oversight >= t.o_c
            && self.leak < t.l_c
    }
}

/// Result of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub approved: bool,
    /// `None` in no-context mode.
    pub metrics: Option<GateMetrics>,
    pub audit: AuditStatus,
}

#[derive(Debug, Default)]
pub struct SafetyGate {
    thresholds: GateThresholds,
    audit: AuditLog,
}

impl SafetyGate {
    #[must_use]
    pub fn new(thresholds: GateThresholds, audit: AuditLog) -> Self {
        Self { thresholds, audit }
    }

    #[must_use]
    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Approve or reject `plan`.
    pub fn validate(&self, plan: &RecoveryPlan, snapshot: Option<&StabilitySnapshot>) -> bool {
        self.evaluate(plan, snapshot).approved
    }

    /// Full decision including metrics and the audit append status.
    pub fn evaluate(&self, plan: &RecoveryPlan, snapshot: Option<&StabilitySnapshot>) -> GateDecision {
        let Some(snapshot) = snapshot else {
            tracing::debug!(plan = %plan.name(), "gate has no snapshot; approving");
            return GateDecision {
                approved: true,
                metrics: None,
                audit: AuditStatus::Disabled,
            };
        };

        let metrics = GateMetrics::from_snapshot(snapshot);
        let approved = metrics.passes(&self.thresholds);
        let audit = self.audit.append(&GateRecord {
            validity: metrics.validity,
            oversight: metrics.oversight,
            envelope: metrics.envelope,
            leak: metrics.leak,
            export_allowed: approved,
        });
        tracing::info!(
            plan = %plan.name(),
            v = metrics.validity,
            o = metrics.oversight,
            e = metrics.envelope,
            l = metrics.leak,
            approved,
            "gate evaluated"
        );
        GateDecision {
            approved,
            metrics: Some(metrics),
            audit,
        }
    }
}
