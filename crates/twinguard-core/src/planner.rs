//! Remediation planning.
//!
//! The baseline policy is passive-first and fixed: engage passive containment
//! cooling and depressurize the primary loop toward fixed targets. The
//! snapshot is read for the trace but does not branch the plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tracker::StabilitySnapshot;

pub const PASSIVE_COOLING_PLAN: &str = "PassiveCooling_Depressurize";

pub const ACTION_ENGAGE_PCCS: &str = "engage_PCCS";
pub const ACTION_DEPRESSURIZE_PRIMARY: &str = "depressurize_primary";
pub const ACTION_TARGET_PRESSURE_MPA: &str = "target_pressure_MPa";
pub const ACTION_HOLD_CORE_INLET_TEMP_K: &str = "hold_core_inlet_temp_K";
pub const ACTION_RAMP_MINUTES: &str = "ramp_minutes";

const TARGET_PRESSURE_MPA: f64 = 5.0;
const HOLD_CORE_INLET_TEMP_K: f64 = 880.0;
const RAMP_MINUTES: i64 = 10;

/// One remediation knob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Flag(bool),
    Integer(i64),
    Number(f64),
}

impl ActionValue {
    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::Flag(_) => None,
            Self::Integer(v) => Some(v as f64),
            Self::Number(v) => Some(v),
        }
    }
}

/// Immutable named bundle of remediation actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    name: String,
    actions: BTreeMap<String, ActionValue>,
}

impl RecoveryPlan {
    #[must_use]
    pub fn new(name: impl Into<String>, actions: BTreeMap<String, ActionValue>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn action(&self, key: &str) -> Option<ActionValue> {
        self.actions.get(key).copied()
    }

    #[must_use]
    pub fn actions(&self) -> &BTreeMap<String, ActionValue> {
        &self.actions
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemediationPlanner;

impl RemediationPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produce the remediation plan for the current snapshot. Never fails.
    #[must_use]
    pub fn plan(&self, snapshot: &StabilitySnapshot) -> RecoveryPlan {
        tracing::debug!(
            integrity = snapshot.integrity(),
            twist = snapshot.twist(),
            "planning recovery"
        );
        let actions = BTreeMap::from([
            (ACTION_ENGAGE_PCCS.to_string(), ActionValue::Flag(true)),
            (ACTION_DEPRESSURIZE_PRIMARY.to_string(), ActionValue::Flag(true)),
            (
                ACTION_TARGET_PRESSURE_MPA.to_string(),
                ActionValue::Number(TARGET_PRESSURE_MPA),
            ),
            (
                ACTION_HOLD_CORE_INLET_TEMP_K.to_string(),
                ActionValue::Number(HOLD_CORE_INLET_TEMP_K),
            ),
            (ACTION_RAMP_MINUTES.to_string(), ActionValue::Integer(RAMP_MINUTES)),
        ]);
        RecoveryPlan::new(PASSIVE_COOLING_PLAN, actions)
    }
}
