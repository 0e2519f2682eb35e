//! Collapse detection.
//!
//! `ψ < ε_ψ  OR  (γ > T_γ AND ω < T_Ω)  OR  twist > twist_threshold`
//!
//! Before any fused signal has been seen the snapshot reports ψ = 1, γ = 0,
//! ω = 1, so only the twist clause can fire.

use serde::{Deserialize, Serialize};

use crate::tracker::StabilitySnapshot;

pub const DEFAULT_EPSILON_PSI: f64 = 0.60;
pub const DEFAULT_T_GAMMA: f64 = 0.15;
pub const DEFAULT_T_OMEGA: f64 = 0.75;
pub const DEFAULT_TWIST_THRESHOLD: f64 = 0.67;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorThresholds {
    pub epsilon_psi: f64,
    pub t_gamma: f64,
    pub t_omega: f64,
    pub twist: f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            epsilon_psi: DEFAULT_EPSILON_PSI,
            t_gamma: DEFAULT_T_GAMMA,
            t_omega: DEFAULT_T_OMEGA,
            twist: DEFAULT_TWIST_THRESHOLD,
        }
    }
}

/// Which clause of the predicate fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCause {
    LowCoherence,
    DrainedReserve,
    ExcessTwist,
}

/// Stateless beyond its thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyDetector {
    thresholds: DetectorThresholds,
}

impl AnomalyDetector {
    #[must_use]
    pub fn new(thresholds: DetectorThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    #[must_use]
    pub fn detect(&self, snapshot: &StabilitySnapshot) -> bool {
        self.cause(snapshot).is_some()
    }

    /// First firing clause in predicate order, if any.
    #[must_use]
    pub fn cause(&self, snapshot: &StabilitySnapshot) -> Option<AnomalyCause> {
        let t = &self.thresholds;
        if snapshot.psi() < t.epsilon_psi {
            Some(AnomalyCause::LowCoherence)
        } else if snapshot.gamma() > t.t_gamma && snapshot.omega() < t.t_omega {
            Some(AnomalyCause::DrainedReserve)
        } else if snapshot.twist() > t.twist {
            Some(AnomalyCause::ExcessTwist)
        } else {
            None
        }
    }
}
