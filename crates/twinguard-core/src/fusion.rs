//! # Signal Fusion Unit
//!
//! Converts one raw telemetry sample into three bounded risk signals:
//!
//! - **drift-pressure γ**: EWMA of an observed drift score built from
//!   temperature excess, pressure deficit and flow deficit.
//! - **coherence ψ**: `1 − 0.7·γ`, a pure function of the current γ.
//! - **reserve ω**: a budget that recovers by a constant step and drains in
//!   proportion to γ.
//!
//! The smoothing factor is deliberately small so a single noisy sample cannot
//! move the output much. All three values stay in [0, 1].

use serde::{Deserialize, Serialize};

use crate::telemetry::{CORE_TEMP_K, FLOW_RATE_KG_S, PRIMARY_PRESSURE_MPA, TelemetrySample};
use crate::unit;

/// EWMA smoothing factor for drift-pressure.
pub const ALPHA: f64 = 0.03;

/// Optimistic prior.
pub const INITIAL_PSI: f64 = 0.95;
pub const INITIAL_GAMMA: f64 = 0.05;
pub const INITIAL_OMEGA: f64 = 0.85;

/// Neutral channel values used when a sample omits a channel.
pub const DEFAULT_CORE_TEMP_K: f64 = 600.0;
pub const DEFAULT_PRIMARY_PRESSURE_MPA: f64 = 12.0;
pub const DEFAULT_FLOW_RATE_KG_S: f64 = 0.0;

const TEMP_BASELINE_K: f64 = 580.0;
const TEMP_SPAN_K: f64 = 200.0;
const PRESSURE_REF_MPA: f64 = 12.0;
const PRESSURE_SPAN_MPA: f64 = 6.0;
const FLOW_REF_KG_S: f64 = 50.0;

const W_TEMP: f64 = 0.5;
const W_PRESSURE: f64 = 0.5;
const W_FLOW: f64 = 0.3;

const PSI_GAIN: f64 = 0.7;
const OMEGA_RECOVERY: f64 = 0.01;
const OMEGA_DRAIN: f64 = 0.03;

/// Fused risk signals for one sample. Every field is in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    /// ψ: internal consistency; low means anomalous.
    #[serde(rename = "psi")]
    pub coherence: f64,
    /// γ: accumulated deviation pressure from nominal.
    #[serde(rename = "gamma")]
    pub drift_pressure: f64,
    /// ω: remaining safety margin.
    #[serde(rename = "omega")]
    pub reserve: f64,
}

impl FusedSignal {
    /// Build a signal, clamping each component into [0, 1].
    #[must_use]
    pub fn new(coherence: f64, drift_pressure: f64, reserve: f64) -> Self {
        Self {
            coherence: unit(coherence),
            drift_pressure: unit(drift_pressure),
            reserve: unit(reserve),
        }
    }
}

/// Observed (unsmoothed) drift-pressure for a sample.
///
/// Each term is clamped to [0, 1] before weighting and the weighted sum is
/// clamped again.
#[must_use]
pub fn observed_drift(sample: &TelemetrySample) -> f64 {
    let temp = sample.channel(CORE_TEMP_K).unwrap_or(DEFAULT_CORE_TEMP_K);
    let pressure = sample
        .channel(PRIMARY_PRESSURE_MPA)
        .unwrap_or(DEFAULT_PRIMARY_PRESSURE_MPA);
    let flow = sample
        .channel(FLOW_RATE_KG_S)
        .unwrap_or(DEFAULT_FLOW_RATE_KG_S);

    let temp_excess = unit((temp - TEMP_BASELINE_K) / TEMP_SPAN_K);
    let pressure_deficit =
        unit((PRESSURE_REF_MPA - pressure.min(PRESSURE_REF_MPA)) / PRESSURE_SPAN_MPA);
    let flow_deficit = unit(1.0 - (flow / FLOW_REF_KG_S).min(1.0));

    unit(W_TEMP * temp_excess + W_PRESSURE * pressure_deficit + W_FLOW * flow_deficit)
}

/// Owns the smoothing state across samples. One instance per run.
#[derive(Debug, Clone)]
pub struct SignalFusionUnit {
    psi: f64,
    gamma: f64,
    omega: f64,
    updates: u64,
}

impl SignalFusionUnit {
    #[must_use]
    pub fn new() -> Self {
        Self {
            psi: INITIAL_PSI,
            gamma: INITIAL_GAMMA,
            omega: INITIAL_OMEGA,
            updates: 0,
        }
    }

    /// Fold one sample into the smoothing state and return the fused signal.
    pub fn update(&mut self, sample: &TelemetrySample) -> FusedSignal {
        let gamma_obs = observed_drift(sample);
        self.gamma = unit((1.0 - ALPHA) * self.gamma + ALPHA * gamma_obs);
        self.psi = unit(1.0 - PSI_GAIN * self.gamma);
        self.omega = unit(self.omega + OMEGA_RECOVERY - OMEGA_DRAIN * self.gamma);
        self.updates += 1;
        self.current()
    }

    /// Current state without consuming a sample.
    #[must_use]
    pub fn current(&self) -> FusedSignal {
        FusedSignal {
            coherence: self.psi,
            drift_pressure: self.gamma,
            reserve: self.omega,
        }
    }

    /// Number of samples folded in so far.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl Default for SignalFusionUnit {
    fn default() -> Self {
        Self::new()
    }
}
