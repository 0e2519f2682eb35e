//! Monitoring and gated-response loop for a plant digital twin.
//!
//! Raw telemetry flows through a small stateful pipeline that keeps every
//! derived quantity bounded and auditable:
//!
//! # Architecture
//!
//! - **Telemetry** (`telemetry`): samples and the pull-based replay sources
//! - **Signal fusion** (`fusion`): EWMA-smoothed coherence / drift-pressure / reserve
//! - **Stability tracker** (`tracker`): rolling integrity and twist with an audit trail
//! - **Anomaly detector** (`detector`): collapse predicate over a snapshot
//! - **Safety gate** (`gate`): V/O/E/L conservation checks on a remediation plan
//! - **Remediation planner** (`planner`): deterministic recovery plan
//! - **Audit logs** (`audit`): best-effort append-only JSONL records
//! - **Configuration** (`config`): thresholds with explicit default fallback
//! - **Pipeline** (`pipeline`): single-threaded fuse → ingest → detect → gate loop

pub mod audit;
pub mod config;
pub mod detector;
pub mod fusion;
pub mod gate;
pub mod pipeline;
pub mod planner;
pub mod telemetry;
pub mod tracker;

pub use audit::{AuditLog, AuditStatus};
pub use config::{ConfigError, Thresholds, TwinConfig};
pub use detector::{AnomalyCause, AnomalyDetector, DetectorThresholds};
pub use fusion::{FusedSignal, SignalFusionUnit};
pub use gate::{GateDecision, GateMetrics, GateThresholds, SafetyGate};
pub use pipeline::{RunSummary, StepOutcome, TwinPipeline};
pub use planner::{ActionValue, RecoveryPlan, RemediationPlanner};
pub use telemetry::{CsvReplay, MemoryReplay, TelemetryError, TelemetrySample, TelemetrySource};
pub use tracker::{StabilitySnapshot, StabilityTracker};

/// Clamp a value into the unit interval. NaN collapses to 0.
#[inline]
#[must_use]
pub(crate) fn unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}
