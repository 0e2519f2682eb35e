//! Operational tooling around the twinguard monitoring loop.
//!
//! This crate provides:
//! - Replay: drive the pipeline from a CSV telemetry file into the audit logs
//! - Structured run log: JSONL records of every pipeline decision
//! - Run report: machine- and human-readable summary with a SHA-256 artifact index
//! - Audit contract checks: validate `flight_recorder.jsonl` / `omega_gate.jsonl`

#![forbid(unsafe_code)]

pub mod audit_check;
pub mod error;
pub mod replay;
pub mod report;
pub mod structured_log;

pub use audit_check::{AuditCheckReport, AuditViolation, check_audit_files};
pub use error::HarnessError;
pub use replay::{ReplayOptions, run_replay};
pub use report::{ArtifactIndex, AuditCounters, RunReport};
pub use structured_log::{Decision, LogEmitter, LogEntry, LogLevel};
