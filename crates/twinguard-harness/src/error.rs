use thiserror::Error;
use twinguard_core::TelemetryError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("audit contract violated: {violations} problem(s) found")]
    AuditContract { violations: usize },
}
