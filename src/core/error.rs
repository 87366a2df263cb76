use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MissionctlError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Lock timeout: {collection} not acquired within {waited_ms}ms")]
    LockTimeout { collection: String, waited_ms: u64 },
    #[error("Protocol rejection at '{path}': {reason}")]
    ValidationRejection { path: String, reason: String },
    #[error("Queue rejection for job {job_id}: {reason}")]
    QueueRejection { job_id: String, reason: String },
    #[error("Follow-up limit exceeded: {0}")]
    FollowupLimitExceeded(String),
    #[error("Effect failure: {0}")]
    EffectFailure(String),
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

impl MissionctlError {
    /// Stable machine code for envelopes and audit events.
    pub fn code(&self) -> &'static str {
        match self {
            MissionctlError::IoError(_) => "IO_ERROR",
            MissionctlError::JsonError(_) => "JSON_ERROR",
            MissionctlError::PathError(_) => "PATH_ERROR",
            MissionctlError::ValidationError(_) => "VALIDATION_ERROR",
            MissionctlError::NotFound(_) => "NOT_FOUND",
            MissionctlError::LockTimeout { .. } => "LOCK_TIMEOUT",
            MissionctlError::ValidationRejection { .. } => "VALIDATION_REJECTION",
            MissionctlError::QueueRejection { .. } => "QUEUE_REJECTION",
            MissionctlError::FollowupLimitExceeded(_) => "FOLLOWUP_LIMIT_EXCEEDED",
            MissionctlError::EffectFailure(_) => "EFFECT_FAILURE",
            MissionctlError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}
