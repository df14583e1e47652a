//! Error types for the ingest and fusion path
//!
//! Errors are classified by effect on engine state:
//! - Rejections: the sample never entered the pipeline (malformed, unknown patient)
//! - Degraded: fusion skipped, prior assessment stays authoritative
//! - External: delivery problems outside the engine's control

use thiserror::Error;

use crate::types::Modality;

#[derive(Debug, Error)]
pub enum EngineError {
    // Rejections: no state change
    #[error("Malformed sample: {0}")]
    MalformedSample(String),

    #[error("Unknown patient: {0}")]
    UnknownPatient(String),

    // Degraded: prior assessment retained, queue entry flagged stale
    #[error("Insufficient signal: no modality contributed a usable score")]
    InsufficientSignal,

    // External
    #[error("Alert delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("{0} scorer timed out after {1}ms")]
    ScorerTimeout(Modality, u64),

    // Internal
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// True for hard rejections that leave no trace in engine state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedSample(_) | EngineError::UnknownPatient(_)
        )
    }

    /// True when the prior assessment remains authoritative after this error.
    pub fn retains_prior_assessment(&self) -> bool {
        matches!(self, EngineError::InsufficientSignal)
    }

    /// True when retrying the same operation can succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::DeliveryFailure(_) | EngineError::ScorerTimeout(_, _)
        )
    }

    /// Short operator-facing hint.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EngineError::MalformedSample(_) => {
                "Fix the sample payload at the source and resubmit."
            }
            EngineError::UnknownPatient(_) => {
                "Admit the patient before submitting samples."
            }
            EngineError::InsufficientSignal => {
                "Recapture at least one modality with usable quality."
            }
            EngineError::DeliveryFailure(_) => "The delivery channel will retry.",
            EngineError::ScorerTimeout(_, _) => "The capture was recorded as unusable. Recapture.",
            EngineError::Db(_) => "Check the database file and disk space.",
            EngineError::Configuration(_) => "Check ~/.triagecore/config.json",
            EngineError::Io(_) => "Check file permissions and disk space.",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Serializable error representation for API responses
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineFault {
    pub message: String,
    pub kind: FaultKind,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    MalformedSample,
    UnknownPatient,
    InsufficientSignal,
    DeliveryFailure,
    Internal,
}

impl From<&EngineError> for EngineFault {
    fn from(err: &EngineError) -> Self {
        let kind = match err {
            EngineError::MalformedSample(_) => FaultKind::MalformedSample,
            EngineError::UnknownPatient(_) => FaultKind::UnknownPatient,
            EngineError::InsufficientSignal => FaultKind::InsufficientSignal,
            EngineError::DeliveryFailure(_) => FaultKind::DeliveryFailure,
            _ => FaultKind::Internal,
        };

        EngineFault {
            message: err.to_string(),
            kind,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
