//! Error types for TrustGate

use thiserror::Error;

/// TrustGate engine error type
///
/// Expected verification failures (wrong code, expired code, unknown device)
/// never surface through this type; they come back as `Ok(false)` plus an
/// audit event. These variants cover the unexpected class only.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Device or user unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// Device belongs to a different user or tenant
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Code past its validity window
    #[error("expired")]
    Expired,

    /// Excessive failed attempts (lockout threshold owned by the caller)
    #[error("rate limited after {0} failed attempts")]
    RateLimited(u32),

    /// Malformed code, token, or secret
    #[error("invalid: {0}")]
    Invalid(String),

    /// Internal failure during risk computation
    #[error("assessment failure: {0}")]
    AssessmentFailure(String),

    /// Persistence backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Collaborator failure (SMS transport, enrichment provider)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for TrustGate
pub type EngineResult<T> = Result<T, EngineError>;

impl From<crate::store::StoreError> for EngineError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(what) => EngineError::NotFound(what),
            crate::store::StoreError::Storage(msg) => EngineError::Storage(msg),
        }
    }
}
