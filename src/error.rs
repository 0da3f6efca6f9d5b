//! Error types for proctor

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Not authorized: {0}")]
    AuthorizationDenied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient pool: required {required}, available {available}")]
    InsufficientPool { required: usize, available: usize },

    #[error("Duplicate content: {0}")]
    DuplicateContent(String),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    #[error("Attempt closed: {0}")]
    AttemptClosed(String),

    #[error("Not eligible: {reasons:?}")]
    NotEligible { reasons: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for failures worth retrying on an outbound delivery
    /// (transient store/transport trouble). Validation-shaped failures
    /// are permanent and retried never.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Io(_) | EngineError::Internal(_))
    }
}
