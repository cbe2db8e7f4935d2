use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

/// Wire-level error body returned by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// How a failed remote call should be treated by the queues. 404 is listed
/// here because delete-by-id treats it as success (`AlreadyGone`), never as
/// a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Identity no longer owns the resource. Terminal, never retried.
    Auth,
    /// Network error or 5xx. The queued item stays for the next flush.
    Transient,
    /// Any other 4xx. Dropped and logged, never retried.
    PermanentClient,
    NotFound,
    /// Surfaced to the user, no automatic retry.
    RateLimited,
}

pub fn classify_status(status: u16) -> FailureClass {
    match status {
        401 | 403 => FailureClass::Auth,
        404 => FailureClass::NotFound,
        429 => FailureClass::RateLimited,
        400..=499 => FailureClass::PermanentClient,
        _ => FailureClass::Transient,
    }
}

/// Engine-facing error taxonomy. Queue-level failures are recorded as
/// per-item outcomes and never surface through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("identity no longer owns this resource: {0}")]
    Auth(String),
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("remote rejected request: {0}")]
    PermanentClient(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid recovery code")]
    InvalidRecoveryCode,
    #[error("snapshot migration failed: {0}")]
    Migration(String),
}
