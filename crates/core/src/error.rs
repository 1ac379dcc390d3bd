//! Error taxonomy shared by the job core.

use thiserror::Error;

/// Result type used across the job core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Caller-facing failure categories.
///
/// Component errors (storage, limiter, log) are converted into this enum at the
/// API boundary. `NotFound` deliberately covers both "no such job" and "job
/// belongs to another tenant".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown job, expired job, or tenant mismatch.
    #[error("not found")]
    NotFound,

    /// A required credential (e.g. session qualifier) was not supplied.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A supplied credential did not match.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A per-tenant concurrency ceiling was reached.
    #[error("too many concurrent {resource} (limit {ceiling})")]
    RateLimited { resource: String, ceiling: u32 },

    /// An upstream dependency kept failing after the retry budget was spent.
    #[error("upstream unavailable: {0}")]
    TransientUpstream(String),

    /// The backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unexpected failure inside a job handler.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn rate_limited(resource: impl Into<String>, ceiling: u32) -> Self {
        Self::RateLimited {
            resource: resource.into(),
            ceiling,
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Stable machine-readable code (used for the `X-Error-Code` header).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound => "not_found",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::TransientUpstream(_) => "upstream_unavailable",
            CoreError::Storage(_) => "storage_unavailable",
            CoreError::Validation(_) => "validation_error",
            CoreError::Fatal(_) => "fatal",
        }
    }
}
