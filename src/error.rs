//! Pictor error types

use std::time::Duration;

/// Pictor error types.
///
/// `Clone` so that a single generation outcome can be handed to every
/// caller waiting on the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PictorError {
    // Admission errors
    #[error("rate limited")]
    RateLimited,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    // Backend errors, already translated from `BackendError`
    /// Transient backend failures persisted through every retry.
    #[error("generation failed after {attempts} attempt(s): {reason}")]
    BackendTransient { attempts: u32, reason: String },

    /// The backend refused the request (e.g. content policy).
    #[error("generation rejected: {reason}")]
    BackendTerminal { reason: String },

    /// The caller stopped waiting. Not a backend failure.
    #[error("caller cancelled")]
    Cancelled,

    // Configuration errors
    #[error("no image backend configured")]
    NoBackend,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PictorError {
    /// User-facing message category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PictorError::RateLimited => ErrorCategory::RateLimited,
            PictorError::ValidationFailed(_) => ErrorCategory::InvalidInput,
            PictorError::Cancelled => ErrorCategory::Cancelled,
            _ => ErrorCategory::GenerationFailed,
        }
    }
}

/// Coarse category the chat layer turns into a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimited,
    InvalidInput,
    GenerationFailed,
    Cancelled,
}

/// Failure reported by an [`ImageBackend`](crate::providers::ImageBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The call did not finish within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend refused this request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend is temporarily unable to serve (overload, 5xx, network).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Unavailable(_))
    }
}

/// Result type alias for Pictor operations
pub type Result<T> = std::result::Result<T, PictorError>;

/// Result type alias for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;
