//! Error taxonomy for the per-user coordinator and its collaborators.
//!
//! See spec §7. `Validation`/`NotFound` surface to callers verbatim;
//! `InvariantViolation` means the running actor caught itself in an
//! inconsistent state and the operation that triggered it must not leave
//! partial writes behind; the rest describe provider/account failures that
//! the two async pipelines handle by retry, DLQ, or account deactivation.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("auth revoked: {0}")]
    AuthRevoked(String),

    #[error("cursor stale")]
    CursorStale,

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("provider fatal error: {0}")]
    ProviderFatal(String),

    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// HTTP-equivalent status per spec §6.3/§7. Internal failures are
    /// redacted to a generic message at the RPC boundary; callers needing
    /// the detail should consult the journal or server logs.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvariantViolation(_)
            | Error::AuthRevoked(_)
            | Error::CursorStale
            | Error::ProviderTransient(_)
            | Error::ProviderFatal(_)
            | Error::StorageFull(_)
            | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn redacted_message(&self) -> String {
        match self {
            Error::Validation(m) | Error::NotFound(m) => m.clone(),
            _ => "internal error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
