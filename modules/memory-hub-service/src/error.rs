//! Error taxonomy for the memory hub.
//!
//! `BackendUnavailable` and `IndexQuery` are recovered inside the fan-out and
//! the cache; only the remaining variants ever reach an HTTP caller.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Index query failed: {0}")]
    IndexQuery(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HubResult<T> = std::result::Result<T, HubError>;

impl HubError {
    pub fn unavailable(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HubError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            HubError::IndexQuery(_)
            | HubError::Storage(_)
            | HubError::Serialization(_)
            | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for HubError {
    fn from(e: tokio::task::JoinError) -> Self {
        HubError::Internal(format!("blocking task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            HubError::Validation("empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HubError::NotFound("action #3".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HubError::unavailable("omi", "timed out").to_string(),
            "Backend omi unavailable: timed out"
        );
    }
}
