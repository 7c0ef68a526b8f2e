//! Engine error taxonomy shared by the builder, the store and the finder.
use thiserror::Error;

use crate::embedder::EmbedderError;

/// Errors surfaced by the retrieval engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Empty or malformed text, query or record. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The subject is not a key of the category map.
    #[error("unknown subject '{subject}'; expected one of: {}", known.join(", "))]
    UnknownSubject { subject: String, known: Vec<String> },

    /// Embedding service or store backend failed transiently and retries ran out.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The index was built with a different embedding function. Requires a rebuild.
    #[error("index version mismatch: index built with {found}, query embedder is {expected}")]
    IndexVersionMismatch { expected: String, found: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Whether the error stems from the caller's request (4xx-equivalent).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnknownSubject { .. })
    }
}

impl From<EmbedderError> for EngineError {
    fn from(e: EmbedderError) -> Self {
        match e {
            EmbedderError::InvalidInput(msg) => Self::InvalidInput(msg),
            EmbedderError::DimensionMismatch { expected, actual } => Self::IndexVersionMismatch {
                expected: format!("{expected} dimensions"),
                found: format!("{actual} dimensions"),
            },
            other => Self::ServiceUnavailable(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::ServiceUnavailable(format!("store busy: {e}"))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(e: r2d2::Error) -> Self {
        Self::ServiceUnavailable(format!("store connection unavailable: {e}"))
    }
}
