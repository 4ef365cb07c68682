//! Error types for session storage and cookies

use crate::db::DatabaseError;
use thiserror::Error;

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token is not a well-formed session id
    #[error("Invalid session id: {0}")]
    InvalidId(String),

    /// Signing key rejected
    #[error("Invalid cookie secret: {0}")]
    InvalidSecret(String),

    /// Cookie could not be encoded as a header
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Convenience type alias for Result with SessionError
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Whether the backend itself failed, as opposed to bad stored data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SessionError::DatabaseError(_))
    }
}

impl From<rusqlite::Error> for SessionError {
    fn from(err: rusqlite::Error) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

impl From<DatabaseError> for SessionError {
    fn from(err: DatabaseError) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}
