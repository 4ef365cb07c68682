use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Errors a stage (or the dispatcher) turns into a client response
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid CSRF token")]
    CsrfMismatch,

    #[error("Session store unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StageResult<T> = std::result::Result<T, StageError>;

impl StageError {
    pub fn status(&self) -> StatusCode {
        match self {
            StageError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            StageError::UnsupportedCharset(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            StageError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StageError::CsrfMismatch => StatusCode::FORBIDDEN,
            StageError::SessionUnavailable(_) | StageError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StageError::NotFound(_) => StatusCode::NOT_FOUND,
            StageError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            StageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            StageError::PayloadTooLarge(_) => "payload_too_large",
            StageError::UnsupportedCharset(_) => "unsupported_charset",
            StageError::BadRequest(_) => "bad_request",
            StageError::CsrfMismatch => "invalid_csrf_token",
            StageError::SessionUnavailable(_) => "session_unavailable",
            StageError::NotFound(_) => "not_found",
            StageError::MethodNotAllowed(_) => "method_not_allowed",
            StageError::Timeout => "timeout",
            StageError::Internal(_) => "internal_error",
        }
    }

    /// Message shown to the client. Backend details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            StageError::SessionUnavailable(_) => "Session store unavailable".into(),
            StageError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

/// JSON error body: `{ "error": code, "message": text }`.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

impl IntoResponse for StageError {
    fn into_response(self) -> Response {
        error_response(self.status(), self.code(), &self.public_message())
    }
}
