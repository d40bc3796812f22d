//! # Error Handling
//!
//! Every failure the call pipeline can produce is one variant of [`AppError`].
//! The variants follow the lifecycle of a call so that a caller can decide
//! whether a request is worth retrying:
//!
//! | Variant | HTTP | Retriable |
//! |---|---|---|
//! | `ValidationError` | 400 | no |
//! | `TranscriptionError` | 502 | yes |
//! | `ClassificationError` | 500 | yes |
//! | `SessionNotFound` | 404 | no |
//! | `PersistenceError` | 500 | yes |
//! | `Conflict` | 409 | no |
//!
//! The remaining variants (`BadRequest`, `NotFound`, `ConfigError`, `Internal`)
//! cover the HTTP surface and application bootstrap.
//!
//! ## Key Rust Concepts:
//! - **From trait**: lets `?` convert library errors into `AppError`
//! - **ResponseError trait**: turns an `AppError` into a JSON HTTP response
//! - **Display trait**: the human readable message used in logs and responses

use actix_web::{HttpResponse, ResponseError};
use actix_web::http::StatusCode;
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::SessionNotFound("call-42".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Audio payload is missing, undecodable or in a format we do not accept
    ValidationError(String),

    /// Speech could not be turned into text (unintelligible audio or the
    /// transcription backend is unreachable)
    TranscriptionError(String),

    /// The classifier failed to produce a usable probability
    ClassificationError(String),

    /// Finalize or feedback on a call id that is unknown or already evicted
    SessionNotFound(String),

    /// Durable write or read failure
    PersistenceError(String),

    /// A different record is already stored under the same call id
    Conflict(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Internal server errors
    Internal(String),
}

impl AppError {
    /// Machine readable error kind, used as the `type` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::TranscriptionError(_) => "transcription_error",
            AppError::ClassificationError(_) => "classification_error",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::PersistenceError(_) => "persistence_error",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Transcription, classification and persistence failures are transient:
    /// the session keeps the chunk that was already appended, so a retried
    /// scoring call does not lose context. Validation and missing sessions
    /// will fail the same way again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AppError::TranscriptionError(_)
                | AppError::ClassificationError(_)
                | AppError::PersistenceError(_)
        )
    }

    fn message(&self) -> &str {
        match self {
            AppError::ValidationError(msg)
            | AppError::TranscriptionError(msg)
            | AppError::ClassificationError(msg)
            | AppError::SessionNotFound(msg)
            | AppError::PersistenceError(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ConfigError(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::TranscriptionError(msg) => write!(f, "Transcription error: {}", msg),
            AppError::ClassificationError(msg) => write!(f, "Classification error: {}", msg),
            AppError::SessionNotFound(call_id) => write!(f, "Call session not found: {}", call_id),
            AppError::PersistenceError(msg) => write!(f, "Persistence error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "session_not_found",
///     "message": "call-42",
///     "retriable": false,
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SessionNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TranscriptionError(_) => StatusCode::BAD_GATEWAY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ClassificationError(_)
            | AppError::PersistenceError(_)
            | AppError::ConfigError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
                "retriable": self.is_retriable(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anything reported through `anyhow` is treated as an internal failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::PersistenceError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::PersistenceError(format!("I/O error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
