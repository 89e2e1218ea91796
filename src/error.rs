//! # Error Handling
//!
//! Application error types and their HTTP mappings, following the fault
//! taxonomy of the gateway:
//!
//! - **Transport faults** are fatal for a session and surface as closed
//!   connections, not HTTP errors.
//! - **Engine stream faults** cancel the owning pipeline.
//! - **Per-utterance engine faults** are logged and skipped inside the
//!   pipeline; they never reach this type.
//! - **Protocol violations** (bad handshake, early audio) are warnings; the
//!   connection stays open.
//!
//! What remains for HTTP status mapping is the handful of failures visible
//! at the endpoints themselves.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::engines::EngineError;

#[derive(Debug)]
pub enum AppError {
    /// Server-side failures with no better classification.
    Internal(String),

    /// Client sent invalid or malformed data.
    BadRequest(String),

    /// Requested resource does not exist.
    NotFound(String),

    /// Configuration file or environment problems.
    Config(String),

    /// Session lifecycle conflicts: duplicate identifier, session limit.
    Session(String),

    /// An external engine could not be reached or failed.
    Engine(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Session(msg) => write!(f, "Session error: {}", msg),
            AppError::Engine(msg) => write!(f, "Engine error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::Config(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Session(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "session_error",
                msg.clone(),
            ),
            AppError::Engine(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "engine_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = AppError::Session("id 'abc' already exists".to_string());
        assert_eq!(err.to_string(), "Session error: id 'abc' already exists");
    }

    #[test]
    fn test_engine_error_converts() {
        let err: AppError = EngineError::Connection("refused".into()).into();
        assert!(matches!(err, AppError::Engine(_)));
    }
}
