//! Error types for chatrelay
//!
//! All errors implement `IntoResponse` for Axum handlers. Only client input
//! errors carry their message back to the caller; everything else collapses
//! into a generic service-unavailable body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Body returned for every non-client failure
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "Service temporarily unavailable. Please try again later.";

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Failed to acquire upstream credential: {reason}")]
    UpstreamAuth { reason: String },

    #[error("Upstream call to {endpoint} failed: {reason}")]
    UpstreamCall { endpoint: String, reason: String },

    #[error("Request to {endpoint} timed out after {timeout_seconds} seconds")]
    UpstreamTimeout {
        endpoint: String,
        timeout_seconds: u64,
    },

    #[error("Stream from {endpoint} interrupted after {deltas_received} deltas: {reason}")]
    StreamInterrupted {
        endpoint: String,
        deltas_received: usize,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// HTTP status surfaced to the caller
    pub fn status(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Validation(msg) => msg.clone(),
            _ => SERVICE_UNAVAILABLE_MESSAGE.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (self.status(), body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
