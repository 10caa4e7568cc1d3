//! Error type system for the danmaku aggregator
//!
//! This module provides:
//! - One error enum shared by every component
//! - HTTP status code mapping for the request boundary

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Main error type for the aggregator
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    // System-level errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Source-related errors
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    // API-related errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Collaborator errors that are always swallowed by the core
    #[error("AI matching error: {0}")]
    AiError(String),

    #[error("Remote mirror error: {0}")]
    MirrorError(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl AggregatorError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AggregatorError::InvalidRequest(_) | AggregatorError::DeserializationError(_) => {
                StatusCode::BAD_REQUEST
            }

            AggregatorError::NotFound(_) | AggregatorError::SourceNotFound(_) => {
                StatusCode::NOT_FOUND
            }

            AggregatorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

            AggregatorError::SourceError(_) | AggregatorError::NetworkError(_) => {
                StatusCode::BAD_GATEWAY
            }

            AggregatorError::ConfigError(_)
            | AggregatorError::AiError(_)
            | AggregatorError::MirrorError(_)
            | AggregatorError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            AggregatorError::ConfigError(_) => "ConfigError",
            AggregatorError::SourceNotFound(_) => "SourceNotFound",
            AggregatorError::SourceError(_) => "SourceError",
            AggregatorError::Timeout(_) => "Timeout",
            AggregatorError::NetworkError(_) => "NetworkError",
            AggregatorError::InvalidRequest(_) => "InvalidRequest",
            AggregatorError::NotFound(_) => "NotFound",
            AggregatorError::AiError(_) => "AiError",
            AggregatorError::MirrorError(_) => "MirrorError",
            AggregatorError::SerializationError(_) => "SerializationError",
            AggregatorError::DeserializationError(_) => "DeserializationError",
        }
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from an AggregatorError
    pub fn from_error(error: &AggregatorError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (trace_id: {})", self.error, self.message, self.trace_id)
    }
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with AggregatorError
pub type Result<T> = std::result::Result<T, AggregatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AggregatorError::InvalidRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AggregatorError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AggregatorError::Timeout("test".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AggregatorError::SourceError("test".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AggregatorError::MirrorError("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_types() {
        assert_eq!(
            AggregatorError::SourceNotFound("test".into()).error_type(),
            "SourceNotFound"
        );
        assert_eq!(AggregatorError::AiError("x".into()).error_type(), "AiError");
    }

    #[test]
    fn test_error_response_creation() {
        let error = AggregatorError::SourceNotFound("renren".into());
        let response = ErrorResponse::from_error(&error);

        assert_eq!(response.error, "SourceNotFound");
        assert!(response.message.contains("renren"));
        assert!(!response.trace_id.is_empty());
    }
}
