//! Error handling for the surveillance agent

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation error (e.g. detection confidence outside [0,1])
    #[error("Validation error: {0}")]
    Validation(String),

    /// Live stream could not be opened or read
    #[error("Stream error: {0}")]
    Stream(String),

    /// Recording collaborator failed
    #[error("Recording error: {0}")]
    Recording(String),

    /// Person detector failed
    #[error("Detection error: {0}")]
    Detection(String),

    /// Analysis backend failed
    #[error("Backend error: {0}")]
    Backend(#[from] crate::ai_client::BackendError),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Session lifecycle error
    #[error("Session error: {0}")]
    Session(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl crate::retry::Retryable for Error {
    /// Stream and transport failures are worth another attempt
    fn is_retryable(&self) -> bool {
        match self {
            Error::Stream(_) | Error::Http(_) | Error::Io(_) => true,
            Error::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Stream(_) => (StatusCode::SERVICE_UNAVAILABLE, "STREAM_ERROR"),
            Error::Recording(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RECORDING_ERROR"),
            Error::Detection(_) => (StatusCode::BAD_GATEWAY, "DETECTION_ERROR"),
            Error::Backend(_) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Session(_) => (StatusCode::CONFLICT, "SESSION_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let resp = Error::Validation("bad".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = Error::Stream("gone".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
