//! Error types for textgate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for textgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for textgate.
///
/// `BackendUnavailable` deliberately renders a fixed message: the underlying
/// cause is logged at the relay boundary and must never reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("API key not configured")]
    ApiKeyNotConfigured,

    #[error("Error communicating with the model server")]
    BackendUnavailable(#[source] BackendError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Error::Unauthorized => (StatusCode::FORBIDDEN, self.to_string()),
            Error::ApiKeyNotConfigured => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Error::BackendUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "textgate_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failures of a single backend chat-completion call.
///
/// Connectivity, upstream status, and malformed-response failures are kept
/// distinct so callers can log a precise cause while mapping all of them to
/// one generic caller-facing condition.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to reach backend: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("backend returned status {status}")]
    Status { status: reqwest::StatusCode },

    #[error("failed to decode backend response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("backend response contained no completion choices")]
    EmptyCompletion,

    #[error("backend stream failed: {0}")]
    Transport(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_unavailable_message_is_generic() {
        let err = Error::BackendUnavailable(BackendError::EmptyCompletion);
        assert_eq!(err.to_string(), "Error communicating with the model server");
    }

    #[test]
    fn unauthorized_maps_to_403() {
        let response = Error::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn missing_key_maps_to_500() {
        let response = Error::ApiKeyNotConfigured.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn backend_unavailable_maps_to_503() {
        let response = Error::BackendUnavailable(BackendError::EmptyCompletion).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
