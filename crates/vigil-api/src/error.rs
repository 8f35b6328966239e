//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error body across all endpoints,
//! mapping internal errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use vigil_core::error::VigilError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "busy", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 409 Conflict - state conflict (intent in flight, gate resolved).
    Conflict(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - component not ready.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        match &err {
            VigilError::UnknownIntent(name) => {
                ApiError::NotFound(format!("Unknown intent: {}", name))
            }
            VigilError::Busy => ApiError::Conflict(err.to_string()),
            VigilError::GuardrailDenied(msg) => ApiError::Conflict(msg.clone()),
            VigilError::Config(msg) => ApiError::BadRequest(msg.clone()),
            VigilError::Capture(msg) => ApiError::ServiceUnavailable(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_intent_maps_to_404() {
        let api: ApiError = VigilError::UnknownIntent("foo".into()).into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }

    #[test]
    fn test_busy_maps_to_409() {
        let api: ApiError = VigilError::Busy.into();
        assert!(matches!(api, ApiError::Conflict(_)));
    }

    #[test]
    fn test_capture_maps_to_503() {
        let api: ApiError = VigilError::Capture("no display".into()).into();
        assert!(matches!(api, ApiError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_fallthrough_maps_to_500() {
        let api: ApiError = VigilError::Injection("oops".into()).into();
        assert!(matches!(api, ApiError::Internal(_)));
    }
}
