//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order::OrderServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request: missing entity or business rejection.
    BadRequest(String),
    /// No decision within the bridge timeout.
    Timeout(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Timeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderServiceError> for ApiError {
    fn from(err: OrderServiceError) -> Self {
        match err {
            OrderServiceError::OrderNotFound(id) => {
                ApiError::BadRequest(format!("Order: {id} not found!"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
