// HTTP error envelope
//
// Every failure leaves the server as `{type: "error", error: {code,
// message}}` with a status derived from the error kind. SSE failures after
// headers are sent become terminal error events instead (see sse.rs).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use relay_core::error::GatewayError;

/// API-level error with its HTTP mapping
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Missing or invalid API key")
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Rate limit exceeded")
    }

    pub fn queue_full() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "queue_full",
            "Admission queue is full",
        )
    }

    pub fn queue_timeout() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_timeout",
            "Timed out waiting for an execution slot",
        )
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "Content-Type must be application/json",
        )
    }

    pub fn body_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "body_too_large",
            format!("Request body exceeds {limit} bytes"),
        )
    }

    pub fn body_read_timeout() -> Self {
        Self::new(
            StatusCode::REQUEST_TIMEOUT,
            "body_read_timeout",
            "Timed out reading the request body",
        )
    }

    pub fn request_timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", "Request timed out")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::Validation(_) | GatewayError::Plugin(_) | GatewayError::Mcp(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::ProviderExecution {
                is_rate_limit: true,
                ..
            } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ProviderExecution { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Vector(_) | GatewayError::Embedding(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "type": "error",
            "error": {"code": self.code, "message": self.message}
        }));
        (self.status, body).into_response()
    }
}
