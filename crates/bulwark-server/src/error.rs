use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use bulwark_core::error::AppError;
use bulwark_core::models::{ImageFailure, RateLimitDecision};
use bulwark_core::rate_limit::now_secs;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::ValidationError(_) | AppError::SerializationError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::HttpError(_) | AppError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// 429 carrying the limiter's headers and `retry-after`.
pub struct RateLimited(pub RateLimitDecision);

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let decision = self.0;
        let mut response = ApiError(AppError::RateLimitExceeded).into_response();
        let headers = response.headers_mut();
        for (name, value) in rate_limit_headers(&decision) {
            headers.insert(name, value);
        }
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs(now_secs())),
        );
        response
    }
}

/// Structured image proxy failure as JSON with the proxy's status code.
pub struct ImageError(pub ImageFailure);

impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let error = match status {
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_content_type",
            StatusCode::SERVICE_UNAVAILABLE => "circuit_open",
            StatusCode::GATEWAY_TIMEOUT => "timeout",
            _ => "upstream_error",
        };
        let body = ErrorResponse {
            error: error.to_string(),
            message: self.0.error,
        };
        (status, axum::Json(body)).into_response()
    }
}

/// `x-ratelimit-limit`, `x-ratelimit-remaining` and `x-ratelimit-reset`.
pub fn rate_limit_headers(
    decision: &RateLimitDecision,
) -> [(header::HeaderName, HeaderValue); 3] {
    [
        (
            header::HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(decision.limit),
        ),
        (
            header::HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        ),
        (
            header::HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(decision.reset_at),
        ),
    ]
}
