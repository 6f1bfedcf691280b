//! Maps `ScanError` onto the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use reconmc_core::error::ScanError;

pub struct ApiError(pub ScanError);

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScanError::Validation(_) | ScanError::PrivateIp(_) => StatusCode::BAD_REQUEST,
            ScanError::NotFound => StatusCode::NOT_FOUND,
            ScanError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ScanError::RedisUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScanError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
