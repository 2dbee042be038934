pub mod automation;
pub mod contacts;
pub mod conversations;
pub mod health;
pub mod messages;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use parley_core::PlatformError;

/// Error envelope returned by every route: `{"error": "...", "code": "..."}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Wrapper mapping [`PlatformError`] codes onto HTTP status.
pub struct ApiError(pub PlatformError);

impl<E: Into<PlatformError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_INPUT" => StatusCode::BAD_REQUEST,
            "INVALID_STATE" | "CANCELLED" => StatusCode::CONFLICT,
            "EXTERNAL_FAILURE" | "PARSE_FAILURE" => StatusCode::BAD_GATEWAY,
            "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
