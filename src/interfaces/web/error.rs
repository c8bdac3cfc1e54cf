use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::core::store::error::StoreError;

/// Wire-side wrapper around `StoreError`. Internal faults keep their detail in
/// the logs and go out as an opaque 500.
pub(crate) struct ApiError(StoreError);

pub(crate) type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.0.to_string()),
            StoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            StoreError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            StoreError::Inconsistency(_) | StoreError::Db(_) => {
                error!("request failed: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "internal server error".to_string(),
                )
            }
        };
        (
            status,
            Json(serde_json::json!({
                "success": false,
                "code": code,
                "error": message
            })),
        )
            .into_response()
    }
}
