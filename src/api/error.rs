/// Engine error → HTTP response mapping
///
/// Every handler returns `Result<_, ApiError>`; the body is always
/// `{"error": "<message>"}`.

use crate::error::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            EngineError::InvalidConfig(_) | EngineError::HealthCheckFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            EngineError::InvalidTransition { .. }
            | EngineError::ConfigExists(_)
            | EngineError::DuplicateSubscription { .. } => StatusCode::CONFLICT,
            EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
