use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::ControlError;

/// JSON error body: `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn route_not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: "no such route".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let (status, kind) = match &err {
            ControlError::Validation(v) => (StatusCode::UNPROCESSABLE_ENTITY, v.code()),
            ControlError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ControlError::TargetInUse { .. } => (StatusCode::CONFLICT, "target_in_use"),
            ControlError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            ControlError::Store(e) => {
                error!(error = %e, "store failure while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal storage error".to_string(),
            _ => err.to_string(),
        };
        Self {
            status,
            kind,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
