//! Maps [`emulsion_core::EngineError`] onto HTTP responses at the ingest/
//! retry boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use emulsion_core::EngineError;
use serde_json::json;

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            EngineError::InvalidRequest(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            EngineError::InvalidMedia(msg) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, msg),
            EngineError::Cancelled => Self::new(StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}
