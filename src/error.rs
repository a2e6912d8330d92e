//! Typed API errors with the wire code vocabulary and HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to API callers. Each variant carries a stable wire code
/// used in the `{success:false, error:{code, message}}` envelope.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("run is not running")]
    RunNotRunning,
    #[error("run has already finished")]
    RunCompleted,
    #[error("{0}")]
    InvalidRunState(String),
    #[error("frontier is at capacity")]
    QueueFull,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::RunNotRunning => "RUN_NOT_RUNNING",
            ApiError::RunCompleted => "RUN_COMPLETED",
            ApiError::InvalidRunState(_) => "INVALID_RUN_STATE",
            ApiError::QueueFull => "QUEUE_FULL",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RunNotRunning
            | ApiError::RunCompleted
            | ApiError::InvalidRunState(_) => StatusCode::CONFLICT,
            ApiError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<crate::snapshot::SnapshotError> for ApiError {
    fn from(err: crate::snapshot::SnapshotError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::stores::StoreError> for ApiError {
    fn from(err: crate::stores::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
