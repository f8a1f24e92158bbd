use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use storyface::StoryfaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] StoryfaceError),

    #[error("face detector is not ready")]
    NotReady,

    #[error("missing multipart field `{0}`")]
    MissingField(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upload exceeds {0} MB")]
    PayloadTooLarge(usize),

    #[error("file not found")]
    NotFound,

    #[error("request exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    /// Status code reported to clients.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(err) => match err {
                StoryfaceError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                StoryfaceError::Decode(_)
                | StoryfaceError::InvalidGeometry(_)
                | StoryfaceError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
                StoryfaceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                StoryfaceError::MissingDetector => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::MissingField(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Config(_)
            | ApiError::InvalidConfig(_)
            | ApiError::Telemetry(_)
            | ApiError::Io(_)
            | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a multipart read failure, keeping axum's body-limit rejection.
    pub fn from_multipart(err: MultipartError, limit_mb: usize) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(limit_mb)
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
