use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use jobstream_core::CoreError;
use jobstream_infra::RunnerError;

use crate::context::ERROR_CODE_HEADER;

/// Error type returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound => StatusCode::NOT_FOUND,
        CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::TransientUpstream(_) => StatusCode::BAD_GATEWAY,
        CoreError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = match &err {
            CoreError::NotFound => "job not found".to_string(),
            other => other.to_string(),
        };
        Self::new(status_for(&err), err.code(), message)
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        let code = match err {
            RunnerError::QueueFull => "queue_full",
            RunnerError::ShuttingDown => "shutting_down",
        };
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_error(self.status, self.code, self.message)
    }
}

/// `{error, message}` body plus an `X-Error-Code` header.
pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let mut res = (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response();
    res.headers_mut()
        .insert(ERROR_CODE_HEADER, HeaderValue::from_static(code));
    res
}
