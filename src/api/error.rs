//! API error mapping: domain errors to status codes and the
//! `{error, detail?, code?, timestamp}` body shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::domain::error::{AgentError, ErrorCode, TaskError, WebhookError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub error: String,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error: error.into(),
            detail: None,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, what)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, message)
    }

    pub fn too_many_requests(remaining: u32) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::CapacityExceeded,
            "rate limit exceeded",
        )
        .with_detail(format!("{remaining} requests remaining in window"))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn status_for(code: ErrorCode) -> StatusCode {
        match code {
            ErrorCode::Validation
            | ErrorCode::InvalidState
            | ErrorCode::InvalidTransition
            | ErrorCode::CyclicDependency
            | ErrorCode::CapacityExceeded => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.error,
            "detail": self.detail,
            "code": self.code.as_str(),
            "timestamp": Utc::now(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let code = err.code();
        Self {
            status: Self::status_for(code),
            code,
            error: err.to_string(),
            detail: None,
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let code = err.code();
        Self {
            status: Self::status_for(code),
            code,
            error: err.to_string(),
            detail: None,
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let code = err.code();
        Self {
            status: Self::status_for(code),
            code,
            error: err.to_string(),
            detail: None,
        }
    }
}
