//! Error responses.

use axum::{
    http::{header::InvalidHeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use warden_auth::AuthError;

/// An error rendered as `{"error": "..."}` with a matching status.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// 400 with `message`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// 500 with `message`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::Credential(_) | AuthError::Token(_) | AuthError::Authorization(_) => {
                StatusCode::UNAUTHORIZED
            },
            AuthError::Protocol(_) => StatusCode::BAD_REQUEST,
            AuthError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Storage(_) | AuthError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<InvalidHeaderValue> for ApiError {
    fn from(err: InvalidHeaderValue) -> Self {
        Self::internal(format!("invalid header value: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
