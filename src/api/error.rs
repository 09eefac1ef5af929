//! JSON error envelope for API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Error;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Build an error response with the standard envelope
#[must_use]
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

/// Handler error wrapping the crate error
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// HTTP status for each error kind
#[must_use]
pub const fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateName(_) => StatusCode::CONFLICT,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::PluginExecution(_) => StatusCode::BAD_GATEWAY,
        Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Initialization(_)
        | Error::HistoryPersistence(_)
        | Error::Config(_)
        | Error::Database(_)
        | Error::Io(_)
        | Error::Serialization(_)
        | Error::Yaml(_)
        | Error::Toml(_)
        | Error::Sqlite(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "request rejected");
        }
        error_response(status, self.0.code(), &self.0.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
