//! Error types for the HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use switchboard_discord::DiscordError;
use switchboard_relay::RelayError;

/// Errors a handler can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request input.
    #[error("{0}")]
    BadRequest(String),

    /// Unknown guild or channel.
    #[error("{0}")]
    NotFound(String),

    /// Anything the caller cannot fix.
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(msg) => ApiError::BadRequest(msg),
            RelayError::NotFound(what) => ApiError::NotFound(format!("not found: {}", what)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DiscordError> for ApiError {
    fn from(err: DiscordError) -> Self {
        RelayError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
