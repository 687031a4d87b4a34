//! Control API error types.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use snipe_monitor::SessionError;

use crate::types::ErrorResponse;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Invalid control configuration: {0}")]
    Config(String),

    #[error("Control server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ControlResult<T> = Result<T, ControlError>;

impl ControlError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Session(SessionError::Config(_)) => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::TaskGone) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Session(_) => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Metrics(_) | Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        if matches!(self, Self::Unauthorized) {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"snipe\"")],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}
