use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to HTTP clients. The messages are the exact strings sent in
/// the `error` field; failure details stay in the server log.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    #[error("Invalid input")]
    InvalidInput,

    #[error("File too large")]
    PayloadTooLarge,

    #[error("Error generating video")]
    EncodingFailure,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::EncodingFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
