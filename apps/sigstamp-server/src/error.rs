//! Error types for the sigstamp server

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sigstamp_core::StampError;
use thiserror::Error;
use tracing::error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Arquivos ausentes")]
    MissingFiles,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("File not found: {0}")]
    NotFound(String),

    /// Preview failures are reported as a bare message
    #[error("{0}")]
    Preview(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::MissingFiles => (StatusCode::BAD_REQUEST, "MISSING_FILES"),
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServerError::InvalidUpload(_) => (StatusCode::BAD_REQUEST, "INVALID_UPLOAD"),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServerError::Preview(msg) => {
                error!("Preview failed: {}", msg);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    msg.clone(),
                )
                    .into_response();
            }
            ServerError::Processing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_ERROR"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            error!("{}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StampError> for ServerError {
    fn from(err: StampError) -> Self {
        match err {
            StampError::InvalidPlacement(msg) => ServerError::InvalidRequest(msg),
            StampError::ParseError(msg) => ServerError::Processing(format!("Failed to parse PDF: {}", msg)),
            StampError::Io(e) => ServerError::Internal(e.to_string()),
            other => ServerError::Processing(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("Worker task failed: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
