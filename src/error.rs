//! Error taxonomy shared across components, surfaced to HTTP clients at the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("could not read file for fingerprinting: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR tool not available: {0}")]
    ToolNotFound(String),
    #[error("OCR invocation failed: {0}")]
    Failed(String),
    #[error("OCR timed out after {0}s")]
    Timeout(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip writer error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error kinds exposed across the Job Manager / HTTP boundary.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    BadInput(String),
    #[error("no valid input: {0}")]
    NoValidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("job already terminal")]
    AlreadyTerminal,
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    #[error("cache I/O failure: {0}")]
    CacheIo(#[from] CacheError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::TransientIo(e.to_string())
    }
}

impl From<ArchiveError> for JobError {
    fn from(e: ArchiveError) -> Self {
        JobError::Internal(e.to_string())
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobError::BadInput(_) => StatusCode::BAD_REQUEST,
            JobError::NoValidInput(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::AlreadyTerminal => StatusCode::BAD_REQUEST,
            JobError::TransientIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::CacheIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
