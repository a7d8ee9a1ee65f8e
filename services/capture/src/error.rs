//! Custom error types for the capture service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{ingestion::IngestionError, session::SessionError, storage::StorageError};

/// Custom error type for the capture service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Resource not found, with message
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource existed but is no longer usable
    #[error("Gone: {0}")]
    Gone(String),

    /// Conflicting state, with message
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] common::error::DatabaseError),

    /// Image storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound("Session not found or expired".to_string()),
            SessionError::Expired(_) => ApiError::Gone("Session expired".to_string()),
            SessionError::AlreadyConsumed(_) => {
                ApiError::Conflict("Session has already been used".to_string())
            }
            SessionError::NotConsumed(_) => {
                ApiError::Conflict("Session has not been used yet".to_string())
            }
            SessionError::Creation(_) | SessionError::Store(_) => {
                error!("Session operation failed: {}", err);
                ApiError::InternalServerError
            }
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::InvalidImageReference => {
                ApiError::BadRequest("Image URL is required".to_string())
            }
            IngestionError::Persistence(e) => ApiError::Database(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            ApiError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store receipt image".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
