use crate::services::chunk_manager::ChunkError;
use crate::services::migration::MigrationJobError;
use crate::services::object_store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::MetadataUnavailable { .. } => StatusCode::NOT_FOUND,
            StoreError::UploadFailed { .. }
            | StoreError::DeleteFailed { .. }
            | StoreError::FetchFailed { .. }
            | StoreError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ChunkError> for AppError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::SessionNotFound(_) => AppError::not_found(err.to_string()),
            ChunkError::EmptyFileName | ChunkError::IndexOutOfRange { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            ChunkError::IncompleteUpload { .. } | ChunkError::ChunkNotFound(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            ChunkError::Store(inner) => inner.into(),
        }
    }
}

impl From<MigrationJobError> for AppError {
    fn from(err: MigrationJobError) -> Self {
        match err {
            MigrationJobError::Database(sqlx::Error::RowNotFound) => {
                AppError::not_found("record not found")
            }
            other => AppError::internal(other.to_string()),
        }
    }
}
