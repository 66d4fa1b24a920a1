//! HTTP handlers for the chunked upload flow:
//! create session → upload/register chunks (any order) → combine.

use crate::{errors::AppError, state::AppState};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateSessionReq {
    pub file_name: String,
    pub file_size: u64,
    #[serde(default = "default_mime")]
    pub mime_type: String,
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RegisterChunkReq {
    /// Backend URL of a chunk the client uploaded out of band.
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    /// Final object key for the reassembled file.
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkUploaded {
    pub url: String,
}

/// POST `/uploads/sessions` — start a chunked upload.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionReq>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .chunks
        .create_session(&req.file_name, req.file_size, &req.mime_type)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// PUT `/uploads/sessions/{id}/chunks/{index}` — upload one chunk's bytes.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let url = state.chunks.upload_chunk(&session_id, index, body).await?;
    Ok(Json(ChunkUploaded { url }))
}

/// POST `/uploads/sessions/{id}/chunks/{index}` — register a chunk that was
/// uploaded directly to the backend. Last write wins per index.
pub async fn register_chunk(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, u32)>,
    Json(req): Json<RegisterChunkReq>,
) -> Result<impl IntoResponse, AppError> {
    state.chunks.register_chunk(&session_id, index, &req.url)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/uploads/sessions/{id}/complete` — reassemble and store the file.
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<CompleteUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.chunks.combine_chunks(&session_id, &req.key).await?;
    Ok(Json(outcome))
}
