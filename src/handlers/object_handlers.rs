//! HTTP handlers for direct object operations.
//! Thin wrappers over the object store adapter; all key normalization and
//! cost annotation happens below this layer.

use crate::{errors::AppError, state::AppState};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Query params accepted by `GET /objects/{*key}`.
#[derive(Debug, Deserialize)]
pub struct GetObjectQuery {
    /// Return a short-lived signed URL instead of the public one.
    pub presigned: Option<bool>,
}

/// PUT `/objects/{*key}` — upload an object, returns `{key, url, cost}`.
pub async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let outcome = state.store.put(&key, body, &mime_type).await?;
    Ok(Json(outcome))
}

/// GET `/objects/{*key}` — resolve the retrieval URL (public or pre-signed).
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<GetObjectQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mut location = state.store.location(&key);
    if q.presigned.unwrap_or(false) {
        location.url = state.store.presigned_url(&key, state.presign_ttl_secs);
    }
    Ok(Json(location))
}

/// HEAD `/objects/{*key}` — object metadata as headers, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.store.head_metadata(&key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Some(cost) = meta.cost {
        if let Ok(value) = HeaderValue::from_str(&cost.to_string()) {
            headers.insert("x-amz-meta-monthly-cost", value);
        }
    }
    if let Some(uploaded) = meta.upload_date {
        if let Ok(value) = HeaderValue::from_str(&uploaded.to_rfc3339()) {
            headers.insert("x-amz-meta-upload-date", value);
        }
    }
    Ok(response)
}

/// DELETE `/objects/{*key}` — idempotent delete.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
