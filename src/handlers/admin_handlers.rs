//! Administrative trigger surface for the migration job.

use crate::{errors::AppError, services::migration::MigrationSettings, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct RunMigrationReq {
    /// Records per batch; defaults to the configured batch size.
    pub batch_size: Option<usize>,
    /// Pause between batches in milliseconds.
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub record_id: i64,
    pub reachable: bool,
}

/// POST `/admin/migration/run` — trigger a migration run in the background.
///
/// Returns 202 immediately; a trigger while a run is in flight is a no-op.
pub async fn run_migration(
    State(state): State<AppState>,
    body: Option<Json<RunMigrationReq>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let defaults = state.job.settings();
    let overrides = if req.batch_size.is_some() || req.delay_ms.is_some() {
        Some(MigrationSettings {
            batch_size: req.batch_size.unwrap_or(defaults.batch_size),
            batch_delay: req
                .delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
        })
    } else {
        None
    };

    let already_running = state.runner.status().await.in_progress;
    if !already_running {
        let runner = state.runner.clone();
        tokio::spawn(async move {
            runner.trigger(overrides).await;
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "started": !already_running })),
    ))
}

/// GET `/admin/migration/status` — non-blocking status snapshot.
pub async fn migration_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.status().await)
}

/// POST `/admin/migration/cancel` — cancel the current run between batches.
pub async fn cancel_migration(State(state): State<AppState>) -> impl IntoResponse {
    state.runner.cancel();
    (StatusCode::ACCEPTED, Json(json!({ "cancelled": true })))
}

/// POST `/admin/migration/rollback/{id}` — manual remediation: delete the
/// migrated object and soft-delete the record.
pub async fn rollback_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.job.rollback_record(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/admin/migration/verify/{id}` — spot-check a record's current URL.
pub async fn verify_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let reachable = state.job.verify_integrity(id).await?;
    Ok(Json(VerifyResult {
        record_id: id,
        reachable,
    }))
}
