//! Defines routes for the storage core.
//!
//! ## Structure
//! - **Object endpoints**
//!   - `PUT    /objects/{*key}` — upload object, returns `{key, url, cost}`
//!   - `GET    /objects/{*key}` — resolve public or pre-signed URL
//!   - `HEAD   /objects/{*key}` — metadata only
//!   - `DELETE /objects/{*key}` — idempotent delete
//!
//! - **Chunked upload endpoints**
//!   - `POST /uploads/sessions` — start a session
//!   - `PUT  /uploads/sessions/{id}/chunks/{index}` — upload one chunk
//!   - `POST /uploads/sessions/{id}/chunks/{index}` — register a chunk URL
//!   - `POST /uploads/sessions/{id}/complete` — reassemble into one object
//!
//! - **Admin endpoints** — migration trigger/status/cancel plus per-record
//!   rollback and integrity verification.
//!
//! The wildcard `*key` allows nested keys like `owner/7/files/img.jpg`.

use crate::{
    handlers::{
        admin_handlers::{
            cancel_migration, migration_status, rollback_record, run_migration, verify_record,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, put_object},
        upload_handlers::{complete_upload, create_session, register_chunk, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Request bodies may carry a full chunk (50 MiB default) plus headroom.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Build and return the router for the full HTTP surface.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // direct object routes
        .route(
            "/objects/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // chunked upload routes
        .route("/uploads/sessions", post(create_session))
        .route(
            "/uploads/sessions/{id}/chunks/{index}",
            put(upload_chunk).post(register_chunk),
        )
        .route("/uploads/sessions/{id}/complete", post(complete_upload))
        // admin trigger surface
        .route("/admin/migration/run", post(run_migration))
        .route("/admin/migration/status", get(migration_status))
        .route("/admin/migration/cancel", post(cancel_migration))
        .route("/admin/migration/rollback/{id}", post(rollback_record))
        .route("/admin/migration/verify/{id}", get(verify_record))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
