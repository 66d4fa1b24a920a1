//! Shared application state handed to every handler.

use crate::services::chunk_manager::ChunkSessionManager;
use crate::services::migration::MigrationJob;
use crate::services::object_store::ObjectStore;
use crate::services::scheduler::ScheduledRunner;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub store: Arc<dyn ObjectStore>,
    pub chunks: ChunkSessionManager,
    pub job: Arc<MigrationJob>,
    pub runner: Arc<ScheduledRunner>,
    pub presign_ttl_secs: u64,
}
