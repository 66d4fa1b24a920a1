//! Migration run bookkeeping: live progress and the persisted run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One failed item in a migration run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ItemError {
    /// Id of the `files` row that failed to migrate.
    pub record_id: i64,

    /// Human-readable failure reason.
    pub message: String,
}

/// Progress of a single migration run.
///
/// Created fresh for every invocation; runs are never merged. Counters only
/// grow while the run is live, and `migrated_files + failed_files` never
/// exceeds `total_files`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MigrationProgress {
    /// Number of candidate records enumerated at the start of the run.
    pub total_files: u64,

    /// Records whose pointer now reflects the new backend (including records
    /// that were already migrated and skipped without a re-upload).
    pub migrated_files: u64,

    /// Records that failed and were recorded in `errors`.
    pub failed_files: u64,

    /// Sum of migrated payload sizes in bytes.
    pub total_size: u64,

    /// Sum of monthly cost snapshots for migrated payloads.
    pub total_cost: f64,

    /// Wall-clock start of the run.
    pub start_time: DateTime<Utc>,

    /// Set when the run terminates, successfully or not.
    pub end_time: Option<DateTime<Utc>>,

    /// One entry per failed item, in failure order. Append-only.
    pub errors: Vec<ItemError>,
}

impl MigrationProgress {
    pub fn started_now(total_files: u64) -> Self {
        Self {
            total_files,
            migrated_files: 0,
            failed_files: 0,
            total_size: 0,
            total_cost: 0.0,
            start_time: Utc::now(),
            end_time: None,
            errors: Vec::new(),
        }
    }

    /// Duration of the run, up to now if still live.
    pub fn elapsed(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}

impl From<MigrationRunRow> for MigrationProgress {
    fn from(row: MigrationRunRow) -> Self {
        let errors = serde_json::from_str(&row.errors).unwrap_or_default();
        Self {
            total_files: row.total_files.max(0) as u64,
            migrated_files: row.migrated_files.max(0) as u64,
            failed_files: row.failed_files.max(0) as u64,
            total_size: row.total_size.max(0) as u64,
            total_cost: row.total_cost,
            start_time: row.started_at,
            end_time: row.finished_at,
            errors,
        }
    }
}

/// A persisted row of the append-only `migration_runs` event log.
///
/// Written once per run so status queries survive a process restart.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MigrationRunRow {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub migrated_files: i64,
    pub failed_files: i64,
    pub total_size: i64,
    pub total_cost: f64,
    /// JSON-encoded `Vec<ItemError>`.
    pub errors: String,
}
