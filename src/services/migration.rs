//! src/services/migration.rs
//!
//! Moves every non-deleted file record's backing bytes from the legacy
//! backend to the current backend, in rate-limited batches, and reports
//! exactly what succeeded and failed. One item's failure never aborts a
//! batch or the job; re-running after a partial failure is the prescribed
//! recovery path, since already-migrated records are detected by key
//! pattern and skipped without a re-upload.

use crate::models::file_record::FileRecord;
use crate::models::migration::{ItemError, MigrationProgress, MigrationRunRow};
use crate::models::pricing::{default_tiers, tier_for_usage};
use crate::services::cost::CostModel;
use crate::services::object_store::{ByteFetcher, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of records migrated concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default pause between batches, respecting backend rate limits.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum MigrationJobError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode run log: {0}")]
    RunLog(#[from] serde_json::Error),
}

/// Outbound notification sink for run summaries. Fire-and-forget: the
/// returned flag reports delivery but nothing acts on it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, content: &str) -> bool;
}

/// Posts `{title, content}` JSON to a webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, content: &str) -> bool {
        let body = serde_json::json!({ "title": title, "content": content });
        match self.http.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "notification rejected");
                false
            }
            Err(err) => {
                warn!(%err, "notification delivery failed");
                false
            }
        }
    }
}

/// Fallback sink when no webhook is configured: logs the notification.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, content: &str) -> bool {
        info!(title, content, "migration notification");
        true
    }
}

/// Batching knobs for a migration run.
#[derive(Clone, Copy, Debug)]
pub struct MigrationSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl MigrationSettings {
    /// Number of batches needed for `total` records.
    pub fn batch_count(&self, total: usize) -> usize {
        total.div_ceil(self.batch_size.max(1))
    }
}

enum ItemOutcome {
    /// Pointer already reflects the new backend; nothing was uploaded.
    Skipped,
    Migrated { size: u64, cost: f64 },
}

/// The S3→R2 migration job.
///
/// Not concurrency-guarded by itself: callers invoking `run` directly must
/// ensure a single run is in flight (the scheduled runner does this).
pub struct MigrationJob {
    db: Arc<SqlitePool>,
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn ByteFetcher>,
    notifier: Arc<dyn Notifier>,
    cost: CostModel,
    settings: MigrationSettings,
}

impl MigrationJob {
    pub fn new(
        db: Arc<SqlitePool>,
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn ByteFetcher>,
        notifier: Arc<dyn Notifier>,
        cost: CostModel,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            db,
            store,
            fetcher,
            notifier,
            cost,
            settings,
        }
    }

    pub fn settings(&self) -> MigrationSettings {
        self.settings
    }

    /// Run one full migration pass with the job's default settings.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MigrationProgress, MigrationJobError> {
        self.run_with(self.settings, cancel).await
    }

    /// Run one full migration pass over all non-deleted records.
    ///
    /// Per-item failures are recorded and swallowed; enumeration failure
    /// aborts the run after emitting a failure notification. `cancel` is
    /// checked between batches.
    pub async fn run_with(
        &self,
        settings: MigrationSettings,
        cancel: &CancellationToken,
    ) -> Result<MigrationProgress, MigrationJobError> {
        let records = match self.enumerate().await {
            Ok(records) => records,
            Err(err) => {
                self.notifier
                    .notify("Storage migration failed", &format!("enumeration failed: {err}"))
                    .await;
                return Err(err.into());
            }
        };

        let mut progress = MigrationProgress::started_now(records.len() as u64);
        let total_batches = settings.batch_count(records.len());
        info!(
            total_files = progress.total_files,
            total_batches, "starting storage migration"
        );
        self.notifier
            .notify(
                "Storage migration started",
                &format!("{} candidate files in {} batches", records.len(), total_batches),
            )
            .await;

        for (batch_no, batch) in records.chunks(settings.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                warn!(batch_no, "migration cancelled between batches");
                break;
            }

            let results = join_all(batch.iter().map(|record| self.migrate_record(record))).await;
            for result in results {
                match result {
                    Ok(ItemOutcome::Skipped) => progress.migrated_files += 1,
                    Ok(ItemOutcome::Migrated { size, cost }) => {
                        progress.migrated_files += 1;
                        progress.total_size += size;
                        progress.total_cost += cost;
                    }
                    Err(item_error) => {
                        progress.failed_files += 1;
                        progress.errors.push(item_error);
                    }
                }
            }
            debug!(
                batch = batch_no + 1,
                total_batches,
                migrated = progress.migrated_files,
                failed = progress.failed_files,
                "batch complete"
            );

            if batch_no + 1 < total_batches && !settings.batch_delay.is_zero() {
                tokio::time::sleep(settings.batch_delay).await;
            }
        }

        progress.end_time = Some(Utc::now());

        if let Err(err) = self.refresh_subscription_costs().await {
            warn!(%err, "failed to refresh subscription storage costs");
        }
        if let Err(err) = self.persist_run(&progress).await {
            warn!(%err, "failed to append migration run log");
        }

        self.notifier
            .notify(
                "Storage migration finished",
                &format!(
                    "migrated {}/{} files ({} failed), {} bytes, {:.2} monthly cost, {}s",
                    progress.migrated_files,
                    progress.total_files,
                    progress.failed_files,
                    progress.total_size,
                    progress.total_cost,
                    progress.elapsed().num_seconds()
                ),
            )
            .await;

        Ok(progress)
    }

    /// All non-deleted file records, in id order.
    async fn enumerate(&self) -> Result<Vec<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, owner_id, file_name, file_key, file_url, file_size,
                    mime_type, cost_snapshot, is_deleted
             FROM files WHERE is_deleted = 0 ORDER BY id",
        )
        .fetch_all(&*self.db)
        .await
    }

    /// Migrate one record, converting any failure into a recorded item error.
    async fn migrate_record(&self, record: &FileRecord) -> Result<ItemOutcome, ItemError> {
        if is_migrated_key(&record.file_key, record.owner_id) {
            debug!(record_id = record.id, "already migrated, skipping");
            return Ok(ItemOutcome::Skipped);
        }

        let item_error = |message: String| ItemError {
            record_id: record.id,
            message,
        };

        let bytes = self
            .fetcher
            .fetch(&record.file_url)
            .await
            .map_err(|err| item_error(format!("legacy fetch failed: {err}")))?;

        let size = bytes.len() as u64;
        let key = derive_key(record.owner_id, &record.file_name);
        let outcome = self
            .store
            .put(&key, bytes, record.mime_type_or_default())
            .await
            .map_err(|err| item_error(format!("upload failed: {err}")))?;

        sqlx::query(
            "UPDATE files SET file_key = ?, file_url = ?, cost_snapshot = ? WHERE id = ?",
        )
        .bind(&outcome.key)
        .bind(&outcome.url)
        .bind(outcome.cost)
        .bind(record.id)
        .execute(&*self.db)
        .await
        .map_err(|err| item_error(format!("pointer update failed: {err}")))?;

        Ok(ItemOutcome::Migrated {
            size,
            cost: outcome.cost,
        })
    }

    /// Manual remediation for a bad migration: delete the object from the
    /// new backend and soft-delete the record. Never invoked automatically.
    pub async fn rollback_record(&self, id: i64) -> Result<(), MigrationJobError> {
        let record = self.fetch_record(id).await?;
        self.store.delete(&record.file_key).await?;
        sqlx::query("UPDATE files SET is_deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        info!(record_id = id, "rolled back migrated record");
        Ok(())
    }

    /// Post-migration spot check: is the record's current URL reachable?
    pub async fn verify_integrity(&self, id: i64) -> Result<bool, MigrationJobError> {
        let record = self.fetch_record(id).await?;
        Ok(self.fetcher.probe(&record.file_url).await)
    }

    async fn fetch_record(&self, id: i64) -> Result<FileRecord, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, owner_id, file_name, file_key, file_url, file_size,
                    mime_type, cost_snapshot, is_deleted
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
    }

    /// Recompute each owner's storage cost from their live files and push it
    /// into the subscription row (the billing side effect of a run).
    async fn refresh_subscription_costs(&self) -> Result<(), sqlx::Error> {
        let usage: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT owner_id, COALESCE(SUM(file_size), 0)
             FROM files WHERE is_deleted = 0 GROUP BY owner_id",
        )
        .fetch_all(&*self.db)
        .await?;

        let tiers = default_tiers();
        for (owner_id, used_bytes) in usage {
            let used = used_bytes.max(0) as u64;
            let cost = self.cost.calculate(used);
            let tier_id = tier_for_usage(&tiers, used).map(|t| t.tier_id).unwrap_or("free");
            sqlx::query(
                "INSERT INTO subscriptions (owner_id, tier_id, storage_cost, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(owner_id) DO UPDATE SET
                     tier_id = excluded.tier_id,
                     storage_cost = excluded.storage_cost,
                     updated_at = excluded.updated_at",
            )
            .bind(owner_id)
            .bind(tier_id)
            .bind(cost)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        }
        Ok(())
    }

    /// Append one row to the `migration_runs` event log.
    async fn persist_run(&self, progress: &MigrationProgress) -> Result<(), MigrationJobError> {
        let errors = serde_json::to_string(&progress.errors)?;
        sqlx::query(
            "INSERT INTO migration_runs
                 (started_at, finished_at, total_files, migrated_files,
                  failed_files, total_size, total_cost, errors)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(progress.start_time)
        .bind(progress.end_time)
        .bind(progress.total_files as i64)
        .bind(progress.migrated_files as i64)
        .bind(progress.failed_files as i64)
        .bind(progress.total_size as i64)
        .bind(progress.total_cost)
        .bind(errors)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

/// Most recent row of the persisted run log, if any.
pub async fn latest_run(db: &SqlitePool) -> Result<Option<MigrationRunRow>, sqlx::Error> {
    sqlx::query_as::<_, MigrationRunRow>(
        "SELECT id, started_at, finished_at, total_files, migrated_files,
                failed_files, total_size, total_cost, errors
         FROM migration_runs ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(db)
    .await
}

/// New-backend key for a migrated file. The timestamp component guarantees
/// no collision with the legacy key even for repeated filenames.
fn derive_key(owner_id: i64, file_name: &str) -> String {
    format!(
        "owner/{}/files/{}-{}",
        owner_id,
        Utc::now().timestamp_millis(),
        file_name
    )
}

/// Key-pattern check for the idempotent re-run: a key already under the
/// owner's namespace points at the new backend.
fn is_migrated_key(file_key: &str, owner_id: i64) -> bool {
    file_key.starts_with(&format!("owner/{}/files/", owner_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::testing::MemoryBackend;
    use bytes::Bytes;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;

    struct RecordingNotifier {
        messages: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        fn titles(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, content: &str) -> bool {
            self.messages
                .lock()
                .unwrap()
                .push((title.to_string(), content.to_string()));
            true
        }
    }

    async fn test_db() -> Arc<SqlitePool> {
        // One connection: each sqlite::memory: connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        Arc::new(pool)
    }

    async fn insert_legacy_file(db: &SqlitePool, owner_id: i64, name: &str, size: i64) -> i64 {
        let url = format!("https://legacy.example.com/{}/{}", owner_id, name);
        let key = format!("legacy/{}", name);
        sqlx::query(
            "INSERT INTO files (owner_id, file_name, file_key, file_url, file_size, mime_type)
             VALUES (?, ?, ?, ?, ?, 'text/plain')",
        )
        .bind(owner_id)
        .bind(name)
        .bind(&key)
        .bind(&url)
        .bind(size)
        .execute(db)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    struct Fixture {
        db: Arc<SqlitePool>,
        backend: Arc<MemoryBackend>,
        notifier: Arc<RecordingNotifier>,
        job: MigrationJob,
    }

    async fn fixture() -> Fixture {
        let db = test_db().await;
        let cost = CostModel::new(0.015, 1.6, 2.0);
        let backend = Arc::new(MemoryBackend::new(cost));
        let notifier = Arc::new(RecordingNotifier::new());
        let job = MigrationJob::new(
            db.clone(),
            backend.clone(),
            backend.clone(),
            notifier.clone(),
            cost,
            MigrationSettings {
                batch_size: 2,
                batch_delay: Duration::ZERO,
            },
        );
        Fixture {
            db,
            backend,
            notifier,
            job,
        }
    }

    fn legacy_url(owner_id: i64, name: &str) -> String {
        format!("https://legacy.example.com/{}/{}", owner_id, name)
    }

    #[test]
    fn batch_partitioning_math() {
        let settings = MigrationSettings {
            batch_size: 10,
            batch_delay: Duration::ZERO,
        };
        assert_eq!(settings.batch_count(599), 60);
        assert_eq!(settings.batch_count(0), 0);

        let records: Vec<u32> = (0..599).collect();
        let batches: Vec<_> = records.chunks(settings.batch_size).collect();
        assert_eq!(batches.len(), 60);
        assert_eq!(batches.last().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn one_failing_item_never_aborts_the_run() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let name = format!("f{}.txt", i);
            let id = insert_legacy_file(&f.db, 1, &name, 100).await;
            if i == 1 {
                f.backend.fail_url(&legacy_url(1, &name));
            } else {
                f.backend
                    .seed_legacy(&legacy_url(1, &name), Bytes::from(vec![i as u8; 100]));
            }
            ids.push(id);
        }

        let progress = f.job.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(progress.total_files, 5);
        assert_eq!(progress.migrated_files, 4);
        assert_eq!(progress.failed_files, 1);
        assert_eq!(progress.migrated_files + progress.failed_files, progress.total_files);
        assert_eq!(progress.errors.len(), 1);
        assert_eq!(progress.errors[0].record_id, ids[1]);
        assert!(progress.end_time.is_some());

        // Migrated pointers now sit under the owner namespace; the failed one
        // keeps its legacy pointer.
        let records: Vec<FileRecord> = sqlx::query_as(
            "SELECT id, owner_id, file_name, file_key, file_url, file_size,
                    mime_type, cost_snapshot, is_deleted FROM files ORDER BY id",
        )
        .fetch_all(&*f.db)
        .await
        .unwrap();
        for record in &records {
            if record.id == ids[1] {
                assert!(record.file_key.starts_with("legacy/"));
            } else {
                assert!(record.file_key.starts_with("owner/1/files/"));
                assert!(record.cost_snapshot >= 2.0);
            }
        }
    }

    #[tokio::test]
    async fn second_run_skips_everything_without_reuploads() {
        let f = fixture().await;
        for i in 0..4 {
            let name = format!("g{}.txt", i);
            insert_legacy_file(&f.db, 2, &name, 50).await;
            f.backend
                .seed_legacy(&legacy_url(2, &name), Bytes::from_static(b"payload"));
        }

        let first = f.job.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.migrated_files, 4);
        let uploads_after_first = f.backend.put_count();

        let second = f.job.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.total_files, 4);
        assert_eq!(second.migrated_files, 4);
        assert_eq!(second.failed_files, 0);
        assert_eq!(f.backend.put_count(), uploads_after_first, "no re-uploads");
    }

    #[tokio::test]
    async fn cancelled_run_stops_between_batches() {
        let f = fixture().await;
        for i in 0..6 {
            let name = format!("h{}.txt", i);
            insert_legacy_file(&f.db, 3, &name, 10).await;
            f.backend
                .seed_legacy(&legacy_url(3, &name), Bytes::from_static(b"x"));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let progress = f.job.run(&cancel).await.unwrap();
        assert_eq!(progress.migrated_files, 0);
        assert_eq!(progress.failed_files, 0);
        assert!(progress.end_time.is_some());
    }

    #[tokio::test]
    async fn run_is_appended_to_the_event_log() {
        let f = fixture().await;
        insert_legacy_file(&f.db, 4, "solo.txt", 10).await;
        f.backend
            .seed_legacy(&legacy_url(4, "solo.txt"), Bytes::from_static(b"solo"));

        f.job.run(&CancellationToken::new()).await.unwrap();

        let row = latest_run(&f.db).await.unwrap().unwrap();
        assert_eq!(row.total_files, 1);
        assert_eq!(row.migrated_files, 1);
        assert_eq!(row.failed_files, 0);
        assert!(row.finished_at.is_some());
        assert_eq!(row.errors, "[]");
    }

    #[tokio::test]
    async fn run_notifies_start_and_summary() {
        let f = fixture().await;
        f.job.run(&CancellationToken::new()).await.unwrap();
        let titles = f.notifier.titles();
        assert_eq!(
            titles,
            vec![
                "Storage migration started".to_string(),
                "Storage migration finished".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn subscription_costs_refresh_after_a_run() {
        let f = fixture().await;
        insert_legacy_file(&f.db, 9, "a.txt", 1 << 30).await;
        f.backend.seed_legacy(
            &legacy_url(9, "a.txt"),
            Bytes::from(vec![0u8; 16]),
        );

        f.job.run(&CancellationToken::new()).await.unwrap();

        let (cost,): (f64,) =
            sqlx::query_as("SELECT storage_cost FROM subscriptions WHERE owner_id = 9")
                .fetch_one(&*f.db)
                .await
                .unwrap();
        assert!(cost >= 2.0);
    }

    #[tokio::test]
    async fn rollback_deletes_object_and_soft_deletes_record() {
        let f = fixture().await;
        let id = insert_legacy_file(&f.db, 5, "r.txt", 10).await;
        f.backend
            .seed_legacy(&legacy_url(5, "r.txt"), Bytes::from_static(b"r"));
        f.job.run(&CancellationToken::new()).await.unwrap();

        let record: FileRecord = sqlx::query_as(
            "SELECT id, owner_id, file_name, file_key, file_url, file_size,
                    mime_type, cost_snapshot, is_deleted FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*f.db)
        .await
        .unwrap();
        assert!(f.backend.contains(&record.file_key));

        f.job.rollback_record(id).await.unwrap();
        assert!(!f.backend.contains(&record.file_key));
        let (deleted,): (bool,) = sqlx::query_as("SELECT is_deleted FROM files WHERE id = ?")
            .bind(id)
            .fetch_one(&*f.db)
            .await
            .unwrap();
        assert!(deleted);
    }

    #[tokio::test]
    async fn verify_integrity_probes_the_current_pointer() {
        let f = fixture().await;
        let id = insert_legacy_file(&f.db, 6, "v.txt", 10).await;
        f.backend
            .seed_legacy(&legacy_url(6, "v.txt"), Bytes::from_static(b"v"));
        assert!(f.job.verify_integrity(id).await.unwrap());

        let missing = insert_legacy_file(&f.db, 6, "gone.txt", 10).await;
        assert!(!f.job.verify_integrity(missing).await.unwrap());
    }
}
