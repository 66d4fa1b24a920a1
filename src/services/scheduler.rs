//! src/services/scheduler.rs
//!
//! Wraps the migration job with bounded retry, a daily trigger, and a
//! single-run guard. The guard only covers triggers routed through the
//! runner; calling `MigrationJob::run` directly bypasses it.

use crate::models::migration::MigrationProgress;
use crate::services::migration::{MigrationJob, MigrationJobError, MigrationSettings, Notifier};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts per trigger before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base for the exponential backoff between attempts (`2^attempt * base`).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(60);

/// The runner's view of the migration job, kept behind a trait so retry and
/// scheduling behavior is testable without a real backend.
#[async_trait]
pub trait RunsMigration: Send + Sync {
    async fn run(
        &self,
        settings: Option<MigrationSettings>,
        cancel: &CancellationToken,
    ) -> Result<MigrationProgress, MigrationJobError>;
}

#[async_trait]
impl RunsMigration for MigrationJob {
    async fn run(
        &self,
        settings: Option<MigrationSettings>,
        cancel: &CancellationToken,
    ) -> Result<MigrationProgress, MigrationJobError> {
        self.run_with(settings.unwrap_or(self.settings()), cancel)
            .await
    }
}

/// Read-only snapshot for dashboards. Never blocks on a live run.
#[derive(Serialize, Clone, Debug)]
pub struct RunnerStatus {
    pub in_progress: bool,
    pub last_stats: Option<MigrationProgress>,
    pub last_run_time: Option<DateTime<Utc>>,
}

struct RunnerState {
    last_stats: Option<MigrationProgress>,
    last_run_time: Option<DateTime<Utc>>,
    current_cancel: CancellationToken,
}

/// Scheduled migration runner: `IDLE → RUNNING → IDLE`.
///
/// At most one run is ever in flight; a trigger while running is a no-op.
pub struct ScheduledRunner {
    job: Arc<dyn RunsMigration>,
    db: Arc<SqlitePool>,
    notifier: Arc<dyn Notifier>,
    in_flight: AtomicBool,
    state: Mutex<RunnerState>,
    max_retries: u32,
    backoff_base: Duration,
}

impl ScheduledRunner {
    pub fn new(
        job: Arc<dyn RunsMigration>,
        db: Arc<SqlitePool>,
        notifier: Arc<dyn Notifier>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            job,
            db,
            notifier,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(RunnerState {
                last_stats: None,
                last_run_time: None,
                current_cancel: CancellationToken::new(),
            }),
            max_retries,
            backoff_base,
        }
    }

    /// Run the job now, with retry, optionally overriding the batching
    /// settings for this run only. Returns `None` either when another run is
    /// already in flight (no-op, does not queue) or when all retries were
    /// exhausted.
    pub async fn trigger(&self, settings: Option<MigrationSettings>) -> Option<MigrationProgress> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("migration already in progress, ignoring trigger");
            return None;
        }

        let cancel = CancellationToken::new();
        self.state.lock().unwrap().current_cancel = cancel.clone();

        let result = self.run_with_retry(settings, &cancel).await;

        let mut state = self.state.lock().unwrap();
        state.last_run_time = Some(Utc::now());
        if let Some(stats) = &result {
            state.last_stats = Some(stats.clone());
        }
        drop(state);

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_with_retry(
        &self,
        settings: Option<MigrationSettings>,
        cancel: &CancellationToken,
    ) -> Option<MigrationProgress> {
        for attempt in 0..self.max_retries {
            match self.job.run(settings, cancel).await {
                Ok(stats) => return Some(stats),
                Err(err) => {
                    warn!(attempt = attempt + 1, %err, "migration attempt failed");
                    if attempt + 1 < self.max_retries {
                        let backoff = self.backoff_base * 2u32.pow(attempt);
                        debug!(?backoff, "backing off before retry");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.notifier
            .notify(
                "Storage migration failed",
                &format!("gave up after {} attempts", self.max_retries),
            )
            .await;
        None
    }

    /// Cancel the current run, if any. Checked between batches.
    pub fn cancel(&self) {
        self.state.lock().unwrap().current_cancel.cancel();
    }

    /// Status snapshot, falling back to the persisted run log when the
    /// process has not completed a run since starting.
    pub async fn status(&self) -> RunnerStatus {
        let (mut last_stats, last_run_time) = {
            let state = self.state.lock().unwrap();
            (state.last_stats.clone(), state.last_run_time)
        };

        if last_stats.is_none() {
            match crate::services::migration::latest_run(&self.db).await {
                Ok(row) => last_stats = row.map(Into::into),
                Err(err) => warn!(%err, "failed to read migration run log"),
            }
        }

        RunnerStatus {
            in_progress: self.in_flight.load(Ordering::SeqCst),
            last_run_time: last_run_time.or_else(|| {
                last_stats
                    .as_ref()
                    .and_then(|stats| stats.end_time)
            }),
            last_stats,
        }
    }

    /// Spawn the self-perpetuating daily trigger at `at` (UTC).
    pub fn spawn_daily(self: &Arc<Self>, at: NaiveTime) -> tokio::task::JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let target = next_occurrence(Utc::now(), at);
                let wait = (target - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                info!(%target, "next scheduled migration");
                tokio::time::sleep(wait).await;
                runner.trigger(None).await;
            }
        })
    }
}

/// Next occurrence of `at` strictly after `now`: today if still ahead,
/// otherwise tomorrow.
fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at).and_utc())
            .unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::migration::latest_run;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    struct ScriptedJob {
        /// Attempts that fail before the job starts succeeding.
        failures_before_success: u32,
        attempts: AtomicU32,
        /// Extra latency per attempt, to hold the runner in RUNNING.
        latency: Duration,
    }

    impl ScriptedJob {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                attempts: AtomicU32::new(0),
                latency: Duration::ZERO,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    #[async_trait]
    impl RunsMigration for ScriptedJob {
        async fn run(
            &self,
            _settings: Option<MigrationSettings>,
            _cancel: &CancellationToken,
        ) -> Result<MigrationProgress, MigrationJobError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if attempt < self.failures_before_success {
                Err(MigrationJobError::Database(sqlx::Error::PoolClosed))
            } else {
                let mut progress = MigrationProgress::started_now(1);
                progress.migrated_files = 1;
                progress.end_time = Some(Utc::now());
                Ok(progress)
            }
        }
    }

    struct NullNotifier {
        failures: AtomicU32,
    }

    impl NullNotifier {
        fn new() -> Self {
            Self {
                failures: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, title: &str, _content: &str) -> bool {
            if title.contains("failed") {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
            true
        }
    }

    async fn test_db() -> Arc<SqlitePool> {
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

    async fn runner_with(
        job: Arc<dyn RunsMigration>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> (Arc<ScheduledRunner>, Arc<NullNotifier>) {
        let notifier = Arc::new(NullNotifier::new());
        let runner = Arc::new(ScheduledRunner::new(
            job,
            test_db().await,
            notifier.clone(),
            max_retries,
            backoff_base,
        ));
        (runner, notifier)
    }

    #[tokio::test]
    async fn retries_with_backoff_then_returns_stats() {
        let backoff_base = Duration::from_millis(20);
        let job = Arc::new(ScriptedJob::new(2));
        let (runner, notifier) = runner_with(job.clone(), 3, backoff_base).await;

        let started = Instant::now();
        let stats = runner.trigger(None).await.expect("third attempt succeeds");
        // Two backoffs: base and 2*base.
        assert!(started.elapsed() >= backoff_base * 3);
        assert_eq!(stats.migrated_files, 1);
        assert_eq!(job.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_notify_and_return_no_stats() {
        let job = Arc::new(ScriptedJob::new(u32::MAX));
        let (runner, notifier) = runner_with(job.clone(), 2, Duration::from_millis(1)).await;

        assert!(runner.trigger(None).await.is_none());
        assert_eq!(job.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.failures.load(Ordering::SeqCst), 1);

        // Runner is back to IDLE and can be triggered again.
        let status = runner.status().await;
        assert!(!status.in_progress);
        assert!(status.last_run_time.is_some());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_a_no_op() {
        let job = Arc::new(ScriptedJob::new(0).with_latency(Duration::from_millis(200)));
        let (runner, _) = runner_with(job.clone(), 1, Duration::ZERO).await;

        let first = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.trigger(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(runner.status().await.in_progress);
        assert!(runner.trigger(None).await.is_none(), "second trigger is a no-op");

        let stats = first.await.unwrap();
        assert!(stats.is_some());
        assert_eq!(job.attempts.load(Ordering::SeqCst), 1, "no queued second run");
    }

    #[tokio::test]
    async fn status_falls_back_to_the_persisted_run_log() {
        let job = Arc::new(ScriptedJob::new(0));
        let (runner, _) = runner_with(job, 1, Duration::ZERO).await;

        sqlx::query(
            "INSERT INTO migration_runs
                 (started_at, finished_at, total_files, migrated_files,
                  failed_files, total_size, total_cost, errors)
             VALUES (?, ?, 7, 6, 1, 4096, 12.5, '[]')",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&*runner.db)
        .await
        .unwrap();
        assert!(latest_run(&runner.db).await.unwrap().is_some());

        let status = runner.status().await;
        let stats = status.last_stats.expect("log row surfaces as stats");
        assert_eq!(stats.total_files, 7);
        assert_eq!(stats.migrated_files, 6);
        assert_eq!(stats.failed_files, 1);
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow_when_passed() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let at = NaiveTime::from_hms_opt(3, 30, 0).unwrap();

        let next = next_occurrence(now, at);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 3, 30, 0).unwrap());

        let later_today = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        let next = next_occurrence(now, later_today);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap());
    }
}
