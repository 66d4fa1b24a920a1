use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::chunk_manager::ChunkSessionManager;
use services::migration::{LogNotifier, MigrationJob, Notifier, WebhookNotifier};
use services::object_store::{ByteFetcher, HttpFetcher, ObjectStore, R2Client};
use services::scheduler::{DEFAULT_BACKOFF_BASE, ScheduledRunner};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate_only) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting cloudvault with config: {:?}", cfg);

    // The pricing table is static config; refuse to boot if it is broken.
    models::pricing::validate_tiers(&models::pricing::default_tiers())
        .map_err(|err| anyhow::anyhow!("invalid pricing tiers: {err}"))?;

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if !Path::new(db_path).exists() {
        std::fs::File::create(db_path)?;
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    run_migrations(&db).await?;
    if migrate_only {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let cost = cfg.cost_model();
    let store: Arc<dyn ObjectStore> = Arc::new(R2Client::new(cfg.backend_config(), cost));
    let fetcher: Arc<dyn ByteFetcher> = Arc::new(HttpFetcher::new());
    let notifier: Arc<dyn Notifier> = match &cfg.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let chunks = ChunkSessionManager::with_settings(
        store.clone(),
        fetcher.clone(),
        cfg.chunk_size_bytes,
        chrono::Duration::hours(cfg.session_ttl_hours),
    );
    let job = Arc::new(MigrationJob::new(
        db.clone(),
        store.clone(),
        fetcher,
        notifier.clone(),
        cost,
        cfg.migration_settings(),
    ));
    let runner = Arc::new(ScheduledRunner::new(
        job.clone(),
        db.clone(),
        notifier,
        cfg.max_retries,
        DEFAULT_BACKOFF_BASE,
    ));

    if let Some(at) = cfg.schedule_time()? {
        tracing::info!("Daily migration scheduled at {} UTC", at);
        runner.spawn_daily(at);
    }

    // --- Build router ---
    let app_state = AppState {
        db,
        store,
        chunks,
        job,
        runner,
        presign_ttl_secs: cfg.presign_ttl_secs,
    };
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let sql = include_str!("../migrations/0001_init.sql");
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::debug!("Running {} migration statements...", statements.len());

    for stmt in statements {
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
