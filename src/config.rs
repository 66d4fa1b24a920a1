use crate::services::chunk_manager::{DEFAULT_CHUNK_SIZE, DEFAULT_SESSION_TTL_HOURS};
use crate::services::cost::CostModel;
use crate::services::migration::{DEFAULT_BATCH_SIZE, MigrationSettings};
use crate::services::object_store::{BackendConfig, DEFAULT_PRESIGN_TTL_SECS};
use crate::services::scheduler::DEFAULT_MAX_RETRIES;
use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use clap::Parser;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    // Current backend (R2-style).
    pub backend_endpoint: String,
    pub bucket: String,
    pub access_token: Option<String>,
    pub public_base_url: String,
    pub signing_secret: String,
    pub presign_ttl_secs: u64,

    // Cost model.
    pub cost_per_gb: f64,
    pub fx_rate: f64,
    pub minimum_margin: f64,

    // Chunked uploads.
    pub chunk_size_bytes: u64,
    pub session_ttl_hours: i64,

    // Migration.
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    /// Daily schedule as `HH:MM` (UTC); unset disables scheduling.
    pub migration_schedule: Option<String>,
    /// Webhook for owner notifications; unset falls back to log output.
    pub notify_url: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Cost-aware object storage service")]
pub struct Args {
    /// Host to bind to (overrides CLOUDVAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLOUDVAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides CLOUDVAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read an env var, falling back to `default`, parsing into `T`.
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_opt("CLOUDVAULT_HOST").unwrap_or_else(|| "0.0.0.0".into())),
            port: match args.port {
                Some(port) => port,
                None => env_or("CLOUDVAULT_PORT", 3000)?,
            },
            database_url: args.database_url.unwrap_or_else(|| {
                env_opt("CLOUDVAULT_DATABASE_URL")
                    .unwrap_or_else(|| "sqlite://./data/cloudvault.db".into())
            }),

            backend_endpoint: env_opt("CLOUDVAULT_R2_ENDPOINT")
                .unwrap_or_else(|| "https://localhost:9000".into()),
            bucket: env_opt("CLOUDVAULT_BUCKET").unwrap_or_else(|| "cloudvault".into()),
            access_token: env_opt("CLOUDVAULT_R2_TOKEN"),
            public_base_url: env_opt("CLOUDVAULT_PUBLIC_BASE_URL")
                .unwrap_or_else(|| "https://cloudvault.localhost".into()),
            signing_secret: env_opt("CLOUDVAULT_SIGNING_SECRET")
                .unwrap_or_else(|| "dev-secret".into()),
            presign_ttl_secs: env_or("CLOUDVAULT_PRESIGN_TTL_SECS", DEFAULT_PRESIGN_TTL_SECS)?,

            cost_per_gb: env_or("CLOUDVAULT_COST_PER_GB", 0.015)?,
            fx_rate: env_or("CLOUDVAULT_FX_RATE", 1.6)?,
            minimum_margin: env_or("CLOUDVAULT_MINIMUM_MARGIN", 2.0)?,

            chunk_size_bytes: env_or("CLOUDVAULT_CHUNK_SIZE_BYTES", DEFAULT_CHUNK_SIZE)?,
            session_ttl_hours: env_or("CLOUDVAULT_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?,

            batch_size: env_or("CLOUDVAULT_MIGRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            batch_delay_ms: env_or("CLOUDVAULT_MIGRATION_BATCH_DELAY_MS", 1000)?,
            max_retries: env_or("CLOUDVAULT_MIGRATION_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            migration_schedule: env_opt("CLOUDVAULT_MIGRATION_SCHEDULE"),
            notify_url: env_opt("CLOUDVAULT_NOTIFY_URL"),
        };

        if cfg.minimum_margin < 0.0 {
            bail!("CLOUDVAULT_MINIMUM_MARGIN must be non-negative");
        }
        if cfg.chunk_size_bytes == 0 {
            bail!("CLOUDVAULT_CHUNK_SIZE_BYTES must be positive");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.cost_per_gb, self.fx_rate, self.minimum_margin)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            endpoint: self.backend_endpoint.clone(),
            bucket: self.bucket.clone(),
            access_token: self.access_token.clone(),
            public_base_url: self.public_base_url.clone(),
            signing_secret: self.signing_secret.clone(),
        }
    }

    pub fn migration_settings(&self) -> MigrationSettings {
        MigrationSettings {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    /// Parse the `HH:MM` daily schedule, if configured.
    pub fn schedule_time(&self) -> Result<Option<NaiveTime>> {
        self.migration_schedule
            .as_deref()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M")
                    .with_context(|| format!("parsing CLOUDVAULT_MIGRATION_SCHEDULE `{}`", raw))
            })
            .transpose()
    }
}
