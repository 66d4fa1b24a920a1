//! src/services/object_store.rs
//!
//! The sole code path that talks to the backing object store. `R2Client`
//! speaks plain HTTP to an S3-compatible backend (`{endpoint}/{bucket}/{key}`
//! with a bearer token); everything above it goes through the `ObjectStore`
//! trait so the chunk manager and migration job can run against in-memory
//! doubles in tests.

use crate::services::cost::CostModel;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Custom metadata header carrying the monthly cost snapshot.
const META_COST_HEADER: &str = "x-amz-meta-monthly-cost";
/// Custom metadata header carrying the upload timestamp.
const META_UPLOAD_DATE_HEADER: &str = "x-amz-meta-upload-date";
/// Sentinel key probed by `verify_connection`.
const PROBE_KEY: &str = ".cloudvault-probe";
/// Default lifetime of a pre-signed URL.
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 3600;
/// Timeout applied to every backend request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store credentials are not configured")]
    BackendUnavailable,
    #[error("upload of `{key}` failed: {status} {detail}")]
    UploadFailed {
        key: String,
        status: u16,
        detail: String,
    },
    #[error("delete of `{key}` failed: {status} {detail}")]
    DeleteFailed {
        key: String,
        status: u16,
        detail: String,
    },
    #[error("metadata for `{key}` unavailable: {reason}")]
    MetadataUnavailable { key: String, reason: String },
    #[error("fetch of `{url}` failed with status {status}")]
    FetchFailed { url: String, status: u16 },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a successful upload.
#[derive(Serialize, Clone, Debug)]
pub struct PutOutcome {
    /// Normalized key the object was stored under.
    pub key: String,
    /// Publicly resolvable URL for the object.
    pub url: String,
    /// Monthly cost computed at write time.
    pub cost: f64,
}

/// A key resolved to its retrieval URL. No network call involved.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectLocation {
    pub key: String,
    pub url: String,
}

/// Metadata returned by a HEAD probe.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: String,
    pub upload_date: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
}

/// Strip leading slashes from a key. Idempotent.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// Uniform put/get/delete/exists/metadata contract against an S3-compatible
/// backend. Legacy and current backends share this contract.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key`, annotating cost and upload time as object
    /// metadata. Every call is a real remote mutation with no local rollback.
    async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> StoreResult<PutOutcome>;

    /// Resolve `key` to its deterministic public URL.
    fn location(&self, key: &str) -> ObjectLocation;

    /// Short-lived signed URL for private buckets.
    fn presigned_url(&self, key: &str, ttl_secs: u64) -> String;

    /// Delete `key`. Idempotent: an already-absent object is success.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Probe whether `key` exists. Never errors; unexpected outcomes are
    /// logged and reported as `false`.
    async fn exists(&self, key: &str) -> bool;

    /// HEAD probe returning size, content type, and cost metadata.
    async fn head_metadata(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Probe the sentinel key. 2xx and 404 both mean the bucket is reachable.
    async fn verify_connection(&self) -> bool;
}

/// Capability to pull raw bytes from an arbitrary URL, used for legacy-backend
/// fetches and for reading chunk payloads back at combine time.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    /// Fetch the full body at `url`. Non-2xx is `FetchFailed`.
    async fn fetch(&self, url: &str) -> StoreResult<Bytes>;

    /// HEAD-equivalent reachability probe.
    async fn probe(&self, url: &str) -> bool;
}

/// Connection settings for the current backend.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Base endpoint, e.g. `https://{account}.r2.cloudflarestorage.com`.
    pub endpoint: String,
    /// Bucket name appended to the endpoint.
    pub bucket: String,
    /// Bearer token; `None` makes every mutation fail `BackendUnavailable`.
    pub access_token: Option<String>,
    /// Public read base, e.g. `https://{bucket}.{public_domain}`.
    pub public_base_url: String,
    /// Secret used to sign pre-signed URLs.
    pub signing_secret: String,
}

/// Production `ObjectStore` over HTTP.
#[derive(Clone)]
pub struct R2Client {
    http: reqwest::Client,
    config: BackendConfig,
    cost: CostModel,
}

impl R2Client {
    pub fn new(config: BackendConfig, cost: CostModel) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, config, cost }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            key
        )
    }

    fn token(&self) -> StoreResult<&str> {
        self.config
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(StoreError::BackendUnavailable)
    }

    async fn head(&self, key: &str) -> StoreResult<reqwest::Response> {
        let token = self.token()?;
        Ok(self
            .http
            .head(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await?)
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> StoreResult<PutOutcome> {
        let key = normalize_key(key).to_string();
        let token = self.token()?;
        let cost = self.cost.calculate(bytes.len() as u64);

        let response = self
            .http
            .put(self.object_url(&key))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header(META_COST_HEADER, cost.to_string())
            .header(META_UPLOAD_DATE_HEADER, Utc::now().to_rfc3339())
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StoreError::UploadFailed {
                key,
                status: status.as_u16(),
                detail,
            });
        }

        debug!(%key, cost, "uploaded object");
        let url = self.public_url(&key);
        Ok(PutOutcome { key, url, cost })
    }

    fn location(&self, key: &str) -> ObjectLocation {
        let key = normalize_key(key).to_string();
        let url = self.public_url(&key);
        ObjectLocation { key, url }
    }

    fn presigned_url(&self, key: &str, ttl_secs: u64) -> String {
        let key = normalize_key(key);
        let expires = Utc::now().timestamp() + ttl_secs as i64;
        let digest = md5::compute(format!(
            "{}:{}:{}",
            self.config.signing_secret, key, expires
        ));
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(digest.0);
        format!(
            "{}?expires={}&signature={}",
            self.public_url(key),
            expires,
            signature
        )
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = normalize_key(key).to_string();
        let token = self.token()?;
        let response = self
            .http
            .delete(self.object_url(&key))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(StoreError::DeleteFailed {
            key,
            status: status.as_u16(),
            detail,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        let key = normalize_key(key);
        match self.head(key).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => false,
            Ok(response) => {
                warn!(%key, status = %response.status(), "unexpected status probing object");
                false
            }
            Err(err) => {
                warn!(%key, %err, "error probing object");
                false
            }
        }
    }

    async fn head_metadata(&self, key: &str) -> StoreResult<ObjectMeta> {
        let key = normalize_key(key).to_string();
        let response = self
            .head(&key)
            .await
            .map_err(|err| StoreError::MetadataUnavailable {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::MetadataUnavailable {
                key,
                reason: format!("status {}", status),
            });
        }

        let header_str = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let size = header_str("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let content_type = header_str("content-type")
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let upload_date = header_str(META_UPLOAD_DATE_HEADER)
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let cost = header_str(META_COST_HEADER).and_then(|v| v.parse().ok());

        Ok(ObjectMeta {
            size,
            content_type,
            upload_date,
            cost,
        })
    }

    async fn verify_connection(&self) -> bool {
        match self.head(PROBE_KEY).await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status == StatusCode::NOT_FOUND
            }
            Err(err) => {
                warn!(%err, "backend connection check failed");
                false
            }
        }
    }
}

/// Production `ByteFetcher` over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> StoreResult<Bytes> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::FetchFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn probe(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(%url, %err, "probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store/fetcher doubles shared by the service tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backend that implements both `ObjectStore` and
    /// `ByteFetcher`. Objects are addressable as `mem://{key}`; arbitrary
    /// legacy URLs can be seeded via `seed_legacy`.
    pub struct MemoryBackend {
        objects: Mutex<HashMap<String, (Bytes, String)>>,
        legacy: Mutex<HashMap<String, Bytes>>,
        failing_urls: Mutex<HashSet<String>>,
        put_count: AtomicUsize,
        cost: CostModel,
    }

    impl MemoryBackend {
        pub fn new(cost: CostModel) -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                legacy: Mutex::new(HashMap::new()),
                failing_urls: Mutex::new(HashSet::new()),
                put_count: AtomicUsize::new(0),
                cost,
            }
        }

        pub fn seed_legacy(&self, url: &str, bytes: Bytes) {
            self.legacy.lock().unwrap().insert(url.to_string(), bytes);
        }

        pub fn fail_url(&self, url: &str) {
            self.failing_urls.lock().unwrap().insert(url.to_string());
        }

        pub fn put_count(&self) -> usize {
            self.put_count.load(Ordering::SeqCst)
        }

        pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
            self.objects
                .lock()
                .unwrap()
                .get(normalize_key(key))
                .map(|(b, _)| b.clone())
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(normalize_key(key))
        }

        fn mem_url(key: &str) -> String {
            format!("mem://{}", key)
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryBackend {
        async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> StoreResult<PutOutcome> {
            let key = normalize_key(key).to_string();
            let cost = self.cost.calculate(bytes.len() as u64);
            self.put_count.fetch_add(1, Ordering::SeqCst);
            self.objects
                .lock()
                .unwrap()
                .insert(key.clone(), (bytes, mime_type.to_string()));
            let url = Self::mem_url(&key);
            Ok(PutOutcome { key, url, cost })
        }

        fn location(&self, key: &str) -> ObjectLocation {
            let key = normalize_key(key).to_string();
            let url = Self::mem_url(&key);
            ObjectLocation { key, url }
        }

        fn presigned_url(&self, key: &str, ttl_secs: u64) -> String {
            let expires = Utc::now().timestamp() + ttl_secs as i64;
            format!("{}?expires={}", Self::mem_url(normalize_key(key)), expires)
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.objects.lock().unwrap().remove(normalize_key(key));
            Ok(())
        }

        async fn exists(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(normalize_key(key))
        }

        async fn head_metadata(&self, key: &str) -> StoreResult<ObjectMeta> {
            let key = normalize_key(key).to_string();
            let objects = self.objects.lock().unwrap();
            let (bytes, mime) =
                objects
                    .get(&key)
                    .ok_or_else(|| StoreError::MetadataUnavailable {
                        key: key.clone(),
                        reason: "status 404".to_string(),
                    })?;
            Ok(ObjectMeta {
                size: bytes.len() as u64,
                content_type: mime.clone(),
                upload_date: Some(Utc::now()),
                cost: Some(self.cost.calculate(bytes.len() as u64)),
            })
        }

        async fn verify_connection(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl ByteFetcher for MemoryBackend {
        async fn fetch(&self, url: &str) -> StoreResult<Bytes> {
            if self.failing_urls.lock().unwrap().contains(url) {
                return Err(StoreError::FetchFailed {
                    url: url.to_string(),
                    status: 500,
                });
            }
            if let Some(key) = url.strip_prefix("mem://") {
                if let Some((bytes, _)) = self.objects.lock().unwrap().get(key) {
                    return Ok(bytes.clone());
                }
            }
            if let Some(bytes) = self.legacy.lock().unwrap().get(url) {
                return Ok(bytes.clone());
            }
            Err(StoreError::FetchFailed {
                url: url.to_string(),
                status: 404,
            })
        }

        async fn probe(&self, url: &str) -> bool {
            self.fetch(url).await.is_ok()
        }
    }
}
