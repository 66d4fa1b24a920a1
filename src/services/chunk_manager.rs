//! src/services/chunk_manager.rs
//!
//! Splits large uploads into fixed-size chunks, tracks per-chunk completion
//! in process memory, and reassembles on completion. The final byte stream is
//! the exact concatenation of chunk payloads in ascending index order, no
//! matter what order the chunks arrived in.

use crate::models::chunk_session::ChunkSession;
use crate::services::object_store::{ByteFetcher, ObjectStore, PutOutcome, StoreError};
use bytes::{Bytes, BytesMut};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Default chunk size: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Default lifetime of an abandoned session before it is reclaimed.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("file name must not be empty")]
    EmptyFileName,
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("chunk index {index} out of range for session with {total} chunks")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("incomplete upload: received {received} of {expected} chunks")]
    IncompleteUpload { received: u32, expected: u32 },
    #[error("chunk {0} has no retrievable payload")]
    ChunkNotFound(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// Returned to the client when a session is created.
#[derive(Serialize, Clone, Debug)]
pub struct SessionReceipt {
    pub session_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// In-memory manager for chunked upload sessions.
///
/// Sessions are held exclusively in process memory: a restart loses in-flight
/// uploads. Sessions older than the TTL are swept on every `create_session`.
#[derive(Clone)]
pub struct ChunkSessionManager {
    sessions: Arc<Mutex<HashMap<String, ChunkSession>>>,
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn ByteFetcher>,
    chunk_size: u64,
    session_ttl: Duration,
}

impl ChunkSessionManager {
    pub fn with_settings(
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn ByteFetcher>,
        chunk_size: u64,
        session_ttl: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            store,
            fetcher,
            chunk_size,
            session_ttl,
        }
    }

    /// Start a session for a file of `file_size` bytes.
    ///
    /// `total_chunks = ceil(file_size / chunk_size)`; the last chunk may be
    /// short. Fails only on an empty file name (sizes are unsigned).
    pub fn create_session(
        &self,
        file_name: &str,
        file_size: u64,
        mime_type: &str,
    ) -> ChunkResult<SessionReceipt> {
        if file_name.trim().is_empty() {
            return Err(ChunkError::EmptyFileName);
        }

        self.sweep_expired();

        let total_chunks = file_size.div_ceil(self.chunk_size) as u32;
        let session = ChunkSession {
            session_id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            declared_size: file_size,
            mime_type: mime_type.to_string(),
            chunk_size: self.chunk_size,
            total_chunks,
            uploaded_chunks: HashMap::new(),
            created_at: Utc::now(),
        };
        let receipt = SessionReceipt {
            session_id: session.session_id.clone(),
            total_chunks,
            chunk_size: self.chunk_size,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session);
        Ok(receipt)
    }

    /// Record that chunk `index` of `session_id` was uploaded to `chunk_url`.
    ///
    /// Re-registering an index overwrites the previous URL (last-write-wins),
    /// so a client can retry a single chunk without restarting the upload.
    pub fn register_chunk(&self, session_id: &str, index: u32, chunk_url: &str) -> ChunkResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ChunkError::SessionNotFound(session_id.to_string()))?;
        if index >= session.total_chunks {
            return Err(ChunkError::IndexOutOfRange {
                index,
                total: session.total_chunks,
            });
        }
        session.uploaded_chunks.insert(index, chunk_url.to_string());
        Ok(())
    }

    /// Upload a chunk's bytes to the backend and register it in one step.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: u32,
        bytes: Bytes,
    ) -> ChunkResult<String> {
        {
            let sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| ChunkError::SessionNotFound(session_id.to_string()))?;
            if index >= session.total_chunks {
                return Err(ChunkError::IndexOutOfRange {
                    index,
                    total: session.total_chunks,
                });
            }
        }

        let key = Self::chunk_key(session_id, index);
        let outcome = self
            .store
            .put(&key, bytes, "application/octet-stream")
            .await?;
        self.register_chunk(session_id, index, &outcome.url)?;
        Ok(outcome.url)
    }

    /// Reassemble a complete session into one object under `final_key`.
    ///
    /// Fetches every chunk's payload in ascending index order, concatenates
    /// byte-exact, uploads via the adapter, and destroys the session. The
    /// session survives a failed combine so the client can retry.
    pub async fn combine_chunks(
        &self,
        session_id: &str,
        final_key: &str,
    ) -> ChunkResult<PutOutcome> {
        let session = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| ChunkError::SessionNotFound(session_id.to_string()))?
        };

        if !session.is_complete() {
            return Err(ChunkError::IncompleteUpload {
                received: session.uploaded_chunks.len() as u32,
                expected: session.total_chunks,
            });
        }

        let mut assembled = BytesMut::with_capacity(session.declared_size as usize);
        for index in 0..session.total_chunks {
            let url = session
                .uploaded_chunks
                .get(&index)
                .ok_or(ChunkError::ChunkNotFound(index))?;
            let bytes = self.fetcher.fetch(url).await.map_err(|err| match err {
                StoreError::FetchFailed { status: 404, .. } => ChunkError::ChunkNotFound(index),
                other => ChunkError::Store(other),
            })?;
            assembled.extend_from_slice(&bytes);
        }

        let outcome = self
            .store
            .put(final_key, assembled.freeze(), &session.mime_type)
            .await?;

        self.sessions.lock().unwrap().remove(session_id);

        // Chunk objects are scratch data once combined.
        for index in 0..session.total_chunks {
            let key = Self::chunk_key(session_id, index);
            if let Err(err) = self.store.delete(&key).await {
                debug!(%key, %err, "failed to clean up chunk object");
            }
        }

        Ok(outcome)
    }

    /// Snapshot a session, if it exists.
    pub fn session(&self, session_id: &str) -> Option<ChunkSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Backend key for a chunk's scratch object.
    pub fn chunk_key(session_id: &str, index: u32) -> String {
        format!("chunks/{}/{}", session_id, index)
    }

    /// Drop sessions older than the TTL.
    fn sweep_expired(&self) {
        let cutoff = Utc::now() - self.session_ttl;
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at > cutoff);
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, "reclaimed expired upload sessions");
        }
    }
}
