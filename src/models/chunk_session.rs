//! Represents an in-flight chunked upload session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A chunked upload session, created before uploading a large file in parts.
///
/// Sessions live exclusively in process memory for their lifetime: a restart
/// drops in-flight sessions and the client must start over. Abandoned
/// sessions are reclaimed by a TTL sweep in the session manager.
#[derive(Clone, Debug, Serialize)]
pub struct ChunkSession {
    /// Opaque unique session id returned to the client.
    pub session_id: String,

    /// Original filename captured at session start. Immutable.
    pub file_name: String,

    /// Declared total size in bytes. Immutable.
    pub declared_size: u64,

    /// Content type of the final object.
    pub mime_type: String,

    /// Fixed chunk size in bytes for this session.
    pub chunk_size: u64,

    /// `ceil(declared_size / chunk_size)`, fixed at creation.
    pub total_chunks: u32,

    /// Chunk index (0-based) to backend URL of the uploaded chunk.
    /// At most `total_chunks` entries; re-registration overwrites.
    pub uploaded_chunks: HashMap<u32, String>,

    /// When the session was created; drives TTL reclamation.
    pub created_at: DateTime<Utc>,
}

impl ChunkSession {
    /// True once every index in `0..total_chunks` has a registered chunk.
    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks.len() as u32 == self.total_chunks
    }
}
