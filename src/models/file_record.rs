//! Represents a stored object's metadata record in the relational store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Fallback MIME type when a record carries none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file record pointing at the bytes stored in the object-store backend.
///
/// The `(file_key, file_url)` pair is the record's pointer: it identifies
/// where the bytes currently live and is rewritten in place when the file is
/// migrated to a new backend. The record itself never stores payload bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Row id in the `files` table.
    pub id: i64,

    /// Owner account id; namespaces keys as `owner/{id}/files/...`.
    pub owner_id: i64,

    /// Original filename as uploaded by the owner.
    pub file_name: String,

    /// Object key on the current backend. Never starts with `/`.
    pub file_key: String,

    /// Fully resolved retrieval URL for the current backend.
    pub file_url: String,

    /// Size in bytes. Non-negative.
    pub file_size: i64,

    /// Content type (MIME type); `application/octet-stream` when unknown.
    pub mime_type: Option<String>,

    /// Monthly storage cost computed at write time, not re-derived on read.
    pub cost_snapshot: f64,

    /// Whether the record is soft-deleted.
    pub is_deleted: bool,
}

impl FileRecord {
    /// The record's content type, falling back to the platform default.
    pub fn mime_type_or_default(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }
}
