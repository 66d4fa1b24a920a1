//! Core data models for the cost-aware storage platform.
//!
//! These entities represent stored file records, in-flight chunked upload
//! sessions, migration run bookkeeping, and the read-only pricing tiers.
//! Database-backed types map to tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod chunk_session;
pub mod file_record;
pub mod migration;
pub mod pricing;
