pub mod chunk_manager;
pub mod cost;
pub mod migration;
pub mod object_store;
pub mod scheduler;
