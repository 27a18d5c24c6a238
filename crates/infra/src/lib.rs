//! # Trace Infrastructure
//!
//! Adapters implementing the `trace-core` port traits:
//! - SQLite repositories over a pooled connection manager
//! - An in-process vector index for note embeddings
//! - Screenshot blob and note file stores
//! - OpenAI chat + embedding clients on a retrying HTTP client
//! - Cron schedulers, the summarization worker and the supervisor
//! - Platform probe wrappers (deadline bounding, unavailable fallback)
//! - Export, notifications and insight queries

pub mod blobs;
pub mod database;
pub mod errors;
pub mod export;
pub mod http;
pub mod insights;
pub mod llm;
pub mod notifications;
pub mod platform;
pub mod scheduling;
pub mod tokens;

pub use errors::InfraError;
