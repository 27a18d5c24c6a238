//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Trace
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TraceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl TraceError {
    /// Whether a local retry with backoff is appropriate for this error.
    ///
    /// Only rate limits, timeouts and connection failures qualify; everything
    /// else must surface to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, TraceError::Transient(_))
    }

    /// Whether the error indicates a missing platform capability rather than
    /// a failure. Callers degrade to nulls instead of propagating.
    pub fn is_platform_unavailable(&self) -> bool {
        matches!(self, TraceError::PlatformUnavailable(_))
    }
}

/// Result type alias for Trace operations
pub type Result<T> = std::result::Result<T, TraceError>;
