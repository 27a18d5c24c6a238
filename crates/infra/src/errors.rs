//! Infrastructure error type and conversions into the domain taxonomy.

use thiserror::Error;
use trace_domain::TraceError;

/// Errors raised inside the infrastructure layer before they cross into the
/// domain taxonomy.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<InfraError> for TraceError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Database(inner) => map_sqlite_error(inner),
            InfraError::Pool(inner) => TraceError::Storage(inner.to_string()),
            InfraError::Http(inner) => map_reqwest_error(&inner),
            InfraError::Io(inner) => TraceError::Storage(inner.to_string()),
            InfraError::Image(inner) => TraceError::Storage(inner.to_string()),
            InfraError::Serde(inner) => TraceError::SchemaInvalid(inner.to_string()),
            InfraError::Join(inner) => TraceError::Fatal(inner.to_string()),
        }
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> TraceError {
    match &err {
        // SQLITE_BUSY / SQLITE_LOCKED are worth a bounded retry.
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            TraceError::Transient(err.to_string())
        }
        rusqlite::Error::QueryReturnedNoRows => TraceError::NotFound(err.to_string()),
        _ => TraceError::Storage(err.to_string()),
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> TraceError {
    if err.is_timeout() || err.is_connect() {
        TraceError::Transient(err.to_string())
    } else {
        TraceError::Storage(format!("http: {err}"))
    }
}
