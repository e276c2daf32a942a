//! Structured errors for dataset access.
//!
//! Rendered verbatim to API clients and CLI users, so messages carry the
//! dataset, column or path an operator needs to act on.

use super::cache::CacheError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to a remote object location.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error("dataset path not found: {}", path.display())]
    DatasetNotFound { dataset: String, path: PathBuf },

    #[error("no parquet files available for dataset '{dataset}'")]
    NoFiles { dataset: String },

    #[error("column '{column}' not found in dataset '{dataset}'")]
    MissingColumn { dataset: String, column: String },

    #[error("failed to download parquet at {path}: {source}")]
    Download {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("frame error: {0}")]
    Frame(String),
}
