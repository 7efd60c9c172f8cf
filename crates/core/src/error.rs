//! Unified error types for offdeck.
//!
//! Every variant renders with a stable upper-case code prefix so callers
//! (and the MCP surface) can classify failures without string matching on
//! free-form messages.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the offline storage and sync layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty id).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No record found for the given key.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Local storage could not be opened (missing directory, denied access).
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// Host storage quota exhausted; the write was abandoned.
    #[error("QUOTA_EXCEEDED: {0}")]
    QuotaExceeded(String),

    /// Database operation failed.
    #[error("STORAGE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORAGE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Cache tier operation failed.
    #[error("CACHE_ERROR: {0}")]
    Cache(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Fetch rejected before a response arrived.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Remote store answered with a non-2xx status.
    #[error("REMOTE_REJECTED: status {status}: {message}")]
    RemoteRejected { status: u16, message: String },

    /// Operation requires connectivity and the client is offline.
    #[error("OFFLINE")]
    Offline,

    /// A sync pass is already running.
    #[error("SYNC_IN_PROGRESS")]
    SyncInProgress,
}

impl Error {
    /// Whether a failure is worth retrying on a later sync pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::RemoteRejected { .. } | Error::Offline)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e.into(),
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) if code.code == rusqlite::ErrorCode::DiskFull => {
                Error::QuotaExceeded(msg.clone().unwrap_or_else(|| "database or disk is full".into()))
            }
            _ => Error::Database(tokio_rusqlite::Error::Error(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::NotFound(msg) => (-32001, msg.clone()),
            Error::StorageUnavailable(msg) => (-32002, msg.clone()),
            Error::QuotaExceeded(msg) => (-32003, msg.clone()),
            Error::Database(e) => (-32004, e.to_string()),
            Error::MigrationFailed(msg) => (-32004, msg.clone()),
            Error::Serialization(msg) => (-32005, msg.clone()),
            Error::Cache(msg) => (-32006, msg.clone()),
            Error::InvalidUrl(msg) => (-32007, msg.clone()),
            Error::Network(msg) => (-32008, msg.clone()),
            Error::RemoteRejected { status, message } => (-32009, format!("status {status}: {message}")),
            Error::Offline => (-32010, "client is offline".to_string()),
            Error::SyncInProgress => (-32011, "a sync pass is already running".to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
