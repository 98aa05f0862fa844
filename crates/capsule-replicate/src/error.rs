//! Error types for the replication daemon.

use capsule_core::ValidationError;
use capsule_store::StoreError;
use capsule_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while running a replica.
#[derive(Debug, Error)]
pub enum ReplicateError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid daemon configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Config file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// This replica holds no signing key, so it cannot append.
    #[error("replica is read-only: no writer keypair")]
    ReadOnly,
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
