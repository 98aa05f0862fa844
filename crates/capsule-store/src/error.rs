//! Store failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row that does not decode into a record.
    #[error("corrupt row: {0}")]
    InvalidData(String),

    /// Schema upgrade failed or the file is from a newer build.
    #[error("schema migration: {0}")]
    Migration(String),

    /// The blocking worker running a query failed.
    #[error("storage worker failed: {0}")]
    Worker(String),

    /// The store's lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
