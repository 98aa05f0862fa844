//! # Capsule Store
//!
//! Storage abstraction for DataCapsule replicas. Provides a trait-based
//! interface for record persistence with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`LogStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`StoreSnapshot`] - Cutoff and frontier captured for one conversation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capsule_core::RecordBuilder;
//! use capsule_store::{LogStore, SqliteStore};
//!
//! async fn example() -> capsule_store::Result<()> {
//!     let store = SqliteStore::open("capsule.db")?;
//!
//!     let record = RecordBuilder::genesis().value(b"hello".to_vec()).build();
//!     store.write_records(&[record]).await?;
//!
//!     let snapshot = store.create_snapshot().await?;
//!     println!("{} begins, {} ends", snapshot.begins.len(), snapshot.ends.len());
//!     store.destroy_snapshot(snapshot.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent writes**: Writing the same record twice is a no-op
//! - **Cutoffs**: Every record carries a commit sequence; snapshot queries
//!   only see records at or below the snapshot's cutoff

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, LogStore, SnapshotId, StoreSnapshot, WriteSummary};

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
