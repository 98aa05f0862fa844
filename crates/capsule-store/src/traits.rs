//! LogStore trait: the abstract interface for record persistence.
//!
//! The replication engine never touches SQL directly. It reads and writes
//! records, asks for the frontier of the committed graph, and queries the
//! graph "as of" a snapshot cutoff through this trait.

use async_trait::async_trait;
use capsule_core::{Metadata, Record, RecordHash};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// Record already exists (idempotent, not an error).
    AlreadyExists,
}

/// Summary of a batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Records newly committed.
    pub inserted: usize,
    /// Records that were already present.
    pub duplicates: usize,
}

impl WriteSummary {
    /// Fold one insert result into the summary.
    pub fn record(&mut self, result: InsertResult) {
        match result {
            InsertResult::Inserted => self.inserted += 1,
            InsertResult::AlreadyExists => self.duplicates += 1,
        }
    }
}

/// Identifier of an open store snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub u64);

/// The committed graph as of a point in logical time.
///
/// `cutoff` is the highest commit sequence included. All `*_at` queries
/// taking this cutoff see exactly the records committed at or before it.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub id: SnapshotId,
    pub cutoff: u64,
    /// `(hash, prev_hash)` of every logical begin.
    pub begins: Vec<(RecordHash, RecordHash)>,
    /// Every logical end.
    pub ends: Vec<RecordHash>,
}

/// The LogStore trait: async interface for record persistence.
///
/// All methods are async so that blocking backends (SQLite) can run on
/// `spawn_blocking` without stalling the runtime.
///
/// # Design Notes
///
/// - **Idempotent writes**: writing an already-present hash is a no-op,
///   diffs from different peers routinely overlap.
/// - **Commit sequence**: every inserted record gets a strictly increasing
///   sequence number; snapshots are cutoffs on that sequence.
#[async_trait]
pub trait LogStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Read records by hash. Unknown hashes are skipped.
    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>>;

    /// Read metadata by hash. Unknown hashes are skipped.
    async fn read_metadata(&self, hashes: &[RecordHash]) -> Result<Vec<Metadata>>;

    /// Read every record, in commit order.
    async fn read_all_records(&self) -> Result<Vec<Record>>;

    /// Read the metadata of every record, in commit order.
    async fn read_all_metadata(&self) -> Result<Vec<Metadata>>;

    /// Write records. Already-present hashes are skipped.
    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary>;

    /// Number of stored records.
    async fn record_count(&self) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Cutoff Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// True if `hash` was committed at or before `cutoff`.
    async fn check_record_existence(&self, cutoff: u64, hash: &RecordHash) -> Result<bool>;

    /// Metadata of `hash` if committed at or before `cutoff`.
    async fn find_metadata(&self, hash: &RecordHash, cutoff: u64) -> Result<Option<Metadata>>;

    /// Records naming `hash` as predecessor, committed at or before `cutoff`.
    async fn find_next_records(&self, hash: &RecordHash, cutoff: u64) -> Result<Vec<Metadata>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────────

    /// Capture the current cutoff and frontier.
    async fn create_snapshot(&self) -> Result<StoreSnapshot>;

    /// Release a snapshot. Unknown ids are ignored.
    ///
    /// Synchronous so it can run from `Drop`.
    fn destroy_snapshot(&self, id: SnapshotId);

    /// Number of snapshots created and not yet destroyed.
    fn open_snapshots(&self) -> usize;
}
