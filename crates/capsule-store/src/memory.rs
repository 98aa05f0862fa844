//! In-memory implementation of the LogStore trait.
//!
//! Same semantics as SQLite but nothing is persisted. Used by tests and by
//! replicas that rebuild from peers on every start.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use capsule_core::{LogGraph, Metadata, Record, RecordHash};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, LogStore, SnapshotId, StoreSnapshot, WriteSummary};

/// In-memory store implementation.
///
/// Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records in commit order; the commit sequence is `index + 1`.
    records: Vec<Record>,

    /// hash -> commit sequence.
    seqs: HashMap<RecordHash, u64>,

    /// prev_hash -> hashes naming it.
    children: HashMap<RecordHash, Vec<RecordHash>>,

    /// Live graph, for frontier capture.
    graph: LogGraph,

    /// Open snapshot ids.
    snapshots: HashSet<u64>,
    next_snapshot: u64,
}

impl MemoryStoreInner {
    fn visible(&self, hash: &RecordHash, cutoff: u64) -> Option<&Record> {
        let seq = *self.seqs.get(hash)?;
        if seq > cutoff {
            return None;
        }
        self.records.get((seq - 1) as usize)
    }

    fn get(&self, hash: &RecordHash) -> Option<&Record> {
        self.visible(hash, u64::MAX)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>> {
        let inner = self.read()?;
        Ok(hashes.iter().filter_map(|h| inner.get(h).cloned()).collect())
    }

    async fn read_metadata(&self, hashes: &[RecordHash]) -> Result<Vec<Metadata>> {
        let inner = self.read()?;
        Ok(hashes
            .iter()
            .filter_map(|h| inner.get(h).map(Record::metadata))
            .collect())
    }

    async fn read_all_records(&self) -> Result<Vec<Record>> {
        Ok(self.read()?.records.clone())
    }

    async fn read_all_metadata(&self) -> Result<Vec<Metadata>> {
        Ok(self.read()?.records.iter().map(Record::metadata).collect())
    }

    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary> {
        let mut inner = self.write()?;
        let mut summary = WriteSummary::default();

        for record in records {
            if inner.seqs.contains_key(&record.hash) {
                summary.record(InsertResult::AlreadyExists);
                continue;
            }

            inner.records.push(record.clone());
            let seq = inner.records.len() as u64;
            inner.seqs.insert(record.hash, seq);
            inner
                .children
                .entry(record.prev_hash())
                .or_default()
                .push(record.hash);
            inner.graph.insert(record.hash, record.prev_hash());
            summary.record(InsertResult::Inserted);
        }

        Ok(summary)
    }

    async fn record_count(&self) -> Result<u64> {
        Ok(self.read()?.records.len() as u64)
    }

    async fn check_record_existence(&self, cutoff: u64, hash: &RecordHash) -> Result<bool> {
        Ok(self.read()?.visible(hash, cutoff).is_some())
    }

    async fn find_metadata(&self, hash: &RecordHash, cutoff: u64) -> Result<Option<Metadata>> {
        Ok(self.read()?.visible(hash, cutoff).map(Record::metadata))
    }

    async fn find_next_records(&self, hash: &RecordHash, cutoff: u64) -> Result<Vec<Metadata>> {
        let inner = self.read()?;
        let Some(children) = inner.children.get(hash) else {
            return Ok(Vec::new());
        };
        Ok(children
            .iter()
            .filter_map(|c| inner.visible(c, cutoff).map(Record::metadata))
            .collect())
    }

    async fn create_snapshot(&self) -> Result<StoreSnapshot> {
        let mut inner = self.write()?;
        inner.next_snapshot += 1;
        let id = inner.next_snapshot;
        inner.snapshots.insert(id);

        Ok(StoreSnapshot {
            id: SnapshotId(id),
            cutoff: inner.records.len() as u64,
            begins: inner.graph.frontier().begin_edges(),
            ends: inner.graph.logical_ends(),
        })
    }

    fn destroy_snapshot(&self, id: SnapshotId) {
        // A poisoned lock still holds a usable set.
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.snapshots.remove(&id.0);
    }

    fn open_snapshots(&self) -> usize {
        match self.inner.read() {
            Ok(guard) => guard.snapshots.len(),
            Err(poisoned) => poisoned.into_inner().snapshots.len(),
        }
    }
}
