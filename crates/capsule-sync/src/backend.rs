//! Graph backends: where a diff engine gets its snapshots and records.
//!
//! - [`MirrorBackend`] keeps the whole graph in memory, loaded once from a
//!   full metadata scan and kept current on every write. Snapshots are
//!   clones of the mirror.
//! - [`StoreBackend`] keeps nothing in memory. Snapshots are store cutoffs
//!   and every traversal step is a store query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use capsule_core::{LogGraph, Metadata, Record, RecordHash};
use capsule_store::{LogStore, WriteSummary};

use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::view::StoreView;

/// Snapshot and record access for a [`DiffEngine`](crate::DiffEngine).
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Freeze the current graph.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Current logical ends, without keeping a snapshot around.
    async fn logical_ends(&self) -> Result<Vec<RecordHash>> {
        Ok(self.snapshot().await?.logical_ends())
    }

    /// Read full records. Unknown hashes are skipped.
    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>>;

    /// Durably write records. Already-present hashes are skipped.
    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary>;
}

/// In-memory mirror over a store.
pub struct MirrorBackend<S: LogStore + ?Sized> {
    store: Arc<S>,
    graph: RwLock<LogGraph>,
    version: AtomicU64,
}

impl<S: LogStore + ?Sized> MirrorBackend<S> {
    /// Build the mirror from a full scan of `store`.
    pub async fn load(store: Arc<S>) -> Result<Self> {
        let metadata = store.read_all_metadata().await?;
        let graph = LogGraph::from_metadata(&metadata);
        tracing::debug!(records = graph.len(), "loaded graph mirror");

        Ok(Self {
            version: AtomicU64::new(graph.len() as u64),
            store,
            graph: RwLock::new(graph),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of records in the mirror.
    pub async fn mirrored(&self) -> usize {
        self.graph.read().await.len()
    }
}

#[async_trait]
impl<S: LogStore + ?Sized + 'static> GraphBackend for MirrorBackend<S> {
    async fn snapshot(&self) -> Result<Snapshot> {
        let graph = self.graph.read().await;
        let cutoff = self.version.load(Ordering::Acquire);
        Ok(Snapshot::new(cutoff, Box::new(graph.clone())))
    }

    async fn logical_ends(&self) -> Result<Vec<RecordHash>> {
        Ok(self.graph.read().await.logical_ends())
    }

    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>> {
        Ok(self.store.read_records(hashes).await?)
    }

    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary> {
        // Holding the write lock across the store write keeps snapshots from
        // seeing the mirror behind the store.
        let mut graph = self.graph.write().await;
        let summary = self.store.write_records(records).await?;

        let metadata: Vec<Metadata> = records.iter().map(Record::metadata).collect();
        let added = graph.ingest(&metadata);
        self.version.fetch_add(added as u64, Ordering::AcqRel);
        Ok(summary)
    }
}

/// Store-backed graph access with no in-memory state.
pub struct StoreBackend<S: LogStore + ?Sized> {
    store: Arc<S>,
}

impl<S: LogStore + ?Sized> StoreBackend<S> {
    /// Wrap a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: LogStore + ?Sized + 'static> GraphBackend for StoreBackend<S> {
    async fn snapshot(&self) -> Result<Snapshot> {
        let view = StoreView::open(self.store.clone()).await?;
        Ok(Snapshot::new(view.cutoff(), Box::new(view)))
    }

    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>> {
        Ok(self.store.read_records(hashes).await?)
    }

    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary> {
        Ok(self.store.write_records(records).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::RecordBuilder;
    use capsule_store::{MemoryStore, SqliteStore};

    fn chain(n: usize) -> Vec<Record> {
        let mut out: Vec<Record> = Vec::new();
        let mut prev = RecordHash::NULL;
        for i in 0..n {
            let record = RecordBuilder::new(prev, i as u64 + 1)
                .value(vec![i as u8])
                .build();
            prev = record.hash;
            out.push(record);
        }
        out
    }

    #[tokio::test]
    async fn test_mirror_loads_and_tracks_writes() {
        let records = chain(3);
        let store = Arc::new(MemoryStore::new());
        store.write_records(&records[..2]).await.unwrap();

        let backend = MirrorBackend::load(store.clone()).await.unwrap();
        assert_eq!(backend.mirrored().await, 2);

        let before = backend.snapshot().await.unwrap();
        backend.write_records(&records[2..]).await.unwrap();
        let after = backend.snapshot().await.unwrap();

        assert!(!before.exist_record(&records[2].hash).await.unwrap());
        assert!(after.exist_record(&records[2].hash).await.unwrap());
        assert_eq!(after.logical_ends(), vec![records[2].hash]);
        assert!(after.cutoff() > before.cutoff());
        assert_eq!(store.record_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_logical_ends_agree_across_backends() {
        let records = chain(4);
        let store = Arc::new(MemoryStore::new());
        store.write_records(&records[..1]).await.unwrap();
        store.write_records(&records[2..]).await.unwrap();

        let mirror = MirrorBackend::load(store.clone()).await.unwrap();
        let direct = StoreBackend::new(store.clone());

        let mut expected = vec![records[0].hash, records[3].hash];
        expected.sort();
        let backends: [&dyn GraphBackend; 2] = [&mirror, &direct];
        for backend in backends {
            let mut ends = backend.logical_ends().await.unwrap();
            ends.sort();
            assert_eq!(ends, expected);
        }
        assert_eq!(store.open_snapshots(), 0);

        mirror.write_records(&records[1..2]).await.unwrap();
        assert_eq!(mirror.logical_ends().await.unwrap(), vec![records[3].hash]);
    }

    #[tokio::test]
    async fn test_mirror_rewrite_keeps_cutoff() {
        let records = chain(2);
        let backend = MirrorBackend::load(Arc::new(MemoryStore::new())).await.unwrap();
        backend.write_records(&records).await.unwrap();
        let first = backend.snapshot().await.unwrap().cutoff();

        let summary = backend.write_records(&records).await.unwrap();
        assert_eq!(summary.duplicates, 2);
        assert_eq!(backend.snapshot().await.unwrap().cutoff(), first);
    }

    #[tokio::test]
    async fn test_store_backend_snapshot_lifecycle() {
        let records = chain(2);
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let backend = StoreBackend::new(store.clone());
        backend.write_records(&records[..1]).await.unwrap();

        let snap = backend.snapshot().await.unwrap();
        backend.write_records(&records[1..]).await.unwrap();
        assert_eq!(snap.cutoff(), 1);
        assert!(!snap.exist_record(&records[1].hash).await.unwrap());
        assert_eq!(store.open_snapshots(), 1);

        drop(snap);
        assert_eq!(store.open_snapshots(), 0);
    }
}
