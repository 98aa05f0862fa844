//! GraphView: the read contract every traversal runs against.
//!
//! Two backings satisfy it:
//!
//! - [`LogGraph`]: the in-memory mirror built from a full metadata scan
//! - [`StoreView`]: live store queries bounded by a snapshot cutoff

use std::sync::Arc;

use async_trait::async_trait;

use capsule_core::{Frontier, LogGraph, RecordHash};
use capsule_store::{LogStore, StoreSnapshot};

use crate::error::Result;

/// Read-only view over a capsule's hash-DAG.
#[async_trait]
pub trait GraphView: Send + Sync {
    /// True if `hash` is visible in this view.
    async fn contains(&self, hash: &RecordHash) -> Result<bool>;

    /// Recorded predecessor of a visible hash.
    ///
    /// `None` if `hash` is not visible, `Some(NULL)` for a genesis record.
    async fn prev_hash(&self, hash: &RecordHash) -> Result<Option<RecordHash>>;

    /// Predecessor of `hash` if the predecessor itself is visible.
    async fn known_prev(&self, hash: &RecordHash) -> Result<Option<RecordHash>> {
        match self.prev_hash(hash).await? {
            Some(prev) if !prev.is_null() && self.contains(&prev).await? => Ok(Some(prev)),
            _ => Ok(None),
        }
    }

    /// Visible records naming `hash` as predecessor.
    ///
    /// `hash` itself need not be visible.
    async fn next_hashes(&self, hash: &RecordHash) -> Result<Vec<RecordHash>>;

    /// Logical begins and ends of this view.
    fn frontier(&self) -> &Frontier;
}

#[async_trait]
impl GraphView for LogGraph {
    async fn contains(&self, hash: &RecordHash) -> Result<bool> {
        Ok(LogGraph::contains(self, hash))
    }

    async fn prev_hash(&self, hash: &RecordHash) -> Result<Option<RecordHash>> {
        Ok(self.prev_of(hash))
    }

    async fn next_hashes(&self, hash: &RecordHash) -> Result<Vec<RecordHash>> {
        Ok(self.next_of(hash).to_vec())
    }

    fn frontier(&self) -> &Frontier {
        LogGraph::frontier(self)
    }
}

/// A store-backed view frozen at a snapshot cutoff.
///
/// Owns the store snapshot; dropping the view destroys it.
pub struct StoreView<S: LogStore + ?Sized> {
    store: Arc<S>,
    snapshot: StoreSnapshot,
    frontier: Frontier,
}

impl<S: LogStore + ?Sized> StoreView<S> {
    /// Create a store snapshot and wrap it.
    pub async fn open(store: Arc<S>) -> Result<Self> {
        let snapshot = store.create_snapshot().await?;
        let frontier = Frontier::from_parts(
            snapshot.begins.iter().copied(),
            snapshot.ends.iter().copied(),
        );
        Ok(Self {
            store,
            snapshot,
            frontier,
        })
    }

    /// Highest commit sequence visible through this view.
    pub fn cutoff(&self) -> u64 {
        self.snapshot.cutoff
    }
}

impl<S: LogStore + ?Sized> Drop for StoreView<S> {
    fn drop(&mut self) {
        self.store.destroy_snapshot(self.snapshot.id);
    }
}

#[async_trait]
impl<S: LogStore + ?Sized> GraphView for StoreView<S> {
    async fn contains(&self, hash: &RecordHash) -> Result<bool> {
        Ok(self
            .store
            .check_record_existence(self.snapshot.cutoff, hash)
            .await?)
    }

    async fn prev_hash(&self, hash: &RecordHash) -> Result<Option<RecordHash>> {
        let meta = self.store.find_metadata(hash, self.snapshot.cutoff).await?;
        Ok(meta.map(|m| m.prev_hash))
    }

    async fn next_hashes(&self, hash: &RecordHash) -> Result<Vec<RecordHash>> {
        let next = self
            .store
            .find_next_records(hash, self.snapshot.cutoff)
            .await?;
        Ok(next.into_iter().map(|m| m.hash).collect())
    }

    fn frontier(&self) -> &Frontier {
        &self.frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::{Metadata, Record, RecordBuilder};
    use capsule_store::MemoryStore;

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
    async fn test_known_prev_hides_gaps() {
        let records = chain(3);
        let graph = LogGraph::from_metadata(&[records[0].metadata(), records[2].metadata()]);

        assert_eq!(graph.prev_hash(&records[2].hash).await.unwrap(), Some(records[1].hash));
        assert_eq!(graph.known_prev(&records[2].hash).await.unwrap(), None);
        assert_eq!(graph.known_prev(&records[0].hash).await.unwrap(), None);
        assert_eq!(graph.prev_hash(&records[1].hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_view_matches_mirror() {
        let records = chain(4);
        let store = Arc::new(MemoryStore::new());
        let subset = [records[0].clone(), records[1].clone(), records[3].clone()];
        store.write_records(&subset).await.unwrap();

        let metadata: Vec<Metadata> = subset.iter().map(Record::metadata).collect();
        let mirror = LogGraph::from_metadata(&metadata);
        let view = StoreView::open(store.clone()).await.unwrap();

        assert_eq!(view.frontier().begins(), GraphView::frontier(&mirror).begins());
        assert_eq!(view.frontier().ends(), GraphView::frontier(&mirror).ends());
        for record in &records {
            assert_eq!(
                view.contains(&record.hash).await.unwrap(),
                GraphView::contains(&mirror, &record.hash).await.unwrap()
            );
            assert_eq!(
                view.next_hashes(&record.hash).await.unwrap(),
                mirror.next_hashes(&record.hash).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_store_view_is_frozen_and_released() {
        let records = chain(2);
        let store = Arc::new(MemoryStore::new());
        store.write_records(&records[..1]).await.unwrap();

        let view = StoreView::open(store.clone()).await.unwrap();
        store.write_records(&records[1..]).await.unwrap();

        assert!(!view.contains(&records[1].hash).await.unwrap());
        assert!(view.next_hashes(&records[0].hash).await.unwrap().is_empty());
        assert_eq!(view.frontier().ends(), vec![records[0].hash]);
        assert_eq!(store.open_snapshots(), 1);

        drop(view);
        assert_eq!(store.open_snapshots(), 0);
    }
}
