//! Snapshot: one conversation's frozen picture of the graph.
//!
//! A snapshot pairs a frozen base view with an overlay of records received
//! during the conversation. Registered records are visible to traversals
//! and move the snapshot's own frontier, whether or not they have been
//! committed yet. Local writes made after creation never show through.

use std::collections::HashSet;

use async_trait::async_trait;

use capsule_core::{Frontier, LogGraph, RecordHash};

use crate::error::Result;
use crate::traversal::{self, Traversal};
use crate::view::GraphView;

/// A frozen graph view plus the records registered during one exchange.
///
/// Not shareable across conversations; the per-peer lock is what makes it
/// safe. Dropping it releases the base view and whatever that holds.
pub struct Snapshot {
    cutoff: u64,
    base: Box<dyn GraphView>,
    overlay: LogGraph,
    frontier: Frontier,
}

impl Snapshot {
    /// Freeze `base` as of `cutoff`.
    pub fn new(cutoff: u64, base: Box<dyn GraphView>) -> Self {
        let frontier = base.frontier().clone();
        Self {
            cutoff,
            base,
            overlay: LogGraph::new(),
            frontier,
        }
    }

    /// Logical time this snapshot was taken at.
    pub fn cutoff(&self) -> u64 {
        self.cutoff
    }

    /// True if `hash` was committed at or before the cutoff, or registered
    /// since.
    pub async fn exist_record(&self, hash: &RecordHash) -> Result<bool> {
        if self.overlay.contains(hash) {
            return Ok(true);
        }
        self.base.contains(hash).await
    }

    /// Make a received record visible and update the frontier as a local
    /// insert would. Returns false if the hash was already visible.
    pub async fn register_new_record(&mut self, hash: RecordHash, prev: RecordHash) -> Result<bool> {
        if self.exist_record(&hash).await? {
            return Ok(false);
        }

        let prev_known = !prev.is_null() && self.exist_record(&prev).await?;
        let has_successor = !self.next_hashes(&hash).await?.is_empty();

        self.overlay.insert(hash, prev);
        self.frontier.apply(hash, prev, prev_known, has_successor);
        Ok(true)
    }

    /// Number of records registered since creation.
    pub fn registered(&self) -> usize {
        self.overlay.len()
    }

    /// Logical begins, sorted.
    pub fn logical_begins(&self) -> Vec<RecordHash> {
        self.frontier.begins()
    }

    /// Logical ends, sorted.
    pub fn logical_ends(&self) -> Vec<RecordHash> {
        self.frontier.ends()
    }

    /// See [`traversal::search_ahead`].
    pub async fn search_ahead(
        &self,
        start: RecordHash,
        terminals: &HashSet<RecordHash>,
        limit: usize,
    ) -> Result<Traversal> {
        traversal::search_ahead(self, start, terminals, limit).await
    }

    /// See [`traversal::search_after`].
    pub async fn search_after(
        &self,
        start: RecordHash,
        terminals: &HashSet<RecordHash>,
        limit: usize,
    ) -> Result<Traversal> {
        traversal::search_after(self, start, terminals, limit).await
    }

    /// See [`traversal::connected_component`].
    pub async fn connected_component(
        &self,
        addrs: &[RecordHash],
        limit: usize,
    ) -> Result<Vec<RecordHash>> {
        traversal::connected_component(self, addrs, limit).await
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("cutoff", &self.cutoff)
            .field("registered", &self.overlay.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GraphView for Snapshot {
    async fn contains(&self, hash: &RecordHash) -> Result<bool> {
        self.exist_record(hash).await
    }

    async fn prev_hash(&self, hash: &RecordHash) -> Result<Option<RecordHash>> {
        if let Some(prev) = self.overlay.prev_of(hash) {
            return Ok(Some(prev));
        }
        self.base.prev_hash(hash).await
    }

    async fn next_hashes(&self, hash: &RecordHash) -> Result<Vec<RecordHash>> {
        let mut next = self.base.next_hashes(hash).await?;
        for child in self.overlay.next_of(hash) {
            if !next.contains(child) {
                next.push(*child);
            }
        }
        Ok(next)
    }

    fn frontier(&self) -> &Frontier {
        &self.frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::{Metadata, Record, RecordBuilder};
    use proptest::prelude::*;

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

    fn snapshot_of(records: &[&Record]) -> Snapshot {
        let meta: Vec<Metadata> = records.iter().map(|r| r.metadata()).collect();
        Snapshot::new(meta.len() as u64, Box::new(LogGraph::from_metadata(&meta)))
    }

    #[tokio::test]
    async fn test_register_fills_gap() {
        let records = chain(3);
        let mut snap = snapshot_of(&[&records[0], &records[2]]);
        assert_eq!(snap.logical_begins().len(), 2);

        assert!(snap
            .register_new_record(records[1].hash, records[1].prev_hash())
            .await
            .unwrap());

        assert!(snap.exist_record(&records[1].hash).await.unwrap());
        assert_eq!(snap.logical_begins(), vec![records[0].hash]);
        assert_eq!(snap.logical_ends(), vec![records[2].hash]);
        assert_eq!(snap.registered(), 1);
    }

    #[tokio::test]
    async fn test_register_known_is_noop() {
        let records = chain(2);
        let mut snap = snapshot_of(&[&records[0], &records[1]]);
        assert!(!snap
            .register_new_record(records[1].hash, records[1].prev_hash())
            .await
            .unwrap());
        assert_eq!(snap.registered(), 0);
    }

    #[tokio::test]
    async fn test_base_is_frozen() {
        let records = chain(2);
        let meta = vec![records[0].metadata()];
        let mut live = LogGraph::from_metadata(&meta);
        let snap = Snapshot::new(1, Box::new(live.clone()));

        live.insert(records[1].hash, records[1].prev_hash());
        assert!(!snap.exist_record(&records[1].hash).await.unwrap());
        assert_eq!(snap.logical_ends(), vec![records[0].hash]);
    }

    #[tokio::test]
    async fn test_traversal_sees_overlay() {
        let records = chain(4);
        let mut snap = snapshot_of(&[&records[0], &records[1]]);
        snap.register_new_record(records[3].hash, records[3].prev_hash())
            .await
            .unwrap();
        snap.register_new_record(records[2].hash, records[2].prev_hash())
            .await
            .unwrap();

        let after = snap
            .search_after(records[0].hash, &HashSet::new(), 100)
            .await
            .unwrap();
        assert_eq!(
            after.visited,
            vec![records[1].hash, records[2].hash, records[3].hash]
        );
        assert_eq!(after.local_ends, vec![records[3].hash]);

        let ahead = snap
            .search_ahead(records[3].hash, &HashSet::new(), 100)
            .await
            .unwrap();
        assert_eq!(ahead.visited, vec![records[2].hash, records[1].hash]);
        assert_eq!(ahead.local_ends, vec![records[0].hash]);
    }

    proptest! {
        /// Registering into a snapshot of any subset yields the same frontier
        /// as building the union from scratch, whatever the order.
        #[test]
        fn prop_register_matches_rebuild(
            len in 1usize..12,
            base_mask in any::<u16>(),
            order in any::<u64>(),
        ) {
            let records = chain(len);
            let mut base = Vec::new();
            let mut rest = Vec::new();
            for (i, record) in records.iter().enumerate() {
                if base_mask & (1 << i) != 0 {
                    base.push(record);
                } else {
                    rest.push(record);
                }
            }

            // Deterministic shuffle driven by `order`.
            let mut seed = order;
            for i in (1..rest.len()).rev() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                rest.swap(i, (seed >> 33) as usize % (i + 1));
            }

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (begins, ends) = rt.block_on(async {
                let mut snap = snapshot_of(&base);
                for r in &rest {
                    snap.register_new_record(r.hash, r.prev_hash()).await.unwrap();
                }
                (snap.logical_begins(), snap.logical_ends())
            });

            let all: Vec<Metadata> = records.iter().map(Record::metadata).collect();
            let full = LogGraph::from_metadata(&all);
            prop_assert_eq!(begins, full.logical_begins());
            prop_assert_eq!(ends, full.logical_ends());
        }
    }
}
