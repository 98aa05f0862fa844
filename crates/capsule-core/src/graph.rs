//! In-memory hash-DAG of a capsule with an incrementally maintained frontier.
//!
//! ```text
//!   backward edges:   h1 <- h2 <- h3        (hash -> prev_hash)
//!   forward edges:    h1 -> [h2] -> [h3]    (prev_hash -> [hash])
//! ```
//!
//! The frontier is the pair (logical begins, logical ends):
//!
//! - a hash is a **begin** when its predecessor is null or not known locally
//! - a hash is an **end** when no known record names it as predecessor
//!
//! Peers compare frontiers instead of full hash sets. Both sets are updated
//! in O(1) per inserted record; nothing is ever rescanned.

use std::collections::{HashMap, HashSet};

use crate::record::Metadata;
use crate::types::RecordHash;

/// Logical begins and ends of a graph.
///
/// Begins are indexed by their predecessor so that learning a record `p`
/// retires every begin that was dangling on `p` with a single removal.
/// `begin_set` mirrors the same hashes for membership checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    begins: HashMap<RecordHash, Vec<RecordHash>>,
    begin_set: HashSet<RecordHash>,
    ends: HashSet<RecordHash>,
}

impl Frontier {
    /// Create an empty frontier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a frontier from a previously computed digest.
    ///
    /// `begins` yields `(hash, prev_hash)` pairs.
    pub fn from_parts(
        begins: impl IntoIterator<Item = (RecordHash, RecordHash)>,
        ends: impl IntoIterator<Item = RecordHash>,
    ) -> Self {
        let mut frontier = Self::new();
        for (hash, prev) in begins {
            frontier.add_begin(hash, prev);
        }
        frontier.ends.extend(ends);
        frontier
    }

    /// Account for a newly inserted record.
    ///
    /// `prev_known` says whether `prev` is a known node, `has_successor`
    /// whether some known record already names `hash` as its predecessor.
    pub fn apply(&mut self, hash: RecordHash, prev: RecordHash, prev_known: bool, has_successor: bool) {
        if prev.is_null() || !prev_known {
            self.add_begin(hash, prev);
        }
        if !has_successor {
            self.ends.insert(hash);
        }

        // Records dangling on `hash` now have a known predecessor.
        for retired in self.begins.remove(&hash).into_iter().flatten() {
            self.begin_set.remove(&retired);
        }
        if !prev.is_null() {
            self.ends.remove(&prev);
        }
    }

    fn add_begin(&mut self, hash: RecordHash, prev: RecordHash) {
        if self.begin_set.insert(hash) {
            self.begins.entry(prev).or_default().push(hash);
        }
    }

    /// True if `hash` is a logical begin.
    pub fn is_begin(&self, hash: &RecordHash) -> bool {
        self.begin_set.contains(hash)
    }

    /// True if `hash` is a logical end.
    pub fn is_end(&self, hash: &RecordHash) -> bool {
        self.ends.contains(hash)
    }

    /// Logical begins, sorted.
    pub fn begins(&self) -> Vec<RecordHash> {
        let mut out: Vec<RecordHash> = self.begins.values().flatten().copied().collect();
        out.sort();
        out.dedup();
        out
    }

    /// Logical begins with their predecessor, sorted by hash.
    pub fn begin_edges(&self) -> Vec<(RecordHash, RecordHash)> {
        let mut out: Vec<(RecordHash, RecordHash)> = self
            .begins
            .iter()
            .flat_map(|(prev, hashes)| hashes.iter().map(move |h| (*h, *prev)))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Logical ends, sorted.
    pub fn ends(&self) -> Vec<RecordHash> {
        let mut out: Vec<RecordHash> = self.ends.iter().copied().collect();
        out.sort();
        out
    }
}

/// A hash-DAG over record metadata.
#[derive(Debug, Clone, Default)]
pub struct LogGraph {
    nodes: HashSet<RecordHash>,
    backward: HashMap<RecordHash, RecordHash>,
    forward: HashMap<RecordHash, Vec<RecordHash>>,
    frontier: Frontier,
}

impl LogGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a full metadata scan.
    pub fn from_metadata(metadata: &[Metadata]) -> Self {
        let mut graph = Self::new();
        graph.ingest(metadata);
        graph
    }

    /// Insert records, returning how many were new.
    ///
    /// Re-ingesting a known hash is a no-op.
    pub fn ingest(&mut self, metadata: &[Metadata]) -> usize {
        let mut added = 0;
        for meta in metadata {
            if self.insert(meta.hash, meta.prev_hash) {
                added += 1;
            }
        }
        added
    }

    /// Insert a single edge. Returns false if `hash` was already known.
    pub fn insert(&mut self, hash: RecordHash, prev: RecordHash) -> bool {
        if !self.nodes.insert(hash) {
            return false;
        }

        if !prev.is_null() {
            self.backward.insert(hash, prev);
            self.forward.entry(prev).or_default().push(hash);
        }

        let prev_known = !prev.is_null() && self.nodes.contains(&prev);
        let has_successor = self.forward.contains_key(&hash);
        self.frontier.apply(hash, prev, prev_known, has_successor);
        true
    }

    /// All known hashes.
    pub fn node_set(&self) -> &HashSet<RecordHash> {
        &self.nodes
    }

    /// hash -> prev_hash, for every record with a non-null predecessor.
    pub fn backward_edges(&self) -> &HashMap<RecordHash, RecordHash> {
        &self.backward
    }

    /// prev_hash -> [hash]. Keys may be hashes that are not known nodes.
    pub fn forward_edges(&self) -> &HashMap<RecordHash, Vec<RecordHash>> {
        &self.forward
    }

    /// The graph's frontier.
    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// Logical begins, sorted.
    pub fn logical_begins(&self) -> Vec<RecordHash> {
        self.frontier.begins()
    }

    /// Logical ends, sorted.
    pub fn logical_ends(&self) -> Vec<RecordHash> {
        self.frontier.ends()
    }

    /// True if `hash` is a known node.
    pub fn contains(&self, hash: &RecordHash) -> bool {
        self.nodes.contains(hash)
    }

    /// The recorded predecessor of `hash`, known or not.
    ///
    /// Returns `None` for unknown hashes and `Some(NULL)` for genesis records.
    pub fn prev_of(&self, hash: &RecordHash) -> Option<RecordHash> {
        if !self.nodes.contains(hash) {
            return None;
        }
        Some(self.backward.get(hash).copied().unwrap_or(RecordHash::NULL))
    }

    /// Known successors of `hash`.
    pub fn next_of(&self, hash: &RecordHash) -> &[RecordHash] {
        self.forward.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
