//! Graph traversal primitives used to decide what to send.
//!
//! All walks take a `terminals` set: hashes the peer is known to hold, at
//! which the walk stops without counting them as visited. Every walk is
//! iterative and stops after `limit` visited nodes. A cut walk still returns
//! what it found; the nodes past the cut belong to a later exchange.

use std::collections::HashSet;

use capsule_core::RecordHash;

use crate::error::{Result, SyncError};
use crate::view::GraphView;

/// Outcome of a directional walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traversal {
    /// Hashes passed through, in walk order. Never includes the start.
    pub visited: Vec<RecordHash>,
    /// Hashes where the visible graph ran out in the walk direction.
    pub local_ends: Vec<RecordHash>,
    /// The walk hit its limit with more graph left to cover.
    pub truncated: bool,
}

impl Traversal {
    /// True if the walk found nothing.
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty() && self.local_ends.is_empty()
    }
}

/// Walk predecessors from `start` toward older records.
///
/// With the chain `h1 <- h2 <- h3 <- h4` and terminals `{h1}`, walking from
/// `h4` visits `[h3, h2]` and reports `h1` as the local end: the oldest
/// visible record of a segment is always reported, terminal or not.
pub async fn search_ahead<V: GraphView + ?Sized>(
    view: &V,
    start: RecordHash,
    terminals: &HashSet<RecordHash>,
    limit: usize,
) -> Result<Traversal> {
    let mut out = Traversal::default();
    if terminals.contains(&start) {
        return Ok(out);
    }

    let mut seen = HashSet::from([start]);
    let mut current = start;
    let mut prev = view.known_prev(&start).await?;

    loop {
        let Some(p) = prev else {
            out.local_ends.push(current);
            break;
        };

        let p_prev = view.known_prev(&p).await?;
        if p_prev.is_none() {
            out.local_ends.push(p);
            break;
        }
        if terminals.contains(&p) {
            break;
        }
        if !seen.insert(p) {
            return Err(SyncError::CycleDetected(p));
        }
        if out.visited.len() == limit {
            out.truncated = true;
            break;
        }

        out.visited.push(p);
        current = p;
        prev = p_prev;
    }

    Ok(out)
}

/// Walk successors from `start` toward newer records.
///
/// Forward edges may fan out, so this is a depth-first search over an
/// explicit stack. Children in `terminals` are skipped; nodes without
/// visible children are local ends.
pub async fn search_after<V: GraphView + ?Sized>(
    view: &V,
    start: RecordHash,
    terminals: &HashSet<RecordHash>,
    limit: usize,
) -> Result<Traversal> {
    let mut out = Traversal::default();
    if terminals.contains(&start) {
        return Ok(out);
    }

    let mut seen = HashSet::from([start]);
    let mut stack = vec![start];

    'walk: while let Some(current) = stack.pop() {
        let children = view.next_hashes(&current).await?;
        if children.is_empty() {
            out.local_ends.push(current);
            continue;
        }

        for child in children {
            if terminals.contains(&child) || !seen.insert(child) {
                continue;
            }
            if out.visited.len() == limit {
                out.truncated = true;
                break 'walk;
            }
            out.visited.push(child);
            stack.push(child);
        }
    }

    Ok(out)
}

/// Everything reachable from each visible address through predecessor and
/// successor links, deduplicated in first-seen order.
///
/// Addresses not visible in `view` contribute nothing. At most `limit`
/// hashes come back; each visible address is listed before anything found
/// from it.
pub async fn connected_component<V: GraphView + ?Sized>(
    view: &V,
    addrs: &[RecordHash],
    limit: usize,
) -> Result<Vec<RecordHash>> {
    let no_terminals = HashSet::new();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for addr in addrs {
        if !view.contains(addr).await? {
            continue;
        }

        let ahead = search_ahead(view, *addr, &no_terminals, limit).await?;
        let after = search_after(view, *addr, &no_terminals, limit).await?;

        let found = std::iter::once(addr)
            .chain(&ahead.visited)
            .chain(&ahead.local_ends)
            .chain(&after.visited);
        for hash in found {
            if out.len() == limit {
                return Ok(out);
            }
            if seen.insert(*hash) {
                out.push(*hash);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capsule_core::{Frontier, LogGraph, Metadata};
    use std::collections::HashMap;

    fn h(b: u8) -> RecordHash {
        RecordHash::from_bytes([b; 32])
    }

    fn graph(edges: &[(u8, u8)]) -> LogGraph {
        let meta: Vec<Metadata> = edges
            .iter()
            .map(|(hash, prev)| {
                let prev = if *prev == 0 { RecordHash::NULL } else { h(*prev) };
                Metadata::edge(h(*hash), prev)
            })
            .collect();
        LogGraph::from_metadata(&meta)
    }

    fn set(hashes: &[u8]) -> HashSet<RecordHash> {
        hashes.iter().map(|b| h(*b)).collect()
    }

    #[tokio::test]
    async fn test_search_ahead_linear_chain() {
        let g = graph(&[(1, 0), (2, 1), (3, 2), (4, 3)]);

        let t = search_ahead(&g, h(4), &set(&[1]), 100).await.unwrap();
        assert_eq!(t.visited, vec![h(3), h(2)]);
        assert_eq!(t.local_ends, vec![h(1)]);
    }

    #[tokio::test]
    async fn test_search_ahead_stops_at_terminal() {
        let g = graph(&[(1, 0), (2, 1), (3, 2), (4, 3)]);

        let t = search_ahead(&g, h(4), &set(&[2]), 100).await.unwrap();
        assert_eq!(t.visited, vec![h(3)]);
        assert!(t.local_ends.is_empty());

        let t = search_ahead(&g, h(4), &set(&[4]), 100).await.unwrap();
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn test_search_ahead_from_begin() {
        let g = graph(&[(1, 0), (2, 1)]);
        let t = search_ahead(&g, h(1), &HashSet::new(), 100).await.unwrap();
        assert!(t.visited.is_empty());
        assert_eq!(t.local_ends, vec![h(1)]);
    }

    #[tokio::test]
    async fn test_search_ahead_across_gap() {
        // 3 is missing: 4 is a dangling begin.
        let g = graph(&[(1, 0), (2, 1), (4, 3), (5, 4)]);
        let t = search_ahead(&g, h(5), &HashSet::new(), 100).await.unwrap();
        assert!(t.visited.is_empty());
        assert_eq!(t.local_ends, vec![h(4)]);
    }

    #[tokio::test]
    async fn test_search_after_fork() {
        let g = graph(&[(1, 0), (2, 1), (3, 1)]);

        let t = search_after(&g, h(1), &HashSet::new(), 100).await.unwrap();
        let visited: HashSet<_> = t.visited.into_iter().collect();
        let local_ends: HashSet<_> = t.local_ends.into_iter().collect();
        assert_eq!(visited, set(&[2, 3]));
        assert_eq!(local_ends, set(&[2, 3]));
    }

    #[tokio::test]
    async fn test_search_after_skips_terminals() {
        let g = graph(&[(1, 0), (2, 1), (3, 2), (4, 3)]);

        let t = search_after(&g, h(1), &set(&[3]), 100).await.unwrap();
        assert_eq!(t.visited, vec![h(2)]);
        assert!(t.local_ends.is_empty());

        let t = search_after(&g, h(4), &HashSet::new(), 100).await.unwrap();
        assert!(t.visited.is_empty());
        assert_eq!(t.local_ends, vec![h(4)]);

        assert!(search_after(&g, h(1), &set(&[1]), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connected_component_spans_both_directions() {
        let g = graph(&[(1, 0), (2, 1), (3, 2), (4, 3), (9, 0)]);

        let cc = connected_component(&g, &[h(2)], 100).await.unwrap();
        let got: HashSet<_> = cc.iter().copied().collect();
        assert_eq!(got, set(&[1, 2, 3, 4]));
        assert_eq!(cc.len(), 4);
        assert_eq!(cc[0], h(2));

        let cc = connected_component(&g, &[h(2), h(3), h(9), h(42)], 100)
            .await
            .unwrap();
        let got: HashSet<_> = cc.iter().copied().collect();
        assert_eq!(got, set(&[1, 2, 3, 4, 9]));
        assert_eq!(cc.len(), 5);
    }

    #[tokio::test]
    async fn test_limit_cuts_walks() {
        let edges: Vec<(u8, u8)> = (1..=50u8).map(|i| (i, i - 1)).collect();
        let g = graph(&edges);

        let t = search_ahead(&g, h(50), &HashSet::new(), 10).await.unwrap();
        assert!(t.truncated);
        assert_eq!(t.visited, (40..=49u8).rev().map(h).collect::<Vec<_>>());
        assert!(t.local_ends.is_empty());

        let t = search_after(&g, h(1), &HashSet::new(), 10).await.unwrap();
        assert!(t.truncated);
        assert_eq!(t.visited, (2..=11u8).map(h).collect::<Vec<_>>());

        let t = search_after(&g, h(40), &HashSet::new(), 10).await.unwrap();
        assert!(!t.truncated);
        assert_eq!(t.local_ends, vec![h(50)]);
    }

    #[tokio::test]
    async fn test_component_cut_keeps_start_first() {
        let edges: Vec<(u8, u8)> = (1..=50u8).map(|i| (i, i - 1)).collect();
        let g = graph(&edges);

        let cc = connected_component(&g, &[h(25), h(1)], 6).await.unwrap();
        assert_eq!(cc.len(), 6);
        assert_eq!(cc[0], h(25));
    }

    /// A view whose predecessor table loops: 1 -> 2 -> 3 -> 1.
    struct Looped {
        prev: HashMap<RecordHash, RecordHash>,
        next: HashMap<RecordHash, Vec<RecordHash>>,
        frontier: Frontier,
    }

    impl Looped {
        fn new() -> Self {
            let pairs = [(1, 3), (2, 1), (3, 2)];
            let mut prev = HashMap::new();
            let mut next: HashMap<RecordHash, Vec<RecordHash>> = HashMap::new();
            for (hash, p) in pairs {
                prev.insert(h(hash), h(p));
                next.entry(h(p)).or_default().push(h(hash));
            }
            Self {
                prev,
                next,
                frontier: Frontier::new(),
            }
        }
    }

    #[async_trait]
    impl GraphView for Looped {
        async fn contains(&self, hash: &RecordHash) -> Result<bool> {
            Ok(self.prev.contains_key(hash))
        }

        async fn prev_hash(&self, hash: &RecordHash) -> Result<Option<RecordHash>> {
            Ok(self.prev.get(hash).copied())
        }

        async fn next_hashes(&self, hash: &RecordHash) -> Result<Vec<RecordHash>> {
            Ok(self.next.get(hash).cloned().unwrap_or_default())
        }

        fn frontier(&self) -> &Frontier {
            &self.frontier
        }
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let view = Looped::new();

        assert!(matches!(
            search_ahead(&view, h(1), &HashSet::new(), 100).await,
            Err(SyncError::CycleDetected(_))
        ));

        let t = search_after(&view, h(1), &HashSet::new(), 100).await.unwrap();
        let visited: HashSet<_> = t.visited.into_iter().collect();
        assert_eq!(visited, set(&[2, 3]));
    }
}
