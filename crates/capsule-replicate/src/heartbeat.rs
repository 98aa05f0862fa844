//! Heartbeat scheduling and peer selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use capsule_sync::NodeId;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::HeartbeatMode;
use crate::error::{ReplicateError, Result};

/// Picks the peers each heartbeat talks to.
#[derive(Debug)]
pub struct PeerSelector {
    mode: HeartbeatMode,
    cursor: AtomicUsize,
}

impl PeerSelector {
    /// Create a selector for `mode`.
    pub fn new(mode: HeartbeatMode) -> Self {
        Self {
            mode,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The configured mode.
    pub fn mode(&self) -> HeartbeatMode {
        self.mode
    }

    /// Peers for the next heartbeat, drawn from `peers`.
    ///
    /// An empty peer list selects nobody in every mode. Asking for a fanout
    /// wider than the peer list is a configuration error.
    pub fn select(&self, peers: &[NodeId]) -> Result<Vec<NodeId>> {
        if peers.is_empty() {
            return Ok(Vec::new());
        }

        let mut rng = rand::thread_rng();
        match self.mode {
            HeartbeatMode::Cycle => {
                let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
                Ok(vec![peers[turn % peers.len()]])
            }
            HeartbeatMode::Random => Ok(peers.choose(&mut rng).copied().into_iter().collect()),
            HeartbeatMode::Fanout(degree) => {
                if degree > peers.len() {
                    return Err(ReplicateError::Config(format!(
                        "fanout degree {} exceeds {} known peers",
                        degree,
                        peers.len()
                    )));
                }
                Ok(peers.choose_multiple(&mut rng, degree).copied().collect())
            }
        }
    }
}

/// Random delay below one `interval`, so replicas started together do not
/// heartbeat in lockstep.
pub fn initial_jitter(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn peers(n: u8) -> Vec<NodeId> {
        (1..=n).map(|i| NodeId::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_cycle_walks_every_peer() {
        let peers = peers(3);
        let selector = PeerSelector::new(HeartbeatMode::Cycle);

        let picked: Vec<NodeId> = (0..6)
            .flat_map(|_| selector.select(&peers).unwrap())
            .collect();
        assert_eq!(&picked[..3], &peers[..]);
        assert_eq!(&picked[3..], &peers[..]);
    }

    #[test]
    fn test_random_picks_one_known_peer() {
        let peers = peers(4);
        let selector = PeerSelector::new(HeartbeatMode::Random);

        for _ in 0..20 {
            let picked = selector.select(&peers).unwrap();
            assert_eq!(picked.len(), 1);
            assert!(peers.contains(&picked[0]));
        }
    }

    #[test]
    fn test_fanout_picks_distinct_peers() {
        let peers = peers(5);
        let selector = PeerSelector::new(HeartbeatMode::Fanout(3));

        let picked = selector.select(&peers).unwrap();
        assert_eq!(picked.len(), 3);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_fanout_wider_than_peers_fails() {
        let selector = PeerSelector::new(HeartbeatMode::Fanout(3));
        assert!(matches!(
            selector.select(&peers(2)),
            Err(ReplicateError::Config(_))
        ));
    }

    #[test]
    fn test_no_peers_selects_nobody() {
        for mode in [HeartbeatMode::Cycle, HeartbeatMode::Random, HeartbeatMode::Fanout(2)] {
            assert!(PeerSelector::new(mode).select(&[]).unwrap().is_empty());
        }
    }

    #[test]
    fn test_jitter_below_interval() {
        let interval = Duration::from_millis(50);
        for _ in 0..50 {
            assert!(initial_jitter(interval) < interval);
        }
        assert_eq!(initial_jitter(Duration::ZERO), Duration::ZERO);
    }
}
