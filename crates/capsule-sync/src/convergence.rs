//! Convergence verification.
//!
//! After an exchange, replicas can check they hold the same record set by
//! comparing a deterministic digest instead of the sets themselves.

use std::collections::HashSet;

use capsule_core::RecordHash;
use capsule_store::LogStore;

use crate::error::Result;

const DIGEST_DOMAIN: &[u8] = b"capsule-record-set-v1:";

/// Digest of every record hash in `store`.
///
/// Algorithm:
/// 1. Collect all record hashes and sort them
/// 2. Hash: Blake3(domain || h_1 || h_2 || ... || h_n)
///
/// Independent of insertion order, so two replicas holding the same
/// records always agree.
pub async fn record_set_digest<S: LogStore + ?Sized>(store: &S) -> Result<[u8; 32]> {
    let mut hashes: Vec<RecordHash> = store
        .read_all_metadata()
        .await?
        .into_iter()
        .map(|m| m.hash)
        .collect();
    hashes.sort();

    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    for hash in &hashes {
        hasher.update(hash.as_bytes());
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Result of comparing two replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas hold identical record sets.
    Converged,
    /// The sets differ (more exchanges may be needed).
    NotConverged {
        /// Records only the local replica holds.
        local_only: usize,
        /// Records only the remote replica holds.
        remote_only: usize,
    },
}

impl ConvergenceResult {
    /// Check if the replicas have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two stores record by record.
pub async fn verify_convergence<L, R>(local: &L, remote: &R) -> Result<ConvergenceResult>
where
    L: LogStore + ?Sized,
    R: LogStore + ?Sized,
{
    if record_set_digest(local).await? == record_set_digest(remote).await? {
        return Ok(ConvergenceResult::Converged);
    }

    let local_set: HashSet<RecordHash> = local
        .read_all_metadata()
        .await?
        .into_iter()
        .map(|m| m.hash)
        .collect();
    let remote_set: HashSet<RecordHash> = remote
        .read_all_metadata()
        .await?
        .into_iter()
        .map(|m| m.hash)
        .collect();

    Ok(ConvergenceResult::NotConverged {
        local_only: local_set.difference(&remote_set).count(),
        remote_only: remote_set.difference(&local_set).count(),
    })
}
