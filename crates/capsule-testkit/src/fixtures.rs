//! Test fixtures and helpers.
//!
//! Common setup code for integration tests and benchmarks.

use std::collections::HashSet;
use std::sync::Arc;

use capsule_core::{Ed25519PublicKey, Keypair, Record, RecordBuilder, RecordHash};
use capsule_store::{LogStore, MemoryStore};
use capsule_sync::{
    AnyPolicy, NodeId, Phase, Policy, PolicyKind, Step, SyncConfig, SyncError, SyncMessage,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Timestamp of the first fixture record; later records count up by one.
pub const BASE_TIMESTAMP: i64 = 1_700_000_000_000;

/// A signed chain and the keypair that wrote it.
pub struct ChainFixture {
    pub keypair: Keypair,
    pub records: Vec<Record>,
}

impl ChainFixture {
    /// A chain of `len` records under a random keypair.
    pub fn new(len: usize) -> Self {
        Self::from_keypair(Keypair::generate(), len)
    }

    /// A chain of `len` records under a keypair derived from `seed`.
    pub fn with_seed(seed: [u8; 32], len: usize) -> Self {
        Self::from_keypair(Keypair::from_seed(&seed), len)
    }

    fn from_keypair(keypair: Keypair, len: usize) -> Self {
        let records = extend_chain(&keypair, None, len, b"entry");
        Self { keypair, records }
    }

    /// The writer's public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Engine settings that verify against this writer.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            writer_key: Some(self.public_key()),
            ..SyncConfig::default()
        }
    }

    /// Every record hash, in chain order.
    pub fn hashes(&self) -> Vec<RecordHash> {
        self.records.iter().map(|r| r.hash).collect()
    }

    /// Records at `indices`.
    pub fn pick(&self, indices: &[usize]) -> Vec<Record> {
        indices.iter().map(|i| self.records[*i].clone()).collect()
    }

    /// Every record except those at `indices`.
    pub fn without(&self, indices: &[usize]) -> Vec<Record> {
        self.records
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// A branch of `len` records growing from the record at `at`.
    ///
    /// Branch values differ from the main chain, so the branch forks it.
    pub fn fork(&self, at: usize, len: usize) -> Vec<Record> {
        extend_chain(&self.keypair, Some(&self.records[at]), len, b"branch")
    }

    /// A reproducible random subset keeping each record with probability
    /// `keep`.
    pub fn scatter(&self, seed: u64, keep: f64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.records
            .iter()
            .filter(|_| rng.gen_bool(keep))
            .cloned()
            .collect()
    }
}

/// Signed records continuing from `parent` (or starting a chain).
fn extend_chain(keypair: &Keypair, parent: Option<&Record>, len: usize, tag: &[u8]) -> Vec<Record> {
    let (mut prev, mut rec_no) = match parent {
        Some(parent) => (parent.hash, parent.header.rec_no),
        None => (RecordHash::NULL, 0),
    };

    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        rec_no += 1;
        let mut value = tag.to_vec();
        value.extend_from_slice(&rec_no.to_be_bytes());
        let record = RecordBuilder::new(prev, rec_no)
            .timestamp(BASE_TIMESTAMP + rec_no as i64)
            .value(value)
            .sign(keypair);
        prev = record.hash;
        out.push(record);
    }
    out
}

/// A replica: identity, store and engine.
pub struct Replica<S: LogStore + ?Sized + 'static> {
    pub id: NodeId,
    pub store: Arc<S>,
    pub policy: AnyPolicy<S>,
}

impl Replica<MemoryStore> {
    /// A memory-backed replica seeded with `records`.
    pub async fn memory(
        id: u8,
        kind: PolicyKind,
        records: &[Record],
        config: SyncConfig,
    ) -> capsule_sync::Result<Self> {
        Self::over(id, Arc::new(MemoryStore::new()), kind, records, config).await
    }
}

impl<S: LogStore + ?Sized + 'static> Replica<S> {
    /// A replica over `store`, seeded with `records` before the engine loads.
    pub async fn over(
        id: u8,
        store: Arc<S>,
        kind: PolicyKind,
        records: &[Record],
        config: SyncConfig,
    ) -> capsule_sync::Result<Self> {
        store.write_records(records).await?;
        let policy = AnyPolicy::new(kind, Arc::clone(&store), config).await?;
        Ok(Self {
            id: NodeId::from_bytes([id; 32]),
            store,
            policy,
        })
    }

    /// Hashes of every stored record.
    pub async fn hashes(&self) -> capsule_sync::Result<HashSet<RecordHash>> {
        Ok(self
            .store
            .read_all_metadata()
            .await?
            .into_iter()
            .map(|m| m.hash)
            .collect())
    }
}

/// The messages of one finished conversation, in order.
#[derive(Debug, Default)]
pub struct ExchangeReport {
    pub messages: Vec<SyncMessage>,
}

impl ExchangeReport {
    /// Records carried by all messages together.
    pub fn records_shipped(&self) -> usize {
        self.messages.iter().map(|m| m.records_not_in_rx.len()).sum()
    }
}

/// Run one conversation from `initiator` to `receiver` directly, without a
/// transport.
pub async fn exchange<S, R>(
    initiator: &Replica<S>,
    receiver: &Replica<R>,
) -> capsule_sync::Result<ExchangeReport>
where
    S: LogStore + ?Sized + 'static,
    R: LogStore + ?Sized + 'static,
{
    let mut report = ExchangeReport::default();
    let Some(mut next) = initiator.policy.generate_message(&receiver.id).await? else {
        return Err(SyncError::ProtocolState {
            state: initiator.policy.peer_state(&receiver.id).await,
            phase: Phase::First,
        });
    };

    loop {
        let step = match next.phase {
            Phase::First | Phase::Third => {
                receiver.policy.process_message(&initiator.id, next.clone()).await?
            }
            Phase::Second | Phase::Fourth => {
                initiator.policy.process_message(&receiver.id, next.clone()).await?
            }
        };
        report.messages.push(next);
        match step {
            Step::Reply(reply) => next = reply,
            Step::Finished => return Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::validate_record;

    #[test]
    fn test_chain_links_and_verifies() {
        let fixture = ChainFixture::with_seed([1; 32], 4);

        assert!(fixture.records[0].is_genesis());
        for pair in fixture.records.windows(2) {
            assert_eq!(pair[1].prev_hash(), pair[0].hash);
            assert_eq!(pair[1].header.rec_no, pair[0].header.rec_no + 1);
        }
        for record in &fixture.records {
            validate_record(record, Some(&fixture.public_key())).unwrap();
        }
    }

    #[test]
    fn test_fork_branches_off() {
        let fixture = ChainFixture::with_seed([2; 32], 5);
        let branch = fixture.fork(2, 3);

        assert_eq!(branch[0].prev_hash(), fixture.records[2].hash);
        assert_eq!(branch[0].header.rec_no, 4);
        assert_ne!(branch[0].hash, fixture.records[3].hash);
    }

    #[test]
    fn test_scatter_is_reproducible() {
        let fixture = ChainFixture::with_seed([3; 32], 50);
        let a = fixture.scatter(7, 0.5);
        let b = fixture.scatter(7, 0.5);

        assert_eq!(
            a.iter().map(|r| r.hash).collect::<Vec<_>>(),
            b.iter().map(|r| r.hash).collect::<Vec<_>>()
        );
        assert_eq!(fixture.scatter(1, 1.0).len(), 50);
        assert!(fixture.scatter(1, 0.0).is_empty());
    }

    #[test]
    fn test_pick_and_without_partition() {
        let fixture = ChainFixture::with_seed([4; 32], 6);
        let picked = fixture.pick(&[1, 4]);
        let rest = fixture.without(&[1, 4]);

        assert_eq!(picked.len() + rest.len(), 6);
        assert!(picked.iter().all(|r| !rest.contains(r)));
    }

    #[tokio::test]
    async fn test_exchange_reports_every_phase() {
        let fixture = ChainFixture::with_seed([5; 32], 4);
        let a = Replica::memory(1, PolicyKind::Mirror, &fixture.records[..2], fixture.sync_config())
            .await
            .unwrap();
        let b = Replica::memory(2, PolicyKind::Store, &fixture.records[2..], fixture.sync_config())
            .await
            .unwrap();

        let report = exchange(&a, &b).await.unwrap();
        let phases: Vec<Phase> = report.messages.iter().map(|m| m.phase).collect();
        assert_eq!(phases, vec![Phase::First, Phase::Second, Phase::Third, Phase::Fourth]);
        assert_eq!(report.records_shipped(), 4);
        assert_eq!(a.hashes().await.unwrap(), b.hashes().await.unwrap());
    }
}
