//! Proptest generators for property-based testing.

use proptest::prelude::*;

use capsule_core::{Keypair, Record, RecordBuilder, RecordHash};
use capsule_sync::PolicyKind;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random RecordHash, possibly the null sentinel.
pub fn record_hash() -> impl Strategy<Value = RecordHash> {
    prop_oneof![
        1 => Just(RecordHash::NULL),
        9 => any::<[u8; 32]>().prop_map(RecordHash::from_bytes),
    ]
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate value bytes of specified max length.
pub fn value(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a backend choice.
pub fn policy_kind() -> impl Strategy<Value = PolicyKind> {
    prop_oneof![Just(PolicyKind::Mirror), Just(PolicyKind::Store)]
}

/// Parameters for generating a single record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub keypair: Keypair,
    pub prev_hash: RecordHash,
    pub rec_no: u64,
    pub timestamp: i64,
    pub accuracy: f64,
    pub value: Vec<u8>,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            keypair(),
            record_hash(),
            1u64..=1_000_000u64,
            timestamp(),
            0.0f64..1.0,
            value(512),
        )
            .prop_map(|(keypair, prev_hash, rec_no, timestamp, accuracy, value)| RecordParams {
                keypair,
                prev_hash,
                rec_no,
                timestamp,
                accuracy,
                value,
            })
            .boxed()
    }
}

/// Build and sign a record from parameters.
pub fn record_from_params(params: &RecordParams) -> Record {
    RecordBuilder::new(params.prev_hash, params.rec_no)
        .timestamp(params.timestamp)
        .accuracy(params.accuracy)
        .value(params.value.clone())
        .sign(&params.keypair)
}

/// Two replicas each holding a random subset of one chain.
#[derive(Debug, Clone)]
pub struct ReplicaSplit {
    /// Length of the full chain.
    pub len: usize,
    /// Indices held by the first replica.
    pub a: Vec<usize>,
    /// Indices held by the second replica.
    pub b: Vec<usize>,
    pub kinds: (PolicyKind, PolicyKind),
}

impl ReplicaSplit {
    /// Indices held by either replica, ascending.
    pub fn union(&self) -> Vec<usize> {
        (0..self.len)
            .filter(|i| self.a.contains(i) || self.b.contains(i))
            .collect()
    }
}

impl Arbitrary for ReplicaSplit {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (1usize..=24)
            .prop_flat_map(|len| {
                (
                    Just(len),
                    prop::collection::vec(any::<bool>(), len),
                    prop::collection::vec(any::<bool>(), len),
                    policy_kind(),
                    policy_kind(),
                )
            })
            .prop_map(|(len, mask_a, mask_b, kind_a, kind_b)| {
                let held = |mask: &[bool]| -> Vec<usize> {
                    mask.iter()
                        .enumerate()
                        .filter(|(_, keep)| **keep)
                        .map(|(i, _)| i)
                        .collect()
                };
                ReplicaSplit {
                    len,
                    a: held(&mask_a),
                    b: held(&mask_b),
                    kinds: (kind_a, kind_b),
                }
            })
            .boxed()
    }
}
