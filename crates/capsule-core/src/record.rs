//! Record: one entry of a DataCapsule.
//!
//! A record is immutable once created. Its identity is its hash, and it
//! points to its predecessor by hash. The null hash marks the first record
//! of a chain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::compute_hash;
use crate::crypto::{Ed25519Signature, Keypair};
use crate::types::RecordHash;

/// The hashed metadata of a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Hash of the previous record, or [`RecordHash::NULL`].
    pub prev_hash: RecordHash,

    /// Position in the writer's log (1-indexed). Informational only.
    pub rec_no: u64,

    /// Writer-claimed timestamp (Unix milliseconds). Untrusted.
    pub timestamp: i64,

    /// Writer-claimed clock accuracy in seconds.
    pub accuracy: f64,
}

/// A complete record: hash + header + value + signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Blake3(canonical_header || value).
    pub hash: RecordHash,

    /// The hashed metadata.
    pub header: RecordHeader,

    /// The opaque record value.
    pub value: Bytes,

    /// Writer signature over `hash`, or [`Ed25519Signature::ZERO`].
    pub signature: Ed25519Signature,
}

impl Record {
    /// Hash of the predecessor.
    pub fn prev_hash(&self) -> RecordHash {
        self.header.prev_hash
    }

    /// True if this record starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_null()
    }

    /// Recompute the hash from content.
    pub fn compute_hash(&self) -> RecordHash {
        compute_hash(&self.header, &self.value)
    }

    /// Project to graph metadata.
    pub fn metadata(&self) -> Metadata {
        Metadata {
            hash: self.hash,
            prev_hash: self.header.prev_hash,
            rec_no: self.header.rec_no,
            timestamp: self.header.timestamp,
        }
    }
}

/// The value-less projection of a record used to build log graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub hash: RecordHash,
    pub prev_hash: RecordHash,
    pub rec_no: u64,
    pub timestamp: i64,
}

impl Metadata {
    /// Metadata carrying only the graph edge, for tests and overlays.
    pub fn edge(hash: RecordHash, prev_hash: RecordHash) -> Self {
        Self {
            hash,
            prev_hash,
            rec_no: 0,
            timestamp: 0,
        }
    }
}

/// Builder for creating records.
pub struct RecordBuilder {
    prev_hash: RecordHash,
    rec_no: u64,
    timestamp: i64,
    accuracy: f64,
    value: Bytes,
}

impl RecordBuilder {
    /// Start building the record that follows `prev_hash`.
    pub fn new(prev_hash: RecordHash, rec_no: u64) -> Self {
        Self {
            prev_hash,
            rec_no,
            timestamp: 0,
            accuracy: 0.0,
            value: Bytes::new(),
        }
    }

    /// Start building the first record of a chain.
    pub fn genesis() -> Self {
        Self::new(RecordHash::NULL, 1)
    }

    /// Set the timestamp.
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    /// Set the clock accuracy.
    pub fn accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Set the value.
    pub fn value(mut self, v: impl Into<Bytes>) -> Self {
        self.value = v.into();
        self
    }

    /// Build an unsigned record.
    pub fn build(self) -> Record {
        let header = RecordHeader {
            prev_hash: self.prev_hash,
            rec_no: self.rec_no,
            timestamp: self.timestamp,
            accuracy: self.accuracy,
        };
        let hash = compute_hash(&header, &self.value);

        Record {
            hash,
            header,
            value: self.value,
            signature: Ed25519Signature::ZERO,
        }
    }

    /// Build and sign the record.
    pub fn sign(self, keypair: &Keypair) -> Record {
        let mut record = self.build();
        record.signature = keypair.sign(&record.hash);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_builder() {
        let record = RecordBuilder::genesis()
            .timestamp(1_700_000_000_000)
            .value(b"hello".to_vec())
            .build();

        assert!(record.is_genesis());
        assert_eq!(record.header.rec_no, 1);
        assert_eq!(record.value.as_ref(), b"hello");
        assert!(record.signature.is_zero());
        assert_eq!(record.hash, record.compute_hash());
    }

    #[test]
    fn test_chained_record_points_to_prev() {
        let first = RecordBuilder::genesis().value(b"a".to_vec()).build();
        let second = RecordBuilder::new(first.hash, 2).value(b"b".to_vec()).build();

        assert_eq!(second.prev_hash(), first.hash);
        assert!(!second.is_genesis());
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn test_hash_covers_every_header_field() {
        let base = RecordBuilder::genesis().timestamp(10).accuracy(0.5).value(b"v".to_vec());
        let h = base.build().hash;

        let other_ts = RecordBuilder::genesis().timestamp(11).accuracy(0.5).value(b"v".to_vec());
        let other_acc = RecordBuilder::genesis().timestamp(10).accuracy(0.25).value(b"v".to_vec());
        let other_val = RecordBuilder::genesis().timestamp(10).accuracy(0.5).value(b"w".to_vec());

        assert_ne!(h, other_ts.build().hash);
        assert_ne!(h, other_acc.build().hash);
        assert_ne!(h, other_val.build().hash);
    }

    #[test]
    fn test_signed_record_verifies() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let record = RecordBuilder::genesis().value(b"signed".to_vec()).sign(&keypair);
        keypair
            .public_key()
            .verify(&record.hash, &record.signature)
            .unwrap();
    }

    #[test]
    fn test_metadata_projection() {
        let record = RecordBuilder::new(RecordHash::from_bytes([9; 32]), 7)
            .timestamp(99)
            .build();
        let meta = record.metadata();
        assert_eq!(meta.hash, record.hash);
        assert_eq!(meta.prev_hash, RecordHash::from_bytes([9; 32]));
        assert_eq!(meta.rec_no, 7);
        assert_eq!(meta.timestamp, 99);
    }
}
