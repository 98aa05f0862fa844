//! # Capsule Core
//!
//! Pure primitives for DataCapsule replication: records, hashes, canonical
//! encoding and the in-memory log graph.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Record`] - One immutable, hash-linked entry of a capsule
//! - [`RecordHash`] - Content-addressed identifier (Blake3 hash)
//! - [`Metadata`] - The value-less projection used to build graphs
//! - [`LogGraph`] - Hash-DAG with incremental [`Frontier`] maintenance
//!
//! ## Canonicalization
//!
//! Record hashes are computed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod record;
pub mod types;
pub mod validation;

pub use canonical::{canonical_header_bytes, compute_hash};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use graph::{Frontier, LogGraph};
pub use record::{Metadata, Record, RecordBuilder, RecordHeader};
pub use types::RecordHash;
pub use validation::{validate_record, validate_record_structure};
