//! Error types for the capsule core.

use thiserror::Error;

use crate::types::RecordHash;

/// Core errors raised by the cryptographic primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Validation errors for record integrity and signatures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed for record {0}")]
    SignatureFailed(RecordHash),

    #[error("hash mismatch: record claims {claimed}, content hashes to {computed}")]
    HashMismatch {
        claimed: RecordHash,
        computed: RecordHash,
    },

    #[error("record hash is the null sentinel")]
    NullHash,

    #[error("record {0} names itself as its predecessor")]
    SelfReference(RecordHash),
}
