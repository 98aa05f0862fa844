//! Record validation: hash integrity and writer signatures.

use crate::crypto::Ed25519PublicKey;
use crate::error::ValidationError;
use crate::record::Record;

/// Validate a record received from a peer.
///
/// This performs:
/// - Structural checks (see [`validate_record_structure`])
/// - Signature verification against `writer`, when given
pub fn validate_record(
    record: &Record,
    writer: Option<&Ed25519PublicKey>,
) -> Result<(), ValidationError> {
    validate_record_structure(record)?;

    if let Some(key) = writer {
        key.verify(&record.hash, &record.signature)
            .map_err(|_| ValidationError::SignatureFailed(record.hash))?;
    }

    Ok(())
}

/// Validate a record's hash without looking at its signature.
pub fn validate_record_structure(record: &Record) -> Result<(), ValidationError> {
    if record.hash.is_null() {
        return Err(ValidationError::NullHash);
    }

    if record.header.prev_hash == record.hash {
        return Err(ValidationError::SelfReference(record.hash));
    }

    let computed = record.compute_hash();
    if computed != record.hash {
        return Err(ValidationError::HashMismatch {
            claimed: record.hash,
            computed,
        });
    }

    Ok(())
}
