//! Identifier newtypes for DataCapsule records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte record hash, computed as Blake3(canonical_header || value).
///
/// This is the content-address of a record. It is also the pointer a record
/// uses to name its predecessor, so the whole capsule forms a hash-linked DAG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordHash(pub [u8; 32]);

impl RecordHash {
    /// The null hash: "this record has no predecessor".
    pub const NULL: Self = Self([0u8; 32]);

    /// Create a new RecordHash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes with Blake3.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the null sentinel.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl fmt::Debug for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "RecordHash(null)");
        }
        write!(f, "RecordHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for RecordHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for RecordHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for RecordHash {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_hash_hex_roundtrip() {
        let hash = RecordHash::from_bytes([0x42; 32]);
        let recovered = RecordHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_from_hex_rejects_short_input() {
        assert!(RecordHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_record_hash_display() {
        let hash = RecordHash::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", hash), "abababababababab");
    }

    #[test]
    fn test_null_hash() {
        assert!(RecordHash::NULL.is_null());
        assert!(!RecordHash::digest(b"x").is_null());
        assert_eq!(format!("{:?}", RecordHash::NULL), "RecordHash(null)");
    }

    #[test]
    fn test_try_from_slice() {
        let bytes = [7u8; 32];
        let hash = RecordHash::try_from(&bytes[..]).unwrap();
        assert_eq!(hash.as_bytes(), &bytes);
        assert!(RecordHash::try_from(&bytes[..31]).is_err());
    }
}
