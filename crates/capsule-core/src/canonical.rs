//! Canonical CBOR encoding of record headers.
//!
//! A header always encodes as the same four-entry map, so the encoder writes
//! it field by field instead of sorting a generic value:
//!
//! ```text
//! a4                      map(4)
//!   00  <bstr 32 | f6>    prev_hash, null for the first record
//!   01  <uint>            rec_no
//!   02  <int>             timestamp (ms)
//!   03  <uint>            accuracy as IEEE-754 bits
//! ```
//!
//! Keys 0..3 are single bytes already in ascending order, integers take their
//! shortest form and lengths are definite, which is RFC 8949 deterministic
//! encoding for this shape. Every replica must derive the same hash from the
//! same record.

use crate::record::RecordHeader;
use crate::types::RecordHash;

const MAJOR_UINT: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_MAP: u8 = 5;
const SIMPLE_NULL: u8 = 0xf6;

/// Map keys, in encoding order.
mod keys {
    pub const PREV_HASH: u64 = 0;
    pub const REC_NO: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
    pub const ACCURACY: u64 = 3;
}

/// Encode a record header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &RecordHeader) -> Vec<u8> {
    // 1 map byte + 4 keys + 34 prev + up to 9 for each integer.
    let mut buf = Vec::with_capacity(66);
    write_head(&mut buf, MAJOR_MAP, 4);

    write_head(&mut buf, MAJOR_UINT, keys::PREV_HASH);
    if header.prev_hash.is_null() {
        buf.push(SIMPLE_NULL);
    } else {
        write_head(&mut buf, MAJOR_BYTES, 32);
        buf.extend_from_slice(header.prev_hash.as_bytes());
    }

    write_head(&mut buf, MAJOR_UINT, keys::REC_NO);
    write_head(&mut buf, MAJOR_UINT, header.rec_no);

    write_head(&mut buf, MAJOR_UINT, keys::TIMESTAMP);
    write_int(&mut buf, header.timestamp);

    write_head(&mut buf, MAJOR_UINT, keys::ACCURACY);
    write_head(&mut buf, MAJOR_UINT, header.accuracy.to_bits());

    buf
}

/// Compute a record hash: Blake3(canonical_header || value).
pub fn compute_hash(header: &RecordHeader, value: &[u8]) -> RecordHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&canonical_header_bytes(header));
    hasher.update(value);
    RecordHash(*hasher.finalize().as_bytes())
}

/// Signed integer: major 0 for n >= 0, major 1 carrying -1 - n otherwise.
fn write_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        write_head(buf, MAJOR_UINT, n as u64);
    } else {
        write_head(buf, MAJOR_NEGATIVE, !(n as u64));
    }
}

/// Initial byte plus the shortest argument encoding for `arg`.
fn write_head(buf: &mut Vec<u8>, major: u8, arg: u64) {
    let mt = major << 5;
    match arg {
        0..=23 => buf.push(mt | arg as u8),
        24..=0xff => buf.extend_from_slice(&[mt | 24, arg as u8]),
        0x100..=0xffff => {
            buf.push(mt | 25);
            buf.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(mt | 26);
            buf.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            buf.push(mt | 27);
            buf.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    fn header(prev: RecordHash) -> RecordHeader {
        RecordHeader {
            prev_hash: prev,
            rec_no: 3,
            timestamp: 1_736_870_400_000,
            accuracy: 0.5,
        }
    }

    #[test]
    fn test_null_prev_encodes_as_cbor_null() {
        let bytes = canonical_header_bytes(&header(RecordHash::NULL));
        // map(4), key 0, null, key 1, 3
        assert_eq!(&bytes[..5], &[0xa4, 0x00, 0xf6, 0x01, 0x03]);
    }

    #[test]
    fn test_header_decodes_as_plain_cbor() {
        let h = header(RecordHash::from_bytes([7; 32]));
        let bytes = canonical_header_bytes(&h);
        let value: Value = ciborium::from_reader(&bytes[..]).unwrap();

        let Value::Map(entries) = value else {
            panic!("expected map");
        };
        let keys: Vec<Value> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            (0..4).map(|k: u8| Value::Integer(k.into())).collect::<Vec<_>>()
        );
        assert_eq!(entries[0].1, Value::Bytes(vec![7; 32]));
        assert_eq!(entries[2].1, Value::Integer(h.timestamp.into()));
        assert_eq!(entries[3].1, Value::Integer(0.5f64.to_bits().into()));
    }

    #[test]
    fn test_shortest_heads() {
        let cases: [(u64, &[u8]); 5] = [
            (23, &[0x17]),
            (24, &[0x18, 24]),
            (256, &[0x19, 0x01, 0x00]),
            (65_536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
            (u64::MAX, &[0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
        ];
        for (arg, expected) in cases {
            let mut buf = Vec::new();
            write_head(&mut buf, MAJOR_UINT, arg);
            assert_eq!(buf, expected, "arg {}", arg);
        }
    }

    #[test]
    fn test_negative_timestamps() {
        let mut buf = Vec::new();
        write_int(&mut buf, -1);
        assert_eq!(buf, vec![0x20]);

        buf.clear();
        write_int(&mut buf, -25);
        assert_eq!(buf, vec![0x38, 24]);

        buf.clear();
        write_int(&mut buf, i64::MIN);
        let decoded: Value = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(decoded, Value::Integer(i64::MIN.into()));
    }

    #[test]
    fn test_hash_depends_on_value() {
        let h = header(RecordHash::NULL);
        assert_ne!(compute_hash(&h, b"a"), compute_hash(&h, b"b"));
        assert_eq!(compute_hash(&h, b"a"), compute_hash(&h, b"a"));
    }
}
