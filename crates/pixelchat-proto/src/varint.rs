//! Unsigned LEB128 varints.

use crate::errors::{ProtocolError, Result};

/// Longest encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

/// Append `value` as an unsigned varint.
pub(crate) fn put_uvarint(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Read an unsigned varint from the front of `src`.
///
/// Returns the value and the number of bytes consumed.
pub(crate) fn read_uvarint(src: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte holds only bit 63 and must terminate.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(ProtocolError::MalformedVarint);
        }

        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(ProtocolError::RecordTooShort { needed: src.len() + 1, available: src.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_values() {
        for v in [0u64, 1, 127] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, v);
            assert_eq!(buf.len(), 1);
            assert_eq!(read_uvarint(&buf).unwrap(), (v, 1));
        }
    }

    #[test]
    fn multi_byte_values() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(read_uvarint(&buf).unwrap(), (300, 2));

        buf.clear();
        put_uvarint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(read_uvarint(&buf).unwrap(), (u64::MAX, MAX_VARINT_LEN));
    }

    #[test]
    fn truncated_varint_is_rejected() {
        assert!(matches!(read_uvarint(&[0x80, 0x80]), Err(ProtocolError::RecordTooShort { .. })));
        assert!(matches!(read_uvarint(&[]), Err(ProtocolError::RecordTooShort { .. })));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xFFu8; 11];
        assert_eq!(read_uvarint(&bytes), Err(ProtocolError::MalformedVarint));

        let mut overflow = [0xFFu8; 10];
        overflow[9] = 0x02;
        assert_eq!(read_uvarint(&overflow), Err(ProtocolError::MalformedVarint));
    }
}
