//! Little-endian integer codec and the Bitcoin-family variable-length
//! integer ("valint") and variable-length string ("valstring") encodings.

/// A decoded `valint`: the value itself and how many bytes it consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Valint {
    pub value: u64,
    pub consumed: usize,
}

/// Decode a `valint` from the front of `buf`.
///
/// Returns `None` if `buf` is too short for the prefix it declares, or if
/// the prefix byte is `0xff` (the 9-byte form, which this crawler never
/// needs and treats as a protocol violation rather than supporting).
pub fn decode_valint(buf: &[u8]) -> Option<Valint> {
    let c = *buf.first()?;
    match c {
        0xff => None,
        0xfe => {
            let bytes = buf.get(1..5)?;
            let value = u32::from_le_bytes(bytes.try_into().ok()?) as u64;
            Some(Valint { value, consumed: 5 })
        }
        0xfd => {
            let bytes = buf.get(1..3)?;
            let value = u16::from_le_bytes(bytes.try_into().ok()?) as u64;
            Some(Valint { value, consumed: 3 })
        }
        small => Some(Valint {
            value: small as u64,
            consumed: 1,
        }),
    }
}

/// Encode `value` as a `valint` using the smallest applicable prefix form.
pub fn encode_valint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    }
}

/// Encode a `valstring`: `valint(len) || bytes`.
pub fn encode_valstring(bytes: &[u8]) -> Vec<u8> {
    let mut out = encode_valint(bytes.len() as u64);
    out.extend_from_slice(bytes);
    out
}

/// Decode a `valstring` from the front of `buf`, returning the string bytes
/// and the total number of bytes consumed (prefix plus payload).
pub fn decode_valstring(buf: &[u8]) -> Option<(&[u8], usize)> {
    let prefix = decode_valint(buf)?;
    let len = prefix.value as usize;
    let start = prefix.consumed;
    let end = start.checked_add(len)?;
    let bytes = buf.get(start..end)?;
    Some((bytes, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valint_round_trips_small_values() {
        for v in [0u64, 1, 252] {
            let encoded = encode_valint(v);
            let decoded = decode_valint(&encoded).unwrap();
            assert_eq!(decoded.value, v);
            assert_eq!(decoded.consumed, encoded.len());
        }
    }

    #[test]
    fn valint_round_trips_fd_prefixed_values() {
        for v in [0xfdu64, 0xfe, 0xffff] {
            let encoded = encode_valint(v);
            assert_eq!(encoded[0], 0xfd);
            let decoded = decode_valint(&encoded).unwrap();
            assert_eq!(decoded.value, v);
            assert_eq!(decoded.consumed, 3);
        }
    }

    #[test]
    fn valint_round_trips_fe_prefixed_values() {
        for v in [0x10000u64, 0xffff_ffff] {
            let encoded = encode_valint(v);
            assert_eq!(encoded[0], 0xfe);
            let decoded = decode_valint(&encoded).unwrap();
            assert_eq!(decoded.value, v);
            assert_eq!(decoded.consumed, 5);
        }
    }

    #[test]
    fn valint_rejects_ff_prefix() {
        assert!(decode_valint(&[0xff, 0, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn valint_rejects_truncated_prefix() {
        assert!(decode_valint(&[0xfd, 0x01]).is_none());
        assert!(decode_valint(&[]).is_none());
    }

    #[test]
    fn valstring_round_trip() {
        let encoded = encode_valstring(b"hello");
        let (bytes, consumed) = decode_valstring(&encoded).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn valstring_rejects_declared_length_past_buffer() {
        let mut encoded = encode_valstring(b"hello");
        encoded.truncate(encoded.len() - 1);
        assert!(decode_valstring(&encoded).is_none());
    }
}
