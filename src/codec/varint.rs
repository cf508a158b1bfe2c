//! LEB128 variable-length integers.
//!
//! Seven bits per byte, least significant group first, with the high bit set
//! on every byte except the last. Small values, which dominate length
//! prefixes of control traffic, take a single byte.

use bytes::BufMut;
use integer_encoding::VarInt;

use super::ReadError;

/// Maximum encoded size of a `u32` varint.
pub const MAX_U32_LEN: usize = 5;

/// Maximum encoded size of a `u64` varint.
pub const MAX_U64_LEN: usize = 10;

/// Number of bytes `value` occupies when encoded.
///
/// # Examples
///
/// ```
/// use muxframe::codec::varint::encoded_len;
///
/// assert_eq!(encoded_len(0), 1);
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(128), 2);
/// ```
#[must_use]
pub fn encoded_len(value: u64) -> usize { value.required_space() }

/// Append `value` to `dst`.
pub fn put_u64(dst: &mut impl BufMut, value: u64) {
    let mut scratch = [0_u8; MAX_U64_LEN];
    let len = value.encode_var(&mut scratch);
    dst.put_slice(&scratch[..len]);
}

/// Append `value` to `dst`.
pub fn put_u32(dst: &mut impl BufMut, value: u32) { put_u64(dst, u64::from(value)); }

/// Decode a `u64` from the front of `src`, returning it with the number of
/// bytes consumed.
///
/// # Errors
///
/// Returns [`ReadError::MalformedVarint`] if `src` ends before the final
/// byte or the encoding is longer than ten bytes.
pub fn decode_u64(src: &[u8]) -> Result<(u64, usize), ReadError> {
    let window = &src[..src.len().min(MAX_U64_LEN)];
    u64::decode_var(window).ok_or(ReadError::MalformedVarint)
}

/// Decode a `u32` from the front of `src`.
///
/// # Errors
///
/// Returns [`ReadError::MalformedVarint`] if the varint is truncated or
/// encodes a value above `u32::MAX`.
///
/// # Examples
///
/// ```
/// use muxframe::codec::varint::decode_u32;
///
/// assert_eq!(decode_u32(&[0xac, 0x02]).unwrap(), (300, 2));
/// assert!(decode_u32(&[0x80]).is_err());
/// ```
pub fn decode_u32(src: &[u8]) -> Result<(u32, usize), ReadError> {
    let (value, used) = decode_u64(src)?;
    let value = u32::try_from(value).map_err(|_| ReadError::MalformedVarint)?;
    Ok((value, used))
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7f])]
    #[case(128, &[0x80, 0x01])]
    #[case(300, &[0xac, 0x02])]
    #[case(u32::MAX, &[0xff, 0xff, 0xff, 0xff, 0x0f])]
    fn encodes_known_values(#[case] value: u32, #[case] expected: &[u8]) {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, value);
        assert_eq!(&buf[..], expected);
        assert_eq!(encoded_len(u64::from(value)), expected.len());
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x80])]
    #[case(&[0xff, 0xff])]
    fn truncated_input_is_rejected(#[case] input: &[u8]) {
        assert!(matches!(decode_u32(input), Err(ReadError::MalformedVarint)));
    }

    #[test]
    fn values_wider_than_u32_are_rejected() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, u64::from(u32::MAX) + 1);
        assert!(decode_u32(&buf).is_err());
        assert_eq!(decode_u64(&buf).ok(), Some((u64::from(u32::MAX) + 1, 5)));
    }

    proptest! {
        #[test]
        fn u32_round_trips(value in any::<u32>(), trailer in proptest::collection::vec(any::<u8>(), 0..4)) {
            let mut buf = BytesMut::new();
            put_u32(&mut buf, value);
            let len = buf.len();
            buf.extend_from_slice(&trailer);
            let (decoded, used) = decode_u32(&buf).expect("decode");
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(used, len);
        }

        #[test]
        fn any_strict_prefix_is_an_overflow(value in 128_u32..) {
            let mut buf = BytesMut::new();
            put_u32(&mut buf, value);
            for cut in 0..buf.len() {
                prop_assert!(decode_u32(&buf[..cut]).is_err());
            }
        }
    }
}
