// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Base-128 variable-length unsigned integers.
//!
//! Seven payload bits per byte, least significant group first, high bit set
//! on every byte except the last. A `u32` takes at most 5 bytes and a `u64`
//! at most 10; anything longer, or a final byte carrying bits beyond the
//! value's width, is rejected.
#![allow(clippy::cast_possible_truncation)]

use thiserror::Error;

/// Maximum encoded length of a `u32`.
pub const MAX_LEN_U32: usize = 5;
/// Maximum encoded length of a `u64`.
pub const MAX_LEN_U64: usize = 10;

/// Malformed varint input.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VarintError {
    /// Input ended inside a varint.
    #[error("truncated varint")]
    Truncated,
    /// Continuation did not terminate within the value's bit width.
    #[error("varint overflows {bits} bits")]
    Overflow {
        /// Width of the value being decoded.
        bits: u32,
    },
}

/// Appends `value` as a varint.
pub fn write_u64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Appends `value` as a varint.
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    write_u64(out, u64::from(value));
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

fn read(input: &[u8], pos: &mut usize, bits: u32) -> Result<u64, VarintError> {
    let max_len = bits.div_ceil(7) as usize;
    let mut value = 0u64;
    for i in 0..max_len {
        let byte = *input.get(*pos).ok_or(VarintError::Truncated)?;
        *pos += 1;
        let shift = 7 * i as u32;
        let payload = u64::from(byte & 0x7f);
        if shift + 7 > bits && payload >> (bits - shift) != 0 {
            return Err(VarintError::Overflow { bits });
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(VarintError::Overflow { bits })
}

/// Reads a `u32` varint at `*pos`, advancing it.
pub fn read_u32(input: &[u8], pos: &mut usize) -> Result<u32, VarintError> {
    read(input, pos, 32).map(|v| v as u32)
}

/// Reads a `u64` varint at `*pos`, advancing it.
pub fn read_u64(input: &[u8], pos: &mut usize) -> Result<u64, VarintError> {
    read(input, pos, 64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64(&mut out, v);
        out
    }

    #[test]
    fn small_values_take_one_byte() {
        assert_eq!(enc(0), vec![0]);
        assert_eq!(enc(127), vec![0x7f]);
        assert_eq!(enc(128), vec![0x80, 0x01]);
        assert_eq!(enc(300), vec![0xac, 0x02]);
    }

    #[test]
    fn limits_encode_at_max_length() {
        assert_eq!(enc(u64::from(u32::MAX)).len(), MAX_LEN_U32);
        assert_eq!(enc(u64::MAX).len(), MAX_LEN_U64);
        let bytes = enc(u64::MAX);
        assert_eq!(read_u64(&bytes, &mut 0).unwrap(), u64::MAX);
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert_eq!(read_u32(&[0x80, 0x80], &mut 0), Err(VarintError::Truncated));
        assert_eq!(read_u32(&[], &mut 0), Err(VarintError::Truncated));
    }

    #[test]
    fn unterminated_continuation_is_rejected() {
        let bytes = [0xff; 6];
        assert_eq!(
            read_u32(&bytes, &mut 0),
            Err(VarintError::Overflow { bits: 32 })
        );
        // Fifth byte may carry only four payload bits for a u32.
        let too_wide = [0xff, 0xff, 0xff, 0xff, 0x10];
        assert_eq!(
            read_u32(&too_wide, &mut 0),
            Err(VarintError::Overflow { bits: 32 })
        );
        let max = enc(u64::from(u32::MAX));
        assert_eq!(read_u32(&max, &mut 0).unwrap(), u32::MAX);
    }

    #[test]
    fn reads_advance_position() {
        let mut bytes = enc(5);
        bytes.extend(enc(1 << 20));
        let mut pos = 0;
        assert_eq!(read_u32(&bytes, &mut pos).unwrap(), 5);
        assert_eq!(read_u32(&bytes, &mut pos).unwrap(), 1 << 20);
        assert_eq!(pos, bytes.len());
    }

    proptest! {
        #[test]
        fn u64_identity(v in any::<u64>()) {
            let bytes = enc(v);
            prop_assert_eq!(bytes.len(), encoded_len(v));
            let mut pos = 0;
            prop_assert_eq!(read_u64(&bytes, &mut pos).unwrap(), v);
            prop_assert_eq!(pos, bytes.len());
        }

        #[test]
        fn u32_identity(v in any::<u32>()) {
            let mut bytes = Vec::new();
            write_u32(&mut bytes, v);
            prop_assert_eq!(read_u32(&bytes, &mut 0).unwrap(), v);
        }
    }
}
