// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! IEEE-754 bit repacking.
//!
//! A float is split into an exponent token and a mantissa token. The
//! exponent token is never 0 for a nonzero bit pattern, so 0 alone stands
//! for `+0.0` and no mantissa token follows it. The mantissa is bit-reversed
//! so that short mantissas (few significant high bits) become small
//! integers, then shifted left once with the sign in bit 0.
//!
//! Floats store the biased exponent plus one. Doubles store the unbiased
//! exponent, shifted away from zero when non-negative, sign-folded.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use crate::diff::{decode_int_sign, encode_int_sign};

/// Exponent and mantissa tokens of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repacked {
    /// 0 for an all-zero bit pattern; otherwise the exponent token.
    pub exponent: u32,
    /// Reversed mantissa with the sign in bit 0; unused when `exponent` is 0.
    pub mantissa_sign: u64,
}

const F32_MANTISSA: u32 = 0x007f_ffff;
const F64_MANTISSA: u64 = 0x000f_ffff_ffff_ffff;

/// Repacks the bits of an `f32`.
pub fn pack_f32(bits: u32) -> Repacked {
    if bits == 0 {
        return Repacked {
            exponent: 0,
            mantissa_sign: 0,
        };
    }
    let exponent = ((bits >> 23) & 0xff) + 1;
    let reversed = ((bits & F32_MANTISSA) << 9).reverse_bits();
    let mantissa_sign = (u64::from(reversed) << 1) | u64::from(bits >> 31);
    Repacked {
        exponent,
        mantissa_sign,
    }
}

/// Reassembles `f32` bits, or `None` if a token is out of range.
pub fn unpack_f32(exponent: u32, mantissa_sign: u64) -> Option<u32> {
    if exponent == 0 {
        return Some(0);
    }
    if exponent > 0x100 || mantissa_sign >> 24 != 0 {
        return None;
    }
    let sign = (mantissa_sign & 1) as u32;
    let mantissa = ((mantissa_sign >> 1) as u32).reverse_bits() >> 9;
    Some(((exponent - 1) << 23) | mantissa | (sign << 31))
}

/// Repacks the bits of an `f64`.
pub fn pack_f64(bits: u64) -> Repacked {
    if bits == 0 {
        return Repacked {
            exponent: 0,
            mantissa_sign: 0,
        };
    }
    let mut exponent = ((bits >> 52) & 0x7ff) as i32 - 1023;
    if exponent >= 0 {
        exponent += 1;
    }
    let reversed = ((bits & F64_MANTISSA) << 12).reverse_bits();
    Repacked {
        exponent: encode_int_sign(exponent),
        mantissa_sign: (reversed << 1) | (bits >> 63),
    }
}

/// Reassembles `f64` bits, or `None` if a token is out of range.
pub fn unpack_f64(exponent: u32, mantissa_sign: u64) -> Option<u64> {
    if exponent == 0 {
        return Some(0);
    }
    if mantissa_sign >> 53 != 0 {
        return None;
    }
    let mut field = decode_int_sign(exponent);
    if field > 0 {
        field -= 1;
    }
    let field = field + 1023;
    if !(0..=0x7ff).contains(&field) {
        return None;
    }
    let sign = mantissa_sign & 1;
    let mantissa = (mantissa_sign >> 1).reverse_bits() >> 12;
    Some(((field as u64) << 52) | mantissa | (sign << 63))
}
