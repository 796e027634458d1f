// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Difference/sign packing of 32-bit values.
//!
//! A value is written either as its magnitude or as its difference from a
//! previous value of the same slot, whichever is smaller, shifted left by
//! two tag bits:
//!
//! ```text
//! bit 0: 1 = delta from prev, 0 = absolute
//! bit 1: 1 = negative
//! ```
//!
//! The raw value `0` is zero and `2` (negative, magnitude zero) is
//! `i32::MIN`, whose magnitude has no positive representation. Neither of
//! those two values updates the previous-value memo.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

/// Packs `v` against `prev`.
pub fn encode(v: i32, prev: i32) -> u64 {
    if v == 0 {
        return 0;
    }
    if v == i32::MIN {
        return 2;
    }
    let abs_v = u64::from(v.unsigned_abs());
    let negative = if v < 0 { 2 } else { 0 };
    if (v > 0 && prev > 0) || (v < 0 && prev < 0) {
        // Same sign, so the subtraction cannot overflow.
        let diff = v - prev;
        let abs_diff = u64::from(diff.unsigned_abs());
        if abs_diff < abs_v {
            return (abs_diff << 2) | if diff < 0 { 3 } else { 1 };
        }
    }
    (abs_v << 2) | negative
}

/// Largest raw value [`encode`] can produce.
pub const MAX_RAW: u64 = (1 << 33) | 3;

/// Unpacks a raw value against `prev`, or `None` if it is out of range.
pub fn decode(raw: u64, prev: i32) -> Option<i32> {
    if raw > MAX_RAW {
        return None;
    }
    if raw == 0 {
        return Some(0);
    }
    let is_delta = raw & 1 != 0;
    let is_negative = raw & 2 != 0;
    let magnitude = raw >> 2;
    if is_negative && magnitude == 0 {
        return Some(i32::MIN);
    }
    let value = if is_negative {
        (magnitude as i64).wrapping_neg()
    } else {
        magnitude as i64
    };
    if !is_delta && !(i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value) {
        return None;
    }
    let value = value as i32;
    Some(if is_delta {
        value.wrapping_add(prev)
    } else {
        value
    })
}

/// Whether `v` may replace the previous-value memo after being written.
pub fn updates_prev(v: i32) -> bool {
    v != 0 && v != i32::MIN
}

/// Returns `true` if the raw value was written as a delta.
pub fn is_delta(raw: u64) -> bool {
    raw & 1 != 0
}

/// Folds the sign of `v` into the low bit: `v << 1`, or `(-v << 1) | 1`.
pub fn encode_int_sign(v: i32) -> u32 {
    if v < 0 {
        (v.unsigned_abs() << 1) | 1
    } else {
        (v as u32) << 1
    }
}

/// Inverse of [`encode_int_sign`].
pub fn decode_int_sign(v: u32) -> i32 {
    let magnitude = (v >> 1) as i32;
    if v & 1 == 1 {
        -magnitude
    } else {
        magnitude
    }
}

/// High and low halves of a 64-bit value, each packed independently.
pub fn split_long(v: i64) -> (i32, i32) {
    ((v >> 32) as i32, v as i32)
}

/// Inverse of [`split_long`].
pub fn join_long(high: i32, low: i32) -> i64 {
    (i64::from(high) << 32) | i64::from(low as u32)
}
