// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Previous-value state of the difference encoding.
//!
//! Both directions keep identical memos and update them at identical points,
//! so a value decodes against exactly the `prev` it was encoded against.
//! Memos hold numbers as `i64`: 32-bit kinds (and sequence numbers) widen,
//! longs are stored whole and split when used.
#![allow(clippy::cast_possible_truncation)]

use fsgraph_store::TypeCode;
use rustc_hash::FxHashMap;

use crate::diff;
use crate::slot_kind::SlotKind;

/// Per-type, per-offset memo of the main walk. For arrays offset 0 holds
/// the most recent first element that [`keeps`] accepted.
#[derive(Debug, Default)]
pub(crate) struct PrevMemo {
    by_code: FxHashMap<TypeCode, Vec<i64>>,
}

impl PrevMemo {
    pub(crate) fn get(&self, code: TypeCode, offset: usize) -> i64 {
        self.by_code
            .get(&code)
            .and_then(|slots| slots.get(offset))
            .copied()
            .unwrap_or(0)
    }

    /// Stores `value` if `kind` keeps it.
    pub(crate) fn update(
        &mut self,
        code: TypeCode,
        len: usize,
        offset: usize,
        kind: SlotKind,
        value: i64,
    ) {
        if keeps(kind, value) {
            self.set(code, len, offset, value);
        }
    }

    fn set(&mut self, code: TypeCode, len: usize, offset: usize, value: i64) {
        let slots = self.by_code.entry(code).or_insert_with(|| vec![0; len]);
        if let Some(slot) = slots.get_mut(offset) {
            *slot = value;
        }
    }
}

/// Whether a written value replaces the memo of its slot.
///
/// Longs always do; the 32-bit diff kinds skip 0 and their minimum.
pub(crate) fn keeps(kind: SlotKind, value: i64) -> bool {
    match kind {
        SlotKind::Long => true,
        SlotKind::Int | SlotKind::Short | SlotKind::HeapRef => diff::updates_prev(value as i32),
        _ => false,
    }
}

/// Per-kind memo of the modified-slot log, updated after every value.
#[derive(Debug, Default)]
pub(crate) struct ModMemo {
    int: i64,
    short: i64,
    heap_ref: i64,
    long: i64,
}

impl ModMemo {
    pub(crate) fn get(&self, kind: SlotKind) -> i64 {
        match kind {
            SlotKind::Int => self.int,
            SlotKind::Short => self.short,
            SlotKind::HeapRef => self.heap_ref,
            SlotKind::Long => self.long,
            _ => 0,
        }
    }

    pub(crate) fn set(&mut self, kind: SlotKind, value: i64) {
        let slot = match kind {
            SlotKind::Int => &mut self.int,
            SlotKind::Short => &mut self.short,
            SlotKind::HeapRef => &mut self.heap_ref,
            SlotKind::Long => &mut self.long,
            _ => return,
        };
        *slot = value;
    }
}
