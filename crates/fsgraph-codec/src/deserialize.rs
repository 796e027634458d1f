// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Full and delta deserialization.
//!
//! Phases run in stream order: header (and embedded schema), string table,
//! main walk, index rebuild, modification log (delta only), then the queued
//! fixups and the per-record finalize pass. Any error aborts the call; the
//! target store may already hold part of the decoded state.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use fsgraph_store::{RecordId, RecordStore, TypeCode, TypeRole, TypeSystem, Value};
use tracing::{debug, instrument, warn};

use crate::config::{AllowPreexisting, DeserializeOptions};
use crate::diff;
use crate::error::{CodecError, Result};
use crate::fixup::{Fixup, FixupQueue};
use crate::float;
use crate::header::{Compression, Header, HEADER_SIZE};
use crate::memo::{ModMemo, PrevMemo};
use crate::seq::{ReuseInfo, SeqMap};
use crate::slot_kind::{Layout, Layouts, SlotKind};
use crate::streams::{StreamId, StreamReaders};
use crate::strings::StringTable;

/// Result of a deserialize call.
#[derive(Debug, Clone)]
pub struct DeserializeOutcome {
    /// Sequence tables of this call, needed to apply a later delta.
    pub reuse: ReuseInfo,
    /// Whether the input was a delta.
    pub delta: bool,
    /// Records created.
    pub created: usize,
    /// Preexisting records the modification log touched.
    pub modified: usize,
}

/// Decodes `bytes` into `store`.
///
/// A full stream replaces the store's content. A delta is applied on top of
/// the state produced by the call whose outcome is passed as `reuse`.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn deserialize(
    store: &mut RecordStore,
    bytes: &[u8],
    reuse: Option<&ReuseInfo>,
    options: &DeserializeOptions,
) -> Result<DeserializeOutcome> {
    let header = Header::from_bytes(bytes)?;
    let delta = header.flags.is_delta();
    let mut pos = HEADER_SIZE;
    if header.flags.schema_included() {
        let len = bytes
            .get(pos..pos + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| CodecError::corrupt("schema", "truncated schema length"))?
            as usize;
        pos += 4;
        let blob = pos
            .checked_add(len)
            .and_then(|end| bytes.get(pos..end))
            .ok_or_else(|| CodecError::corrupt("schema", "schema extends past input"))?;
        pos += len;
        let embedded: TypeSystem = ciborium::from_reader(blob)
            .map_err(|e| CodecError::corrupt("schema", e.to_string()))?;
        if embedded != *store.schema() {
            return Err(CodecError::mismatch(
                "embedded schema differs from the schema of the target store",
            ));
        }
    }
    let section = bytes
        .get(pos..)
        .ok_or_else(|| CodecError::corrupt("stream table", "missing stream section"))?;
    let mut readers = StreamReaders::parse(section, header.compression == Compression::Zstd)?;

    let seqs = match (delta, reuse) {
        (true, None) => return Err(CodecError::MissingReuseInfo),
        (true, Some(reuse)) => SeqMap::from_reuse(reuse, store)?,
        (false, _) => {
            store.reset();
            SeqMap::default()
        }
    };
    let base = seqs.len();
    let layouts = Layouts::new(store.schema());
    let strings = StringTable::read(&mut readers)?;
    debug!(delta, base, blocks = strings.block_count(), "stream table read");

    let mut dec = Decoder {
        store,
        layouts: &layouts,
        readers,
        strings,
        seqs,
        fixups: FixupQueue::default(),
        memo: PrevMemo::default(),
        mods: ModMemo::default(),
        allow_preexisting: options.allow_preexisting,
        created: Vec::new(),
        modified: Vec::new(),
    };
    dec.main_walk()?;
    dec.read_index(delta)?;
    if delta {
        dec.read_modifications(base)?;
    }
    dec.finish(delta)
}

/// A slot value as read; references still name a sequence number.
#[derive(Debug)]
enum Wire {
    Value(Value),
    Ref(u32),
}

/// Anchored record whose container had not been read yet.
#[derive(Debug)]
struct Waiting {
    code: TypeCode,
    seq: u32,
    container_seq: u32,
    values: Vec<Wire>,
}

struct Decoder<'a> {
    store: &'a mut RecordStore,
    layouts: &'a Layouts,
    readers: StreamReaders<'a>,
    strings: StringTable,
    seqs: SeqMap,
    fixups: FixupQueue,
    memo: PrevMemo,
    mods: ModMemo,
    allow_preexisting: AllowPreexisting,
    created: Vec<RecordId>,
    modified: Vec<RecordId>,
}

impl Decoder<'_> {
    /// Rejects counts that could not possibly be backed by the input.
    fn bounded(&self, count: u32, stream: &'static str) -> Result<usize> {
        let count = count as usize;
        if count > self.readers.total_uncompressed() {
            return Err(CodecError::corrupt(
                stream,
                format!("count {count} exceeds the size of the input"),
            ));
        }
        Ok(count)
    }

    fn read_count(&mut self, id: StreamId) -> Result<usize> {
        let count = self.readers.read_u32(id)?;
        self.bounded(count, id.name())
    }

    fn read_diff(&mut self, id: StreamId, prev: i64) -> Result<i32> {
        let raw = self.readers.read_u64(id)?;
        diff::decode(raw, prev as i32).ok_or_else(|| {
            CodecError::corrupt(id.name(), format!("packed value {raw} out of range"))
        })
    }

    /// Reads one value; returns it with its memo form.
    fn read_value(&mut self, kind: SlotKind, prev: i64) -> Result<(Wire, i64)> {
        let read = match kind {
            SlotKind::Int => {
                let v = self.read_diff(StreamId::Int, prev)?;
                (Wire::Value(Value::Int(v)), i64::from(v))
            }
            SlotKind::Short => {
                let v = self.read_diff(StreamId::Short, prev)?;
                let v = i16::try_from(v)
                    .map_err(|_| CodecError::corrupt("short", format!("{v} is not a short")))?;
                (Wire::Value(Value::Short(v)), i64::from(v))
            }
            SlotKind::Long => {
                let (prev_high, prev_low) = diff::split_long(prev);
                let high = self.read_diff(StreamId::LongHigh, i64::from(prev_high))?;
                let low = self.read_diff(StreamId::LongLow, i64::from(prev_low))?;
                let v = diff::join_long(high, low);
                (Wire::Value(Value::Long(v)), v)
            }
            SlotKind::HeapRef => {
                let v = self.read_diff(StreamId::HeapRef, prev)?;
                let seq = u32::try_from(v).map_err(|_| {
                    CodecError::corrupt("heap_ref", format!("negative sequence number {v}"))
                })?;
                (Wire::Ref(seq), i64::from(v))
            }
            SlotKind::Byte => {
                let v = self.readers.read_u8(StreamId::Byte)? as i8;
                (Wire::Value(Value::Byte(v)), 0)
            }
            SlotKind::Boolean => {
                let b = match self.readers.read_u8(StreamId::Byte)? {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(CodecError::corrupt(
                            "byte",
                            format!("{other} is not a boolean"),
                        ))
                    }
                };
                (Wire::Value(Value::Boolean(b)), 0)
            }
            SlotKind::Float => {
                let exponent = self.readers.read_u32(StreamId::FloatExponent)?;
                let mantissa_sign = if exponent == 0 {
                    0
                } else {
                    self.readers.read_u64(StreamId::FloatMantissaSign)?
                };
                let bits = float::unpack_f32(exponent, mantissa_sign).ok_or_else(|| {
                    CodecError::corrupt("float_exponent", "float tokens out of range")
                })?;
                (Wire::Value(Value::Float(f32::from_bits(bits))), 0)
            }
            SlotKind::Double => {
                let exponent = self.readers.read_u32(StreamId::DoubleExponent)?;
                let mantissa_sign = if exponent == 0 {
                    0
                } else {
                    self.readers.read_u64(StreamId::DoubleMantissaSign)?
                };
                let bits = float::unpack_f64(exponent, mantissa_sign).ok_or_else(|| {
                    CodecError::corrupt("double_exponent", "double tokens out of range")
                })?;
                (Wire::Value(Value::Double(f64::from_bits(bits))), 0)
            }
            SlotKind::StrRef => {
                let s = self.strings.read_string(&mut self.readers)?;
                (Wire::Value(Value::Str(s)), 0)
            }
            SlotKind::ArrayLength | SlotKind::TypeCode => {
                return Err(CodecError::integrity(format!(
                    "{kind:?} is not a slot value kind"
                )))
            }
        };
        Ok(read)
    }

    fn bind(&mut self, seq: u32, id: RecordId) -> Result<()> {
        self.seqs.bind(seq, id)?;
        self.created.push(id);
        Ok(())
    }

    fn resolve(&mut self, fixup: Fixup) -> Result<()> {
        self.fixups.resolve(self.store, &self.seqs, fixup)
    }

    fn apply_slots(&mut self, id: RecordId, values: Vec<Wire>) -> Result<()> {
        for (offset, wire) in values.into_iter().enumerate() {
            match wire {
                Wire::Value(value) => self.store.restore_slot(id, offset, value)?,
                Wire::Ref(target_seq) => self.resolve(Fixup::SetSlot {
                    owner: id,
                    offset,
                    target_seq,
                })?,
            }
        }
        Ok(())
    }

    fn read_slots(&mut self, code: TypeCode, slots: &[SlotKind]) -> Result<Vec<Wire>> {
        let mut values = Vec::with_capacity(slots.len());
        for (offset, kind) in slots.iter().enumerate() {
            let prev = self.memo.get(code, offset);
            let (wire, num) = self.read_value(*kind, prev)?;
            self.memo.update(code, slots.len(), offset, *kind, num);
            values.push(wire);
        }
        Ok(values)
    }

    fn read_array(&mut self, code: TypeCode, kind: SlotKind, seq: u32) -> Result<()> {
        let len = self.read_count(StreamId::ArrayLength)?;
        let id = self.store.create_array(code, len)?;
        self.bind(seq, id)?;
        let mut prev = self.memo.get(code, 0);
        for index in 0..len {
            let (wire, num) = self.read_value(kind, prev)?;
            if index == 0 {
                self.memo.update(code, 1, 0, kind, num);
            }
            prev = num;
            match wire {
                Wire::Value(value) => self.store.restore_element(id, index, value)?,
                Wire::Ref(target_seq) => self.resolve(Fixup::SetElement {
                    owner: id,
                    index,
                    target_seq,
                })?,
            }
        }
        Ok(())
    }

    fn create_anchored(
        &mut self,
        code: TypeCode,
        seq: u32,
        container: RecordId,
        values: Vec<Wire>,
    ) -> Result<()> {
        let id = self.store.create_anchored(code, container)?;
        self.bind(seq, id)?;
        self.apply_slots(id, values)
    }

    fn main_walk(&mut self) -> Result<()> {
        let layouts = self.layouts;
        let extent = self.read_count(StreamId::Control)?;
        let mut waiting = Vec::new();
        for _ in 0..extent {
            let code = TypeCode(self.readers.read_u32(StreamId::TypeCode)?);
            let seq = self.seqs.reserve()?;
            let (slots, role) = match layouts.get(code)? {
                Layout::Array(kind) => {
                    self.read_array(code, *kind, seq)?;
                    continue;
                }
                Layout::Struct { slots, role, .. } => (slots, *role),
            };
            let values = self.read_slots(code, slots)?;
            match role {
                TypeRole::Plain => {
                    let id = self.store.create_record(code)?;
                    self.bind(seq, id)?;
                    self.apply_slots(id, values)?;
                }
                TypeRole::Container { key_feature } => {
                    let Some(Wire::Value(Value::Str(Some(key)))) = values.get(key_feature) else {
                        return Err(CodecError::integrity(format!(
                            "container with sequence number {seq} has no key"
                        )));
                    };
                    let id = self.store.create_container(code, key.clone())?;
                    self.bind(seq, id)?;
                    self.apply_slots(id, values)?;
                }
                TypeRole::Anchored { container_feature } => {
                    let container_seq = match values.get(container_feature) {
                        Some(Wire::Ref(target)) if *target != 0 => *target,
                        _ => {
                            return Err(CodecError::integrity(format!(
                                "anchored record with sequence number {seq} names no container"
                            )))
                        }
                    };
                    match self.seqs.record_of(container_seq) {
                        Some(container) => self.create_anchored(code, seq, container, values)?,
                        None => waiting.push(Waiting {
                            code,
                            seq,
                            container_seq,
                            values,
                        }),
                    }
                }
            }
        }
        let deferred = waiting.len();
        for w in waiting {
            let container = self.seqs.record_of(w.container_seq).ok_or_else(|| {
                CodecError::integrity(format!(
                    "container sequence number {} never materialized",
                    w.container_seq
                ))
            })?;
            self.create_anchored(w.code, w.seq, container, w.values)?;
        }
        debug!(records = extent, deferred, "main walk done");
        Ok(())
    }

    fn read_seq_list(&mut self) -> Result<Vec<RecordId>> {
        let count = self.read_count(StreamId::Control)?;
        let mut ids = Vec::with_capacity(count);
        let mut prev = 0u32;
        for _ in 0..count {
            let delta = self.readers.read_u32(StreamId::FsIndexes)?;
            let seq = prev
                .checked_add(delta)
                .ok_or_else(|| CodecError::corrupt("fs_indexes", "sequence number overflow"))?;
            prev = seq;
            let id = self.seqs.record_of(seq).ok_or_else(|| {
                CodecError::integrity(format!("index names unknown sequence number {seq}"))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn read_index(&mut self, delta: bool) -> Result<()> {
        let views = self.read_count(StreamId::Control)?;
        self.store.ensure_views(views);
        let containers = self.read_count(StreamId::Control)?;
        for _ in 0..containers {
            let view = self.readers.read_u32(StreamId::Control)? as usize;
            let target_seq = self.readers.read_u32(StreamId::Control)?;
            if view >= views {
                return Err(CodecError::corrupt(
                    "control",
                    format!("container for view {view} of {views}"),
                ));
            }
            self.resolve(Fixup::SetViewContainer { view, target_seq })?;
        }
        for view in 0..views {
            let added = self.read_seq_list()?;
            if delta {
                let removed = self.read_seq_list()?;
                let reindexed = self.read_seq_list()?;
                self.store
                    .apply_membership_delta(view, &added, &removed, &reindexed)?;
            } else {
                self.store.apply_membership_delta(view, &added, &[], &[])?;
            }
        }
        debug!(views, containers, "index rebuilt");
        Ok(())
    }

    /// Writes a modified feature, taking key features out of their views
    /// for the write and adding them back afterwards.
    fn apply_modified_slot(
        &mut self,
        id: RecordId,
        offset: usize,
        is_key: bool,
        wire: Wire,
    ) -> Result<()> {
        let views = if is_key {
            self.store.index().views_containing(id)
        } else {
            Vec::new()
        };
        for &view in &views {
            self.store.apply_membership_delta(view, &[], &[id], &[])?;
        }
        match wire {
            Wire::Value(value) => self.store.restore_slot(id, offset, value)?,
            Wire::Ref(target_seq) => self.resolve(Fixup::SetSlot {
                owner: id,
                offset,
                target_seq,
            })?,
        }
        for &view in &views {
            self.store.apply_membership_delta(view, &[id], &[], &[])?;
        }
        Ok(())
    }

    fn read_modifications(&mut self, base: usize) -> Result<()> {
        let layouts = self.layouts;
        let count = self.read_count(StreamId::Control)?;
        let mut prev_seq = 0;
        for _ in 0..count {
            let raw = self.readers.read_u64(StreamId::FsIndexes)?;
            if raw == 0 {
                warn!("modification entry skipped by the sender");
                continue;
            }
            let seq = diff::decode(raw, prev_seq).ok_or_else(|| {
                CodecError::corrupt("fs_indexes", format!("packed value {raw} out of range"))
            })?;
            prev_seq = seq;
            let seq = u32::try_from(seq)
                .ok()
                .filter(|s| *s >= 1 && (*s as usize) <= base)
                .ok_or_else(|| {
                    CodecError::integrity(format!(
                        "modification of sequence number {seq}, which is not preexisting"
                    ))
                })?;
            if self.allow_preexisting == AllowPreexisting::Disallow {
                return Err(CodecError::PreexistingModificationRejected { seq });
            }
            let id = self.seqs.record_of(seq).ok_or_else(|| {
                CodecError::integrity(format!("sequence number {seq} is unbound"))
            })?;
            let code = self.store.record(id)?.type_code;
            let layout = layouts.get(code)?;
            let changes = self.read_count(StreamId::FsIndexes)?;
            let mut index = 0usize;
            for _ in 0..changes {
                let delta = self.readers.read_u32(StreamId::FsIndexes)? as usize;
                index = index
                    .checked_add(delta)
                    .ok_or_else(|| CodecError::corrupt("fs_indexes", "slot index overflow"))?;
                match layout {
                    Layout::Struct { slots, keys, .. } => {
                        let kind = *slots.get(index).ok_or_else(|| {
                            CodecError::mismatch(format!(
                                "type code {} has no feature offset {index}",
                                code.0
                            ))
                        })?;
                        let prev = self.mods.get(kind);
                        let (wire, num) = self.read_value(kind, prev)?;
                        self.mods.set(kind, num);
                        let is_key = keys.get(index).copied().unwrap_or(false);
                        self.apply_modified_slot(id, index, is_key, wire)?;
                    }
                    Layout::Array(kind) => {
                        if index >= self.store.array_len(id)? {
                            return Err(CodecError::corrupt(
                                "fs_indexes",
                                format!("element {index} past the end of array {seq}"),
                            ));
                        }
                        let prev = self.mods.get(*kind);
                        let (wire, num) = self.read_value(*kind, prev)?;
                        self.mods.set(*kind, num);
                        match wire {
                            Wire::Value(value) => self.store.restore_element(id, index, value)?,
                            Wire::Ref(target_seq) => self.resolve(Fixup::SetElement {
                                owner: id,
                                index,
                                target_seq,
                            })?,
                        }
                    }
                }
            }
            self.modified.push(id);
        }
        debug!(entries = count, modified = self.modified.len(), "modification log applied");
        Ok(())
    }

    fn finish(self, delta: bool) -> Result<DeserializeOutcome> {
        let pending = self.fixups.len();
        self.fixups.run(self.store, &self.seqs)?;
        for &id in self.created.iter().chain(&self.modified) {
            self.store.finalize_record(id)?;
        }
        let reuse = self.seqs.to_reuse()?;
        debug!(fixups = pending, created = self.created.len(), "decode finished");
        Ok(DeserializeOutcome {
            reuse,
            delta,
            created: self.created.len(),
            modified: self.modified.len(),
        })
    }
}
