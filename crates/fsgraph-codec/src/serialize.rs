// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Full and delta serialization.
//!
//! Logical order of the output, each item landing on its own stream:
//!
//! ```text
//! StrChars   common-string blocks
//! Control    heap extent (records in the main walk)
//! ...        main walk: type code, then slots or array length + elements
//! Control    view count, container count, (view, container seq) pairs
//! Control +  per view: full = members; delta = added, removed, reindexed
//! FsIndexes    (count on Control, sorted seq deltas on FsIndexes)
//! Control +  delta only: modified-record count, then per record
//! FsIndexes    seq diff (0 = skipped), change count, (index delta, value)*
//! ```
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::io::Write;
use std::time::Instant;

use fsgraph_store::{
    ArrayValues, ChangeSet, Mark, RecordBody, RecordId, RecordStore, TypeRole, Value,
};
use tracing::{debug, instrument, warn};

use crate::config::{CompressLevel, SerializeOptions};
use crate::diff;
use crate::error::{CodecError, Result};
use crate::float;
use crate::header::{Compression, Header};
use crate::measure::Measurements;
use crate::memo::{ModMemo, PrevMemo};
use crate::seq::{ReuseInfo, SeqMap};
use crate::slot_kind::{Layout, Layouts, SlotKind};
use crate::streams::{StreamId, StreamSet};
use crate::strings::StringOptimizer;

/// Result of a serialize call.
#[derive(Debug, Clone)]
pub struct SerializeOutcome {
    /// Sequence tables of this call, needed for a later delta.
    pub reuse: ReuseInfo,
    /// Statistics, when [`SerializeOptions::measure`] was set.
    pub measurements: Option<Measurements>,
}

/// Serializes every reachable record of `store` to `out`.
#[instrument(skip_all, fields(records = store.len(), level = ?options.level))]
pub fn serialize<W: Write>(
    store: &RecordStore,
    out: &mut W,
    options: &SerializeOptions,
) -> Result<SerializeOutcome> {
    let started = Instant::now();
    let walked = store.reachable_in_creation_order();
    let mut seqs = SeqMap::default();
    for &id in &walked {
        seqs.assign(id)?;
    }
    run(store, out, options, Plan {
        seqs,
        walked,
        delta: None,
        started,
    })
}

/// Serializes what changed in `store` since `mark`.
///
/// `reuse` is the outcome of the call that sent the state the mark was
/// taken on. New records continue its numbering.
#[instrument(skip_all, fields(records = store.len(), level = ?options.level))]
pub fn serialize_delta<W: Write>(
    store: &RecordStore,
    out: &mut W,
    mark: &Mark,
    reuse: &ReuseInfo,
    options: &SerializeOptions,
) -> Result<SerializeOutcome> {
    let started = Instant::now();
    if !store.is_valid_mark(mark) {
        return Err(CodecError::InvalidMark);
    }
    if let Some(id) = reuse.records().iter().find(|id| !mark.is_preexisting(**id)) {
        return Err(CodecError::integrity(format!(
            "reuse info names record {id:?} created after the mark"
        )));
    }
    let mut seqs = SeqMap::from_reuse(reuse, store)?;
    let walked: Vec<RecordId> = store
        .reachable_in_creation_order()
        .into_iter()
        .filter(|id| !mark.is_preexisting(*id))
        .collect();
    for &id in &walked {
        seqs.assign(id)?;
    }
    let modified = store.modified_since_mark(mark)?;
    run(store, out, options, Plan {
        seqs,
        walked,
        delta: Some(DeltaPlan { mark, modified }),
        started,
    })
}

struct DeltaPlan<'m> {
    mark: &'m Mark,
    modified: Vec<(RecordId, ChangeSet)>,
}

struct Plan<'m> {
    seqs: SeqMap,
    walked: Vec<RecordId>,
    delta: Option<DeltaPlan<'m>>,
    started: Instant,
}

fn run<W: Write>(
    store: &RecordStore,
    out: &mut W,
    options: &SerializeOptions,
    plan: Plan<'_>,
) -> Result<SerializeOutcome> {
    let layouts = Layouts::new(store.schema());
    let mut enc = Encoder {
        store,
        layouts: &layouts,
        seqs: plan.seqs,
        streams: StreamSet::default(),
        strings: StringOptimizer::default(),
        memo: PrevMemo::default(),
        mods: ModMemo::default(),
        absolute: 0,
        delta: 0,
    };
    let modified = plan.delta.as_ref().map_or(&[][..], |d| &d.modified[..]);
    debug!(
        sequenced = enc.seqs.len(),
        walked = plan.walked.len(),
        modified = modified.len(),
        "sequence map built"
    );

    enc.collect_strings(&plan.walked, modified)?;
    enc.strings.optimize()?;
    enc.strings.write_table(&mut enc.streams)?;
    debug!(blocks = enc.strings.blocks().len(), "string table written");

    enc.streams
        .write_u32(StreamId::Control, len32(plan.walked.len())?);
    for &id in &plan.walked {
        enc.write_record(id)?;
    }
    enc.write_index(plan.delta.as_ref().map(|d| d.mark))?;
    if plan.delta.is_some() {
        enc.write_modifications(modified)?;
    }

    let compression = if options.level == CompressLevel::None {
        Compression::Stored
    } else {
        Compression::Zstd
    };
    let header = Header::new(plan.delta.is_some(), options.include_schema, compression);
    let mut buf = header.to_bytes().to_vec();
    if options.include_schema {
        let mut blob = Vec::new();
        ciborium::into_writer(store.schema(), &mut blob)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        buf.extend_from_slice(&len32(blob.len())?.to_le_bytes());
        buf.extend_from_slice(&blob);
    }
    let reuse = enc.seqs.to_reuse()?;
    let string_stats = enc.strings.stats();
    let (absolute, delta) = (enc.absolute, enc.delta);
    let streams = enc.streams.finish(options.level, options.strategy, &mut buf)?;
    debug!(streams = streams.len(), bytes = buf.len(), "streams written");
    out.write_all(&buf)?;

    let measurements = options.measure.then(|| Measurements {
        streams,
        records: plan.walked.len(),
        strings: string_stats,
        absolute_encodings: absolute,
        delta_encodings: delta,
        total_bytes: buf.len(),
        elapsed: plan.started.elapsed(),
    });
    Ok(SerializeOutcome {
        reuse,
        measurements,
    })
}

fn len32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CodecError::OversizedValue { len })
}

fn changed_values(
    store: &RecordStore,
    id: RecordId,
    changes: &ChangeSet,
) -> Result<Vec<(usize, Value)>> {
    match changes {
        ChangeSet::Features(offsets) => offsets
            .iter()
            .map(|&offset| -> Result<(usize, Value)> {
                Ok((offset, store.slot(id, offset)?.clone()))
            })
            .collect(),
        ChangeSet::Elements(indices) => indices
            .iter()
            .map(|&index| -> Result<(usize, Value)> { Ok((index, store.element(id, index)?)) })
            .collect(),
    }
}

struct Encoder<'a> {
    store: &'a RecordStore,
    layouts: &'a Layouts,
    seqs: SeqMap,
    streams: StreamSet,
    strings: StringOptimizer,
    memo: PrevMemo,
    mods: ModMemo,
    absolute: u64,
    delta: u64,
}

impl Encoder<'_> {
    fn collect_strings(
        &mut self,
        walked: &[RecordId],
        modified: &[(RecordId, ChangeSet)],
    ) -> Result<()> {
        let store = self.store;
        for &id in walked {
            match &store.record(id)?.body {
                RecordBody::Struct(values) => {
                    for s in values.iter().filter_map(Value::as_str) {
                        self.strings.add(s)?;
                    }
                }
                RecordBody::Array(ArrayValues::Str(items)) => {
                    for s in items.iter().flatten() {
                        self.strings.add(s)?;
                    }
                }
                RecordBody::Array(_) => {}
            }
        }
        for (id, changes) in modified {
            if self.seqs.seq_of(*id).is_none() {
                continue;
            }
            for (_, value) in changed_values(store, *id, changes)? {
                if let Some(s) = value.as_str() {
                    self.strings.add(s)?;
                }
            }
        }
        Ok(())
    }

    fn seq_for(&self, target: Option<RecordId>) -> u32 {
        let Some(id) = target else {
            return 0;
        };
        self.seqs.seq_of(id).unwrap_or_else(|| {
            warn!(record = ?id, "reference to a record outside the serialized set written as null");
            0
        })
    }

    fn put_diff(&mut self, stream: StreamId, v: i32, prev: i64) {
        let raw = diff::encode(v, prev as i32);
        if diff::is_delta(raw) {
            self.delta += 1;
        } else {
            self.absolute += 1;
        }
        self.streams.write_u64(stream, raw);
    }

    /// Writes one value; returns its memo form.
    fn put_value(&mut self, kind: SlotKind, value: &Value, prev: i64) -> Result<i64> {
        match (kind, value) {
            (SlotKind::Int, Value::Int(v)) => {
                self.put_diff(StreamId::Int, *v, prev);
                Ok(i64::from(*v))
            }
            (SlotKind::Short, Value::Short(v)) => {
                self.put_diff(StreamId::Short, i32::from(*v), prev);
                Ok(i64::from(*v))
            }
            (SlotKind::Long, Value::Long(v)) => {
                let (high, low) = diff::split_long(*v);
                let (prev_high, prev_low) = diff::split_long(prev);
                self.put_diff(StreamId::LongHigh, high, i64::from(prev_high));
                self.put_diff(StreamId::LongLow, low, i64::from(prev_low));
                Ok(*v)
            }
            (SlotKind::HeapRef, Value::Ref(target)) => {
                let seq = self.seq_for(*target) as i32;
                self.put_diff(StreamId::HeapRef, seq, prev);
                Ok(i64::from(seq))
            }
            (SlotKind::Byte, Value::Byte(v)) => {
                self.streams.write_u8(StreamId::Byte, *v as u8);
                Ok(0)
            }
            (SlotKind::Boolean, Value::Boolean(b)) => {
                self.streams.write_u8(StreamId::Byte, u8::from(*b));
                Ok(0)
            }
            (SlotKind::Float, Value::Float(f)) => {
                let packed = float::pack_f32(f.to_bits());
                self.streams
                    .write_u32(StreamId::FloatExponent, packed.exponent);
                if packed.exponent != 0 {
                    self.streams
                        .write_u64(StreamId::FloatMantissaSign, packed.mantissa_sign);
                }
                Ok(0)
            }
            (SlotKind::Double, Value::Double(d)) => {
                let packed = float::pack_f64(d.to_bits());
                self.streams
                    .write_u32(StreamId::DoubleExponent, packed.exponent);
                if packed.exponent != 0 {
                    self.streams
                        .write_u64(StreamId::DoubleMantissaSign, packed.mantissa_sign);
                }
                Ok(0)
            }
            (SlotKind::StrRef, Value::Str(s)) => {
                self.strings.write(&mut self.streams, s.as_deref())?;
                Ok(0)
            }
            (kind, value) => Err(CodecError::integrity(format!(
                "{kind:?} slot holds a {:?} value",
                value.kind()
            ))),
        }
    }

    /// Rejects role state the decoder could not rebuild.
    fn check_role(&self, id: RecordId, role: TypeRole, values: &[Value]) -> Result<()> {
        match role {
            TypeRole::Plain => Ok(()),
            TypeRole::Container { key_feature } => {
                let key = values
                    .get(key_feature)
                    .and_then(Value::as_str)
                    .ok_or_else(|| CodecError::integrity(format!("container {id:?} has no key")))?;
                if self.store.container_by_key(key) == Some(id) {
                    Ok(())
                } else {
                    Err(CodecError::integrity(format!(
                        "container {id:?} key {key:?} is registered to another record"
                    )))
                }
            }
            TypeRole::Anchored { container_feature } => {
                let target = values.get(container_feature).and_then(Value::as_ref_target);
                match target {
                    Some(container)
                        if self.seqs.seq_of(container).is_some()
                            && matches!(
                                self.store.type_of(container)?.role,
                                TypeRole::Container { .. }
                            ) =>
                    {
                        Ok(())
                    }
                    _ => Err(CodecError::integrity(format!(
                        "anchored record {id:?} does not reference a serialized container"
                    ))),
                }
            }
        }
    }

    fn write_record(&mut self, id: RecordId) -> Result<()> {
        let (store, layouts) = (self.store, self.layouts);
        let record = store.record(id)?;
        let code = record.type_code;
        self.streams.write_u32(StreamId::TypeCode, code.0);
        match (layouts.get(code)?, &record.body) {
            (Layout::Struct { slots, role, .. }, RecordBody::Struct(values)) => {
                self.check_role(id, *role, values)?;
                for (offset, (kind, value)) in slots.iter().zip(values).enumerate() {
                    let prev = self.memo.get(code, offset);
                    let num = self.put_value(*kind, value, prev)?;
                    self.memo.update(code, slots.len(), offset, *kind, num);
                }
            }
            (Layout::Array(kind), RecordBody::Array(values)) => {
                self.streams
                    .write_u32(StreamId::ArrayLength, len32(values.len())?);
                let mut prev = self.memo.get(code, 0);
                for index in 0..values.len() {
                    let value = values.get(index).ok_or_else(|| {
                        CodecError::integrity(format!("array {id:?} shrank while being written"))
                    })?;
                    let num = self.put_value(*kind, &value, prev)?;
                    if index == 0 {
                        self.memo.update(code, 1, 0, *kind, num);
                    }
                    prev = num;
                }
            }
            _ => {
                return Err(CodecError::integrity(format!(
                    "record {id:?} does not have the shape of its type"
                )))
            }
        }
        Ok(())
    }

    fn write_seq_list(&mut self, ids: impl IntoIterator<Item = RecordId>) -> Result<()> {
        let mut seqs = Vec::new();
        for id in ids {
            match self.seqs.seq_of(id) {
                Some(seq) => seqs.push(seq),
                None => warn!(record = ?id, "indexed record has no sequence number; skipped"),
            }
        }
        seqs.sort_unstable();
        seqs.dedup();
        self.streams.write_u32(StreamId::Control, len32(seqs.len())?);
        let mut prev = 0;
        for seq in seqs {
            self.streams.write_u32(StreamId::FsIndexes, seq - prev);
            prev = seq;
        }
        Ok(())
    }

    fn write_index(&mut self, mark: Option<&Mark>) -> Result<()> {
        let store = self.store;
        let views = store.index().views();
        let mut containers = Vec::new();
        for (view, state) in views.iter().enumerate() {
            let Some(container) = state.container else {
                continue;
            };
            match self.seqs.seq_of(container) {
                Some(seq) => containers.push((len32(view)?, seq)),
                None => warn!(view, "view container has no sequence number; skipped"),
            }
        }
        self.streams.write_u32(StreamId::Control, len32(views.len())?);
        self.streams
            .write_u32(StreamId::Control, len32(containers.len())?);
        for (view, seq) in containers {
            self.streams.write_u32(StreamId::Control, view);
            self.streams.write_u32(StreamId::Control, seq);
        }
        match mark {
            None => {
                for state in views {
                    self.write_seq_list(state.members.iter().copied())?;
                }
            }
            Some(mark) => {
                let mut changes = store.membership_since_mark(mark)?;
                changes.resize_with(views.len(), Default::default);
                for change in changes {
                    self.write_seq_list(change.added)?;
                    self.write_seq_list(change.removed)?;
                    self.write_seq_list(change.reindexed)?;
                }
            }
        }
        debug!(views = views.len(), "index section written");
        Ok(())
    }

    fn write_modifications(&mut self, modified: &[(RecordId, ChangeSet)]) -> Result<()> {
        let (store, layouts) = (self.store, self.layouts);
        self.streams
            .write_u32(StreamId::Control, len32(modified.len())?);
        let mut prev_seq = 0;
        for (id, changes) in modified {
            let Some(seq) = self.seqs.seq_of(*id) else {
                warn!(record = ?id, "modified record was never serialized; skipped");
                self.streams.write_u64(StreamId::FsIndexes, 0);
                continue;
            };
            let seq = seq as i32;
            self.streams
                .write_u64(StreamId::FsIndexes, diff::encode(seq, prev_seq));
            prev_seq = seq;

            let layout = layouts.get(store.record(*id)?.type_code)?;
            let values = changed_values(store, *id, changes)?;
            self.streams
                .write_u32(StreamId::FsIndexes, len32(values.len())?);
            let mut prev_index = 0;
            for (index, value) in values {
                let kind = match layout {
                    Layout::Struct { slots, .. } => {
                        slots.get(index).copied().ok_or_else(|| {
                            CodecError::integrity(format!(
                                "change log names offset {index} of record {id:?}"
                            ))
                        })?
                    }
                    Layout::Array(kind) => *kind,
                };
                self.streams
                    .write_u32(StreamId::FsIndexes, len32(index - prev_index)?);
                prev_index = index;
                let prev = self.mods.get(kind);
                let num = self.put_value(kind, &value, prev)?;
                self.mods.set(kind, num);
            }
        }
        debug!(entries = modified.len(), "modification log written");
        Ok(())
    }
}
