// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sequence numbers: dense, origin-1 wire identities of records.

use fsgraph_store::{RecordId, RecordStore};

use crate::error::{CodecError, Result};

/// Sequence tables kept from one call for a later delta call on the same
/// store.
///
/// Entry `i` is the record that carried sequence number `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReuseInfo {
    records: Vec<RecordId>,
}

impl ReuseInfo {
    /// Number of sequenced records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record was sequenced.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record that carried `seq`.
    pub fn record_for_seq(&self, seq: u32) -> Option<RecordId> {
        let index = usize::try_from(seq).ok()?.checked_sub(1)?;
        self.records.get(index).copied()
    }

    /// Records in sequence order.
    pub fn records(&self) -> &[RecordId] {
        &self.records
    }
}

/// Both directions of the sequence mapping for one call.
#[derive(Debug, Default)]
pub(crate) struct SeqMap {
    /// Indexed by record handle; 0 = unsequenced.
    to_seq: Vec<u32>,
    /// Indexed by `seq - 1`; `None` while the record is not yet created.
    to_record: Vec<Option<RecordId>>,
}

impl SeqMap {
    /// Seeds the map with the records of a previous call.
    pub(crate) fn from_reuse(reuse: &ReuseInfo, store: &RecordStore) -> Result<Self> {
        let mut map = Self {
            to_seq: vec![0; store.len()],
            to_record: Vec::with_capacity(reuse.len()),
        };
        for &id in reuse.records() {
            if store.record(id).is_err() {
                return Err(CodecError::integrity(format!(
                    "reuse info names record {id:?} missing from the store"
                )));
            }
            let seq = map.reserve()?;
            map.bind(seq, id)?;
        }
        Ok(map)
    }

    /// Number of sequence numbers handed out.
    pub(crate) fn len(&self) -> usize {
        self.to_record.len()
    }

    /// Reserves the next sequence number without a record.
    pub(crate) fn reserve(&mut self) -> Result<u32> {
        let seq = u32::try_from(self.to_record.len() + 1)
            .ok()
            .filter(|seq| i32::try_from(*seq).is_ok())
            .ok_or_else(|| CodecError::integrity("sequence number space exhausted"))?;
        self.to_record.push(None);
        Ok(seq)
    }

    /// Assigns the next sequence number to `id`.
    pub(crate) fn assign(&mut self, id: RecordId) -> Result<u32> {
        let seq = self.reserve()?;
        self.bind(seq, id)?;
        Ok(seq)
    }

    /// Binds a reserved sequence number to a record.
    pub(crate) fn bind(&mut self, seq: u32, id: RecordId) -> Result<()> {
        let slot = (seq as usize)
            .checked_sub(1)
            .and_then(|i| self.to_record.get_mut(i))
            .ok_or_else(|| CodecError::integrity(format!("sequence number {seq} not reserved")))?;
        *slot = Some(id);
        if self.to_seq.len() <= id.index() {
            self.to_seq.resize(id.index() + 1, 0);
        }
        self.to_seq[id.index()] = seq;
        Ok(())
    }

    /// Sequence number of `id`, if it has one.
    pub(crate) fn seq_of(&self, id: RecordId) -> Option<u32> {
        self.to_seq.get(id.index()).copied().filter(|seq| *seq != 0)
    }

    /// Record currently bound to `seq`.
    pub(crate) fn record_of(&self, seq: u32) -> Option<RecordId> {
        let index = (seq as usize).checked_sub(1)?;
        self.to_record.get(index).copied().flatten()
    }

    /// Snapshot of the mapping; fails if any reserved number is unbound.
    pub(crate) fn to_reuse(&self) -> Result<ReuseInfo> {
        let records = self
            .to_record
            .iter()
            .enumerate()
            .map(|(i, id)| {
                id.ok_or_else(|| {
                    CodecError::integrity(format!("sequence number {} never bound", i + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ReuseInfo { records })
    }
}
