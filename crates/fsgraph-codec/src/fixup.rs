// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deferred reference assignment for forward references.
//!
//! A reference read from the stream names its target by sequence number.
//! When that number is already bound the reference is applied on the spot;
//! otherwise the intent is queued and executed once every record of the
//! call exists, in the order it was queued.

use fsgraph_store::{RecordId, RecordStore, Value};

use crate::error::{CodecError, Result};
use crate::seq::SeqMap;

/// One reference assignment whose target may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fixup {
    /// Reference feature of a struct record.
    SetSlot {
        owner: RecordId,
        offset: usize,
        target_seq: u32,
    },
    /// Element of a reference array.
    SetElement {
        owner: RecordId,
        index: usize,
        target_seq: u32,
    },
    /// Container binding of an index view.
    SetViewContainer { view: usize, target_seq: u32 },
}

impl Fixup {
    fn target_seq(self) -> u32 {
        match self {
            Self::SetSlot { target_seq, .. }
            | Self::SetElement { target_seq, .. }
            | Self::SetViewContainer { target_seq, .. } => target_seq,
        }
    }

    fn apply(self, store: &mut RecordStore, target: Option<RecordId>) -> Result<()> {
        match self {
            Self::SetSlot { owner, offset, .. } => {
                store.restore_slot(owner, offset, Value::Ref(target))?;
            }
            Self::SetElement { owner, index, .. } => {
                store.restore_element(owner, index, Value::Ref(target))?;
            }
            Self::SetViewContainer { view, .. } => store.set_view_container(view, target)?,
        }
        Ok(())
    }
}

/// Queue of fixups whose targets were unbound when they were read.
#[derive(Debug, Default)]
pub(crate) struct FixupQueue {
    pending: Vec<Fixup>,
}

impl FixupQueue {
    /// Applies `fixup` now if its target is null or bound, else queues it.
    pub(crate) fn resolve(
        &mut self,
        store: &mut RecordStore,
        seqs: &SeqMap,
        fixup: Fixup,
    ) -> Result<()> {
        match fixup.target_seq() {
            0 => fixup.apply(store, None),
            seq => match seqs.record_of(seq) {
                Some(target) => fixup.apply(store, Some(target)),
                None => {
                    self.pending.push(fixup);
                    Ok(())
                }
            },
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Executes every queued fixup in queue order.
    ///
    /// A target still unbound at this point is an integrity violation.
    pub(crate) fn run(self, store: &mut RecordStore, seqs: &SeqMap) -> Result<()> {
        for fixup in self.pending {
            let seq = fixup.target_seq();
            let target = seqs.record_of(seq).ok_or_else(|| {
                CodecError::integrity(format!(
                    "reference to sequence number {seq} never materialized"
                ))
            })?;
            fixup.apply(store, Some(target))?;
        }
        Ok(())
    }
}
