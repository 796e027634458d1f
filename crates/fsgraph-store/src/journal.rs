// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Marks and change tracking for delta serialization.
//!
//! A [`Mark`] draws "the line": records with a handle below it are
//! preexisting, everything created afterwards is new. While a mark is
//! active the journal records slot writes to preexisting records and view
//! membership changes. Taking a new mark or resetting the store bumps the
//! epoch and invalidates every older mark.

use std::collections::{BTreeMap, BTreeSet};

use crate::store::RecordId;

/// Snapshot boundary between preexisting and new records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    line: u32,
    epoch: u64,
}

impl Mark {
    /// First handle that counts as new.
    pub fn line(&self) -> RecordId {
        RecordId(self.line)
    }

    /// Returns `true` if `id` was created before the mark.
    pub fn is_preexisting(&self, id: RecordId) -> bool {
        id.0 < self.line
    }
}

/// Slots of one record changed since the mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    /// Feature offsets of a struct record.
    Features(BTreeSet<usize>),
    /// Element indices of an array record.
    Elements(BTreeSet<usize>),
}

impl ChangeSet {
    /// Number of changed slots.
    pub fn len(&self) -> usize {
        match self {
            Self::Features(s) | Self::Elements(s) => s.len(),
        }
    }

    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Membership changes of one view since the mark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChanges {
    /// Records added to the view.
    pub added: BTreeSet<RecordId>,
    /// Preexisting members removed from the view.
    pub removed: BTreeSet<RecordId>,
    /// Preexisting members removed and re-added (key change).
    pub reindexed: BTreeSet<RecordId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Journal {
    epoch: u64,
    line: Option<u32>,
    slots: BTreeMap<RecordId, ChangeSet>,
    views: Vec<MembershipChanges>,
}

impl Journal {
    pub(crate) fn mark(&mut self, line: u32) -> Mark {
        self.epoch += 1;
        self.line = Some(line);
        self.slots.clear();
        self.views.clear();
        Mark {
            line,
            epoch: self.epoch,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.epoch += 1;
        self.line = None;
        self.slots.clear();
        self.views.clear();
    }

    pub(crate) fn is_valid(&self, mark: &Mark) -> bool {
        self.line == Some(mark.line) && self.epoch == mark.epoch
    }

    fn tracks(&self, id: RecordId) -> bool {
        self.line.is_some_and(|line| id.0 < line)
    }

    pub(crate) fn feature_written(&mut self, id: RecordId, offset: usize) {
        if self.tracks(id) {
            if let ChangeSet::Features(set) = self
                .slots
                .entry(id)
                .or_insert_with(|| ChangeSet::Features(BTreeSet::new()))
            {
                set.insert(offset);
            }
        }
    }

    pub(crate) fn element_written(&mut self, id: RecordId, index: usize) {
        if self.tracks(id) {
            if let ChangeSet::Elements(set) = self
                .slots
                .entry(id)
                .or_insert_with(|| ChangeSet::Elements(BTreeSet::new()))
            {
                set.insert(index);
            }
        }
    }

    fn view(&mut self, view: usize) -> Option<&mut MembershipChanges> {
        self.line?;
        if self.views.len() <= view {
            self.views.resize_with(view + 1, MembershipChanges::default);
        }
        self.views.get_mut(view)
    }

    pub(crate) fn member_added(&mut self, view: usize, id: RecordId) {
        let preexisting = self.tracks(id);
        if let Some(changes) = self.view(view) {
            if preexisting && changes.removed.remove(&id) {
                changes.reindexed.insert(id);
            } else {
                changes.added.insert(id);
            }
        }
    }

    pub(crate) fn member_removed(&mut self, view: usize, id: RecordId) {
        let preexisting = self.tracks(id);
        if let Some(changes) = self.view(view) {
            changes.reindexed.remove(&id);
            if !changes.added.remove(&id) && preexisting {
                changes.removed.insert(id);
            }
        }
    }

    pub(crate) fn member_reindexed(&mut self, view: usize, id: RecordId) {
        let preexisting = self.tracks(id);
        if let Some(changes) = self.view(view) {
            if preexisting && !changes.added.contains(&id) {
                changes.reindexed.insert(id);
            }
        }
    }

    pub(crate) fn slot_changes(&self) -> Vec<(RecordId, ChangeSet)> {
        self.slots
            .iter()
            .map(|(id, changes)| (*id, changes.clone()))
            .collect()
    }

    pub(crate) fn membership_changes(&self, views: usize) -> Vec<MembershipChanges> {
        let mut out = self.views.clone();
        out.resize_with(views.max(out.len()), MembershipChanges::default);
        out
    }
}
