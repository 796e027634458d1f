// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Index views: per-view membership sets and container bindings.

use std::collections::BTreeSet;

use crate::store::RecordId;

/// One index view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    /// Container (sofa) record this view is bound to.
    pub container: Option<RecordId>,
    /// Indexed records, ordered by handle.
    pub members: BTreeSet<RecordId>,
}

/// Ordered list of views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRepository {
    views: Vec<View>,
}

impl IndexRepository {
    /// All views in order.
    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns `true` when no views exist.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// View at `index`.
    pub fn view(&self, index: usize) -> Option<&View> {
        self.views.get(index)
    }

    pub(crate) fn view_mut(&mut self, index: usize) -> Option<&mut View> {
        self.views.get_mut(index)
    }

    /// Grows the repository to at least `count` views.
    pub(crate) fn ensure(&mut self, count: usize) {
        if self.views.len() < count {
            self.views.resize_with(count, View::default);
        }
    }

    /// Views currently holding `id`.
    pub fn views_containing(&self, id: RecordId) -> Vec<usize> {
        self.views
            .iter()
            .enumerate()
            .filter(|(_, view)| view.members.contains(&id))
            .map(|(i, _)| i)
            .collect()
    }

    /// Index roots: view containers first, then members, view by view.
    pub fn roots(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.views
            .iter()
            .filter_map(|view| view.container)
            .chain(self.views.iter().flat_map(|view| view.members.iter().copied()))
    }

    pub(crate) fn clear(&mut self) {
        self.views.clear();
    }
}
