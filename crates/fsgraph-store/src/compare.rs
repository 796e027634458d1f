// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Structural comparison of two stores.
//!
//! Stores are compared over their reachable records, paired up by position
//! in creation order. References are compared by the position of their
//! target, so two graphs with the same topology compare equal regardless of
//! the handles each store assigned.

use std::collections::HashMap;

use thiserror::Error;

use crate::store::{RecordBody, RecordId, RecordStore};
use crate::value::{ArrayValues, Value};

/// First difference found between two stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Divergence {
    /// Different number of compared records.
    #[error("reachable record count differs: {left} vs {right}")]
    RecordCount {
        /// Left count.
        left: usize,
        /// Right count.
        right: usize,
    },
    /// Records at the same position have different type names.
    #[error("record {position}: type {left} vs {right}")]
    Type {
        /// Position in creation order.
        position: usize,
        /// Left type name.
        left: String,
        /// Right type name.
        right: String,
    },
    /// Slot or element values differ.
    #[error("record {position} slot {slot}: {detail}")]
    Slot {
        /// Position in creation order.
        position: usize,
        /// Feature offset or element index.
        slot: usize,
        /// Human-readable difference.
        detail: String,
    },
    /// Array lengths differ.
    #[error("record {position}: array length {left} vs {right}")]
    ArrayLength {
        /// Position in creation order.
        position: usize,
        /// Left length.
        left: usize,
        /// Right length.
        right: usize,
    },
    /// View count, membership or container binding differs.
    #[error("view {view}: {detail}")]
    View {
        /// View index.
        view: usize,
        /// Human-readable difference.
        detail: String,
    },
}

/// Compares the reachable graphs of `left` and `right`.
pub fn compare_reachable(left: &RecordStore, right: &RecordStore) -> Result<(), Divergence> {
    compare_ordered(
        left,
        &left.reachable_in_creation_order(),
        right,
        &right.reachable_in_creation_order(),
    )
}

/// Compares two stores over explicit record orders, e.g. the sequence
/// order of a serialization call on each side.
pub fn compare_ordered(
    left: &RecordStore,
    l_ids: &[RecordId],
    right: &RecordStore,
    r_ids: &[RecordId],
) -> Result<(), Divergence> {
    if l_ids.len() != r_ids.len() {
        return Err(Divergence::RecordCount {
            left: l_ids.len(),
            right: r_ids.len(),
        });
    }
    let l_pos: HashMap<RecordId, usize> = l_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let r_pos: HashMap<RecordId, usize> = r_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let same_target = |a: Option<RecordId>, b: Option<RecordId>| match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => l_pos.get(&a).is_some() && l_pos.get(&a) == r_pos.get(&b),
        _ => false,
    };

    for (position, (&l, &r)) in l_ids.iter().zip(r_ids).enumerate() {
        let (Ok(l_rec), Ok(r_rec)) = (left.record(l), right.record(r)) else {
            continue;
        };
        let l_name = type_name(left, l);
        let r_name = type_name(right, r);
        if l_name != r_name {
            return Err(Divergence::Type {
                position,
                left: l_name,
                right: r_name,
            });
        }
        match (&l_rec.body, &r_rec.body) {
            (RecordBody::Struct(lv), RecordBody::Struct(rv)) => {
                for (slot, (a, b)) in lv.iter().zip(rv).enumerate() {
                    let equal = match (a, b) {
                        (Value::Ref(x), Value::Ref(y)) => same_target(*x, *y),
                        _ => a.same_scalar(b),
                    };
                    if !equal {
                        return Err(Divergence::Slot {
                            position,
                            slot,
                            detail: format!("{a:?} vs {b:?}"),
                        });
                    }
                }
            }
            (RecordBody::Array(la), RecordBody::Array(ra)) => {
                if la.len() != ra.len() {
                    return Err(Divergence::ArrayLength {
                        position,
                        left: la.len(),
                        right: ra.len(),
                    });
                }
                compare_arrays(position, la, ra, &same_target)?;
            }
            _ => {
                return Err(Divergence::Slot {
                    position,
                    slot: 0,
                    detail: "struct vs array".to_owned(),
                })
            }
        }
    }

    let l_views = left.index().views();
    let r_views = right.index().views();
    if l_views.len() != r_views.len() {
        return Err(Divergence::View {
            view: l_views.len().min(r_views.len()),
            detail: format!("view count {} vs {}", l_views.len(), r_views.len()),
        });
    }
    for (view, (lv, rv)) in l_views.iter().zip(r_views).enumerate() {
        if !same_target(lv.container, rv.container) {
            return Err(Divergence::View {
                view,
                detail: "container differs".to_owned(),
            });
        }
        let mut l_members: Vec<Option<usize>> =
            lv.members.iter().map(|id| l_pos.get(id).copied()).collect();
        let mut r_members: Vec<Option<usize>> =
            rv.members.iter().map(|id| r_pos.get(id).copied()).collect();
        l_members.sort_unstable();
        r_members.sort_unstable();
        if l_members != r_members {
            return Err(Divergence::View {
                view,
                detail: format!("members {l_members:?} vs {r_members:?}"),
            });
        }
    }
    Ok(())
}

fn type_name(store: &RecordStore, id: RecordId) -> String {
    store
        .type_of(id)
        .map_or_else(|_| String::from("?"), |def| def.name.clone())
}

fn compare_arrays(
    position: usize,
    left: &ArrayValues,
    right: &ArrayValues,
    same_target: &dyn Fn(Option<RecordId>, Option<RecordId>) -> bool,
) -> Result<(), Divergence> {
    for slot in 0..left.len() {
        let (a, b) = (left.get(slot), right.get(slot));
        let equal = match (&a, &b) {
            (Some(Value::Ref(x)), Some(Value::Ref(y))) => same_target(*x, *y),
            (Some(x), Some(y)) => x.same_scalar(y),
            _ => false,
        };
        if !equal {
            return Err(Divergence::Slot {
                position,
                slot,
                detail: format!("{a:?} vs {b:?}"),
            });
        }
    }
    Ok(())
}
