// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Change tracking between a mark and the next delta.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fsgraph_store::{
    compare_ordered, compare_reachable, ChangeSet, FeatureDef, RecordStore, StoreError, TypeCode,
    TypeSystemBuilder, Value, ValueKind,
};
use proptest::prelude::*;

fn store() -> (RecordStore, TypeCode, TypeCode) {
    let mut b = TypeSystemBuilder::new();
    let node = b
        .struct_type(
            "Node",
            vec![
                FeatureDef::new("v", ValueKind::Int),
                FeatureDef::new("next", ValueKind::Ref),
                FeatureDef::new("k", ValueKind::Str).key(),
            ],
        )
        .unwrap();
    let ints = b.array_type("Int[]", ValueKind::Int).unwrap();
    (RecordStore::new(Arc::new(b.build())), node, ints)
}

#[test]
fn only_preexisting_writes_are_tracked() {
    let (mut store, node, ints) = store();
    let old = store.create_record(node).unwrap();
    let arr = store.create_array(ints, 3).unwrap();
    let mark = store.mark();
    let new = store.create_record(node).unwrap();
    store.set_slot(new, 0, Value::Int(1)).unwrap();
    store.set_slot(old, 0, Value::Int(2)).unwrap();
    store.set_slot(old, 0, Value::Int(3)).unwrap();
    store.set_element(arr, 2, Value::Int(4)).unwrap();

    let changes = store.modified_since_mark(&mark).unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].0, old);
    assert_eq!(changes[0].1, ChangeSet::Features([0].into()));
    assert_eq!(changes[1].0, arr);
    assert_eq!(changes[1].1, ChangeSet::Elements([2].into()));
    assert!(mark.is_preexisting(old));
    assert!(!mark.is_preexisting(new));
}

#[test]
fn new_mark_invalidates_the_old_one() {
    let (mut store, node, _) = store();
    store.create_record(node).unwrap();
    let first = store.mark();
    let second = store.mark();
    assert!(!store.is_valid_mark(&first));
    assert!(store.is_valid_mark(&second));
    assert_eq!(
        store.modified_since_mark(&first).unwrap_err(),
        StoreError::StaleMark
    );
    store.reset();
    assert!(!store.is_valid_mark(&second));
}

#[test]
fn membership_changes_cancel_out() {
    let (mut store, node, _) = store();
    let view = store.add_view();
    let old = store.create_record(node).unwrap();
    store.add_to_view(view, old).unwrap();
    let mark = store.mark();

    let new = store.create_record(node).unwrap();
    store.add_to_view(view, new).unwrap();
    store.remove_from_view(view, new).unwrap();
    store.remove_from_view(view, old).unwrap();
    store.add_to_view(view, old).unwrap();

    let changes = &store.membership_since_mark(&mark).unwrap()[view];
    assert!(changes.added.is_empty());
    assert!(changes.removed.is_empty());
    assert!(changes.reindexed.contains(&old));
}

#[test]
fn key_writes_reindex_members() {
    let (mut store, node, _) = store();
    let view = store.add_view();
    let id = store.create_record(node).unwrap();
    store.add_to_view(view, id).unwrap();
    let mark = store.mark();
    store.set_slot(id, 0, Value::Int(5)).unwrap();
    assert!(store.membership_since_mark(&mark).unwrap()[view]
        .reindexed
        .is_empty());
    store
        .set_slot(id, 2, Value::Str(Some("k".to_owned())))
        .unwrap();
    assert!(store.membership_since_mark(&mark).unwrap()[view]
        .reindexed
        .contains(&id));
}

#[test]
fn explicit_order_overrides_creation_order() {
    let (mut left, node, _) = store();
    let lv = left.add_view();
    let a = left.create_record(node).unwrap();
    let b = left.create_record(node).unwrap();
    left.set_slot(a, 0, Value::Int(1)).unwrap();
    left.set_slot(b, 1, Value::Ref(Some(a))).unwrap();
    left.add_to_view(lv, b).unwrap();

    let (mut right, _, _) = store();
    let rv = right.add_view();
    let rb = right.create_record(node).unwrap();
    let ra = right.create_record(node).unwrap();
    right.set_slot(ra, 0, Value::Int(1)).unwrap();
    right.set_slot(rb, 1, Value::Ref(Some(ra))).unwrap();
    right.add_to_view(rv, rb).unwrap();

    assert!(compare_reachable(&left, &right).is_err());
    compare_ordered(&left, &[a, b], &right, &[ra, rb]).unwrap();
}

proptest! {
    #[test]
    fn tracked_offsets_match_writes(
        writes in prop::collection::vec((0usize..4, 0usize..3, any::<i32>()), 0..32)
    ) {
        let (mut store, node, _) = store();
        let ids: Vec<_> = (0..4).map(|_| store.create_record(node).unwrap()).collect();
        let mark = store.mark();
        let mut expected = BTreeMap::<usize, BTreeSet<usize>>::new();
        for (record, offset, v) in &writes {
            let value = match offset {
                0 => Value::Int(*v),
                1 => Value::Ref(Some(ids[v.unsigned_abs() as usize % ids.len()])),
                _ => Value::Str(Some(v.to_string())),
            };
            store.set_slot(ids[*record], *offset, value).unwrap();
            expected.entry(*record).or_default().insert(*offset);
        }
        let changes = store.modified_since_mark(&mark).unwrap();
        prop_assert_eq!(changes.len(), expected.len());
        for ((id, set), (record, offsets)) in changes.iter().zip(&expected) {
            prop_assert_eq!(*id, ids[*record]);
            prop_assert_eq!(set, &ChangeSet::Features(offsets.clone()));
        }
    }
}
