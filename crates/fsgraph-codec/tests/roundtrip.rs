// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Full serialize/deserialize cycles over every value kind and record role.

mod common;

use common::*;
use fsgraph_codec::{
    deserialize, serialize, CodecError, CompressLevel, CompressStrategy, DeserializeOptions,
    SerializeOptions,
};
use fsgraph_store::{RecordBody, RecordId, RecordStore, StoreError, TypeCode, Value};
use proptest::prelude::*;

#[test]
fn empty_store_roundtrips() {
    let fx = fixture();
    let store = fx.store();
    let (target, sent, received) = roundtrip(&store, &SerializeOptions::default());
    assert!(target.is_empty());
    assert!(sent.reuse.is_empty());
    assert!(!received.delta);
    assert_eq!(received.created, 0);
}

#[test]
fn linked_nodes_keep_topology() {
    let fx = fixture();
    let mut store = fx.store();
    let ids = fx.chain(&mut store, &[10, 20, 30]);
    let (target, sent, received) = roundtrip(&store, &stored());
    assert_same_graph(&store, &target);
    assert_eq!(sent.reuse.len(), 3);
    assert_eq!(received.created, 3);

    let head = received.reuse.record_for_seq(1).unwrap();
    assert_eq!(target.slot(head, NODE_VALUE).unwrap(), &Value::Int(10));
    let second = target.slot(head, NODE_NEXT).unwrap().as_ref_target().unwrap();
    assert_eq!(target.slot(second, NODE_VALUE).unwrap(), &Value::Int(20));
    assert_eq!(sent.reuse.record_for_seq(1), Some(ids[0]));
}

#[test]
fn forward_and_cyclic_references_resolve() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let a = fx.node(&mut store, 1, None, Some("a"));
    let b = fx.node(&mut store, 2, Some(a), Some("b"));
    // a (seq 1) points forward at b (seq 2); b points back at a.
    store.set_slot(a, NODE_NEXT, Value::Ref(Some(b))).unwrap();
    store.set_slot(b, NODE_NEXT, Value::Ref(Some(a))).unwrap();
    store.add_to_view(view, a).unwrap();

    let (target, _, received) = roundtrip(&store, &stored());
    assert_same_graph(&store, &target);
    let ra = received.reuse.record_for_seq(1).unwrap();
    let rb = received.reuse.record_for_seq(2).unwrap();
    assert_eq!(target.slot(ra, NODE_NEXT).unwrap(), &Value::Ref(Some(rb)));
    assert_eq!(target.slot(rb, NODE_NEXT).unwrap(), &Value::Ref(Some(ra)));
}

#[test]
fn unreachable_records_are_not_written() {
    let fx = fixture();
    let mut store = fx.store();
    fx.chain(&mut store, &[1, 2]);
    fx.node(&mut store, 99, None, Some("orphan"));
    let (target, sent, _) = roundtrip(&store, &stored());
    assert_eq!(sent.reuse.len(), 2);
    assert_eq!(target.len(), 2);
    assert_same_graph(&store, &target);
}

fn scalars(fx: &Fixture, store: &mut RecordStore, values: [Value; 9]) -> RecordId {
    let id = store.create_record(fx.scalars).unwrap();
    for (offset, value) in values.into_iter().enumerate() {
        store.set_slot(id, offset, value).unwrap();
    }
    id
}

#[test]
fn extreme_scalars_survive_bit_exact() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let low = scalars(
        &fx,
        &mut store,
        [
            Value::Int(i32::MIN),
            Value::Short(i16::MIN),
            Value::Byte(i8::MIN),
            Value::Boolean(false),
            Value::Float(-0.0),
            Value::Double(f64::NEG_INFINITY),
            Value::Long(i64::MIN),
            Value::Str(Some(String::new())),
            Value::Ref(None),
        ],
    );
    let high = scalars(
        &fx,
        &mut store,
        [
            Value::Int(i32::MAX),
            Value::Short(i16::MAX),
            Value::Byte(i8::MAX),
            Value::Boolean(true),
            Value::Float(f32::from_bits(0x7fc0_1234)),
            Value::Double(f64::from_bits(1)),
            Value::Long(i64::MAX),
            Value::Str(None),
            Value::Ref(Some(low)),
        ],
    );
    let mid = scalars(
        &fx,
        &mut store,
        [
            Value::Int(0),
            Value::Short(-1),
            Value::Byte(0),
            Value::Boolean(true),
            Value::Float(f32::INFINITY),
            Value::Double(f64::NAN),
            Value::Long(-1),
            Value::Str(Some("héllo wörld".to_owned())),
            Value::Ref(Some(high)),
        ],
    );
    for id in [low, high, mid] {
        store.add_to_view(view, id).unwrap();
    }

    for options in [stored(), SerializeOptions::default()] {
        let (target, _, received) = roundtrip(&store, &options);
        assert_same_graph(&store, &target);
        let rhigh = received.reuse.record_for_seq(2).unwrap();
        let Value::Float(f) = target.slot(rhigh, 4).unwrap() else {
            panic!("float slot lost its kind");
        };
        assert_eq!(f.to_bits(), 0x7fc0_1234);
        let rlow = received.reuse.record_for_seq(1).unwrap();
        let Value::Float(z) = target.slot(rlow, 4).unwrap() else {
            panic!("float slot lost its kind");
        };
        assert_eq!(z.to_bits(), (-0.0f32).to_bits());
    }
}

#[test]
fn null_and_empty_strings_stay_distinct() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let names = [None, Some(""), Some("abc"), Some("ab"), Some(""), None, Some("abc")];
    for (i, name) in names.iter().enumerate() {
        let id = fx.node(&mut store, i32::try_from(i).unwrap(), None, *name);
        store.add_to_view(view, id).unwrap();
    }
    let (target, _, received) = roundtrip(&store, &stored());
    assert_same_graph(&store, &target);
    for (i, name) in names.iter().enumerate() {
        let id = received
            .reuse
            .record_for_seq(u32::try_from(i + 1).unwrap())
            .unwrap();
        assert_eq!(
            target.slot(id, NODE_NAME).unwrap().as_str(),
            *name,
            "node {i}"
        );
    }
}

#[test]
fn arrays_of_every_kind_roundtrip() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let target_node = fx.node(&mut store, 5, None, Some("t"));
    let contents: Vec<(TypeCode, Vec<Value>)> = vec![
        (
            fx.ints,
            vec![1000, 1001, 1003, 0, i32::MIN, -7]
                .into_iter()
                .map(Value::Int)
                .collect(),
        ),
        (fx.ints, Vec::new()),
        (fx.shorts, vec![Value::Short(i16::MIN), Value::Short(3)]),
        (fx.bytes, vec![Value::Byte(-1), Value::Byte(0), Value::Byte(127)]),
        (fx.bools, vec![Value::Boolean(true), Value::Boolean(false)]),
        (fx.floats, vec![Value::Float(0.0), Value::Float(-1.5), Value::Float(f32::NAN)]),
        (fx.doubles, vec![Value::Double(1e300), Value::Double(-0.0)]),
        (fx.longs, vec![Value::Long(1 << 40), Value::Long(-(1 << 40)), Value::Long(0)]),
        (
            fx.strs,
            vec![
                Value::Str(Some("x".to_owned())),
                Value::Str(None),
                Value::Str(Some("x".to_owned())),
            ],
        ),
        (
            fx.refs,
            vec![Value::Ref(Some(target_node)), Value::Ref(None)],
        ),
        (fx.ints, vec![Value::Int(1002), Value::Int(1004)]),
    ];
    let mut arrays = Vec::new();
    for (code, values) in &contents {
        let id = store.create_array(*code, values.len()).unwrap();
        for (i, v) in values.iter().enumerate() {
            store.set_element(id, i, v.clone()).unwrap();
        }
        store.add_to_view(view, id).unwrap();
        arrays.push(id);
    }

    let (target, sent, received) = roundtrip(&store, &SerializeOptions::default());
    assert_same_graph(&store, &target);
    assert_same_by_seq(&store, &sent, &target, &received);
    let position = sent.reuse.records().iter().position(|id| *id == arrays[1]).unwrap();
    let empty = received
        .reuse
        .record_for_seq(u32::try_from(position + 1).unwrap())
        .unwrap();
    assert_eq!(target.array_len(empty).unwrap(), 0);
}

#[test]
fn containers_and_anchored_records_rebind() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let sofa = store.create_container(fx.sofa, "doc-1").unwrap();
    store
        .set_slot(sofa, 1, Value::Str(Some("the quick brown fox".to_owned())))
        .unwrap();
    store.set_view_container(view, Some(sofa)).unwrap();
    for (begin, end) in [(0, 3), (4, 9), (10, 15)] {
        let ann = store.create_anchored(fx.annotation, sofa).unwrap();
        store.set_slot(ann, ANN_BEGIN, Value::Int(begin)).unwrap();
        store.set_slot(ann, ANN_END, Value::Int(end)).unwrap();
        store.add_to_view(view, ann).unwrap();
    }

    let (target, _, _) = roundtrip(&store, &stored());
    assert_same_graph(&store, &target);
    let rsofa = target.container_by_key("doc-1").unwrap();
    assert_eq!(target.anchored_to(rsofa).count(), 3);
    assert_eq!(target.index().view(0).unwrap().container, Some(rsofa));
}

#[test]
fn anchored_record_before_its_container_waits() {
    let fx = fixture();
    let mut store = fx.store();
    let view = store.add_view();
    let first = store.create_container(fx.sofa, "first").unwrap();
    let ann = store.create_anchored(fx.annotation, first).unwrap();
    store.set_slot(ann, ANN_END, Value::Int(4)).unwrap();
    let later = store.create_container(fx.sofa, "later").unwrap();
    // Re-anchoring makes the annotation precede its container in the walk.
    store.set_slot(ann, ANN_SOFA, Value::Ref(Some(later))).unwrap();
    store.add_to_view(view, ann).unwrap();

    let (target, sent, received) = roundtrip(&store, &stored());
    assert_eq!(sent.reuse.records(), &[ann, later]);
    assert_same_by_seq(&store, &sent, &target, &received);
    assert!(target.container_by_key("first").is_none());
    let rlater = target.container_by_key("later").unwrap();
    let rann = received.reuse.record_for_seq(1).unwrap();
    assert_eq!(target.anchored_to(rlater).collect::<Vec<_>>(), vec![rann]);
    // The container was created first on the decode side.
    assert!(rlater < rann);
}

/// Container "a", container "b" and a plain node, plus an annotation on
/// "a", all in view 0.
fn role_graph(fx: &Fixture) -> (RecordStore, [RecordId; 4]) {
    let mut store = fx.store();
    let view = store.add_view();
    let a = store.create_container(fx.sofa, "a").unwrap();
    let b = store.create_container(fx.sofa, "b").unwrap();
    let plain = fx.node(&mut store, 1, None, None);
    let ann = store.create_anchored(fx.annotation, a).unwrap();
    for id in [a, b, plain, ann] {
        store.add_to_view(view, id).unwrap();
    }
    (store, [a, b, plain, ann])
}

#[test]
fn role_writes_that_cannot_roundtrip_are_refused() {
    let fx = fixture();
    let (mut store, [a, b, plain, ann]) = role_graph(&fx);
    assert_eq!(
        store.set_slot(b, 0, Value::Str(None)),
        Err(StoreError::MissingContainerKey(b))
    );
    assert_eq!(
        store.set_slot(b, 0, Value::Str(Some("a".into()))),
        Err(StoreError::DuplicateContainer("a".into()))
    );
    assert_eq!(
        store.set_slot(ann, ANN_SOFA, Value::Ref(None)),
        Err(StoreError::MissingContainer(ann))
    );
    assert_eq!(
        store.set_slot(ann, ANN_SOFA, Value::Ref(Some(plain))),
        Err(StoreError::NotAContainer(plain))
    );

    let (target, _, received) = roundtrip(&store, &stored());
    assert_same_graph(&store, &target);
    let ra = target.container_by_key("a").unwrap();
    let rann = received.reuse.record_for_seq(4).unwrap();
    assert_eq!(target.anchored_to(ra).collect::<Vec<_>>(), vec![rann]);
    assert_eq!(store.anchored_to(a).collect::<Vec<_>>(), vec![ann]);
}

#[test]
fn broken_roles_fail_before_any_bytes_are_written() {
    let fx = fixture();
    let cases: [(&str, fn(&mut RecordStore, [RecordId; 4])); 4] = [
        ("container key cleared", |store, [_, b, _, _]| {
            store.restore_slot(b, 0, Value::Str(None)).unwrap();
        }),
        ("container key taken", |store, [_, b, _, _]| {
            store.restore_slot(b, 0, Value::Str(Some("a".into()))).unwrap();
        }),
        ("anchor cleared", |store, [_, _, _, ann]| {
            store.restore_slot(ann, ANN_SOFA, Value::Ref(None)).unwrap();
        }),
        ("anchor on a plain record", |store, [_, _, plain, ann]| {
            store
                .restore_slot(ann, ANN_SOFA, Value::Ref(Some(plain)))
                .unwrap();
        }),
    ];
    for (name, break_roles) in cases {
        let (mut store, ids) = role_graph(&fx);
        break_roles(&mut store, ids);
        for options in [stored(), SerializeOptions::default()] {
            let mut bytes = Vec::new();
            let err = serialize(&store, &mut bytes, &options).unwrap_err();
            assert!(matches!(err, CodecError::IntegrityViolation { .. }), "{name}: {err}");
            assert!(bytes.is_empty(), "{name}");
        }
    }
}

#[test]
fn full_decode_replaces_previous_content() {
    let fx = fixture();
    let mut store = fx.store();
    fx.chain(&mut store, &[1]);
    let (bytes, _) = encode(&store, &stored());

    let mut target = fx.store();
    fx.chain(&mut target, &[7, 8, 9]);
    deserialize(&mut target, &bytes, None, &DeserializeOptions::default()).unwrap();
    assert_eq!(target.len(), 1);
    assert_same_graph(&store, &target);
}

#[test]
fn every_level_and_strategy_decodes() {
    let fx = fixture();
    let mut store = fx.store();
    let values: Vec<i32> = (0..200).map(|i| i * 3 - 100).collect();
    fx.chain(&mut store, &values);
    let levels = [
        CompressLevel::None,
        CompressLevel::Fast,
        CompressLevel::Default,
        CompressLevel::Best,
    ];
    let strategies = [
        CompressStrategy::Default,
        CompressStrategy::Fast,
        CompressStrategy::Lazy,
        CompressStrategy::Optimal,
    ];
    for level in levels {
        for strategy in strategies {
            let options = SerializeOptions {
                level,
                strategy,
                ..SerializeOptions::default()
            };
            let (target, _, _) = roundtrip(&store, &options);
            assert_same_graph(&store, &target);
        }
    }
}

#[test]
fn identical_stores_encode_identically() {
    let fx = fixture();
    let build = || {
        let mut store = fx.store();
        fx.chain(&mut store, &[3, 1, 4, 1, 5, 9, 2, 6]);
        store
    };
    let (a, _) = encode(&build(), &SerializeOptions::default());
    let (b, _) = encode(&build(), &SerializeOptions::default());
    assert_eq!(a, b);
}

#[test]
fn struct_bodies_match_after_decode() {
    let fx = fixture();
    let mut store = fx.store();
    fx.chain(&mut store, &[42]);
    let (target, _, received) = roundtrip(&store, &stored());
    let id = received.reuse.record_for_seq(1).unwrap();
    let RecordBody::Struct(values) = &target.record(id).unwrap().body else {
        panic!("node decoded as an array");
    };
    assert_eq!(
        values,
        &vec![Value::Int(42), Value::Ref(None), Value::Str(Some("n0".to_owned()))]
    );
}

proptest! {
    #[test]
    fn generated_graphs_roundtrip(specs in arb_nodes(), level in prop_oneof![
        Just(CompressLevel::None),
        Just(CompressLevel::Fast),
    ]) {
        let fx = fixture();
        let store = build_nodes(&fx, &specs);
        let options = SerializeOptions { level, ..SerializeOptions::default() };
        let (target, sent, received) = roundtrip(&store, &options);
        prop_assert_eq!(sent.reuse.len(), received.reuse.len());
        prop_assert!(fsgraph_store::compare_reachable(&store, &target).is_ok());
    }
}
