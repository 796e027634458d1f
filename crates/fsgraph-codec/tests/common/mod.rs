// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::Arc;

use fsgraph_codec::{
    deserialize, serialize, CompressLevel, DeserializeOptions, DeserializeOutcome,
    SerializeOptions, SerializeOutcome,
};
use fsgraph_store::{
    compare_ordered, compare_reachable, FeatureDef, RecordId, RecordStore, TypeCode, TypeSystem,
    TypeSystemBuilder, Value, ValueKind,
};
use proptest::prelude::*;

/// Type codes of the shared test schema.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub schema: Arc<TypeSystem>,
    /// `value: Int, next: Ref, name: Str (key)`
    pub node: TypeCode,
    /// One feature of every value kind, in `ValueKind` order.
    pub scalars: TypeCode,
    pub ints: TypeCode,
    pub shorts: TypeCode,
    pub bytes: TypeCode,
    pub bools: TypeCode,
    pub floats: TypeCode,
    pub doubles: TypeCode,
    pub longs: TypeCode,
    pub strs: TypeCode,
    pub refs: TypeCode,
    /// Container keyed by `id`; `text` is a second string.
    pub sofa: TypeCode,
    /// Anchored at `sofa`, with `begin` and `end` offsets.
    pub annotation: TypeCode,
}

pub const NODE_VALUE: usize = 0;
pub const NODE_NEXT: usize = 1;
pub const NODE_NAME: usize = 2;

pub const ANN_SOFA: usize = 0;
pub const ANN_BEGIN: usize = 1;
pub const ANN_END: usize = 2;

pub fn fixture() -> Fixture {
    let mut b = TypeSystemBuilder::new();
    let node = b
        .struct_type(
            "Node",
            vec![
                FeatureDef::new("value", ValueKind::Int),
                FeatureDef::new("next", ValueKind::Ref),
                FeatureDef::new("name", ValueKind::Str).key(),
            ],
        )
        .unwrap();
    let scalars = b
        .struct_type(
            "Scalars",
            vec![
                FeatureDef::new("i", ValueKind::Int),
                FeatureDef::new("s", ValueKind::Short),
                FeatureDef::new("b", ValueKind::Byte),
                FeatureDef::new("z", ValueKind::Boolean),
                FeatureDef::new("f", ValueKind::Float),
                FeatureDef::new("d", ValueKind::Double),
                FeatureDef::new("l", ValueKind::Long),
                FeatureDef::new("str", ValueKind::Str),
                FeatureDef::new("r", ValueKind::Ref),
            ],
        )
        .unwrap();
    let ints = b.array_type("Int[]", ValueKind::Int).unwrap();
    let shorts = b.array_type("Short[]", ValueKind::Short).unwrap();
    let bytes = b.array_type("Byte[]", ValueKind::Byte).unwrap();
    let bools = b.array_type("Boolean[]", ValueKind::Boolean).unwrap();
    let floats = b.array_type("Float[]", ValueKind::Float).unwrap();
    let doubles = b.array_type("Double[]", ValueKind::Double).unwrap();
    let longs = b.array_type("Long[]", ValueKind::Long).unwrap();
    let strs = b.array_type("String[]", ValueKind::Str).unwrap();
    let refs = b.array_type("Ref[]", ValueKind::Ref).unwrap();
    let sofa = b
        .container_type(
            "Sofa",
            vec![
                FeatureDef::new("id", ValueKind::Str),
                FeatureDef::new("text", ValueKind::Str),
            ],
            0,
        )
        .unwrap();
    let annotation = b
        .anchored_type(
            "Annotation",
            vec![
                FeatureDef::new("sofa", ValueKind::Ref),
                FeatureDef::new("begin", ValueKind::Int),
                FeatureDef::new("end", ValueKind::Int),
            ],
            0,
        )
        .unwrap();
    Fixture {
        schema: Arc::new(b.build()),
        node,
        scalars,
        ints,
        shorts,
        bytes,
        bools,
        floats,
        doubles,
        longs,
        strs,
        refs,
        sofa,
        annotation,
    }
}

impl Fixture {
    pub fn store(&self) -> RecordStore {
        RecordStore::new(Arc::clone(&self.schema))
    }

    /// Creates a node and fills its slots.
    pub fn node(
        &self,
        store: &mut RecordStore,
        value: i32,
        next: Option<RecordId>,
        name: Option<&str>,
    ) -> RecordId {
        let id = store.create_record(self.node).unwrap();
        store.set_slot(id, NODE_VALUE, Value::Int(value)).unwrap();
        store.set_slot(id, NODE_NEXT, Value::Ref(next)).unwrap();
        store
            .set_slot(id, NODE_NAME, Value::Str(name.map(str::to_owned)))
            .unwrap();
        id
    }

    /// A chain `n[0] -> n[1] -> ...` whose head is the only member of view 0.
    pub fn chain(&self, store: &mut RecordStore, values: &[i32]) -> Vec<RecordId> {
        let mut ids = Vec::with_capacity(values.len());
        let mut next = None;
        for (i, v) in values.iter().enumerate().rev() {
            let id = self.node(store, *v, next, Some(&format!("n{i}")));
            ids.push(id);
            next = Some(id);
        }
        ids.reverse();
        let view = if store.index().is_empty() {
            store.add_view()
        } else {
            0
        };
        if let Some(head) = ids.first() {
            store.add_to_view(view, *head).unwrap();
        }
        ids
    }
}

/// Uncompressed output, so corrupted bytes reach the decoder verbatim.
pub fn stored() -> SerializeOptions {
    SerializeOptions {
        level: CompressLevel::None,
        ..SerializeOptions::default()
    }
}

pub fn encode(store: &RecordStore, options: &SerializeOptions) -> (Vec<u8>, SerializeOutcome) {
    let mut bytes = Vec::new();
    let outcome = serialize(store, &mut bytes, options).unwrap();
    (bytes, outcome)
}

/// Serializes `store` and decodes it into a fresh store over the same schema.
pub fn roundtrip(
    store: &RecordStore,
    options: &SerializeOptions,
) -> (RecordStore, SerializeOutcome, DeserializeOutcome) {
    let (bytes, sent) = encode(store, options);
    let mut target = RecordStore::new(store.schema_arc());
    let received =
        deserialize(&mut target, &bytes, None, &DeserializeOptions::default()).unwrap();
    (target, sent, received)
}

pub fn assert_same_graph(left: &RecordStore, right: &RecordStore) {
    if let Err(d) = compare_reachable(left, right) {
        panic!("graphs diverge: {d}");
    }
}

/// Compares two stores record by record in the sequence order of a
/// serialize call and the deserialize call that consumed its output.
pub fn assert_same_by_seq(
    left: &RecordStore,
    sent: &SerializeOutcome,
    right: &RecordStore,
    received: &DeserializeOutcome,
) {
    if let Err(d) = compare_ordered(
        left,
        sent.reuse.records(),
        right,
        received.reuse.records(),
    ) {
        panic!("graphs diverge in sequence order: {d}");
    }
}

/// Shape of a generated graph: one entry per node with its value, an
/// optional successor (index modulo the node count) and an optional name.
pub type NodeSpec = (i32, Option<usize>, Option<String>);

pub fn arb_nodes() -> impl Strategy<Value = Vec<NodeSpec>> {
    prop::collection::vec(
        (
            prop_oneof![
                Just(0i32),
                Just(i32::MIN),
                Just(i32::MAX),
                -100..100i32,
                any::<i32>()
            ],
            prop::option::of(any::<usize>()),
            prop::option::of("[a-c]{0,6}"),
        ),
        0..24,
    )
}

/// Builds the generated graph; every node with an even index is a member
/// of view 0, odd ones are reachable only through references (or not at all).
pub fn build_nodes(fx: &Fixture, specs: &[NodeSpec]) -> RecordStore {
    let mut store = fx.store();
    let view = store.add_view();
    let ids: Vec<RecordId> = specs
        .iter()
        .map(|(value, _, name)| fx.node(&mut store, *value, None, name.as_deref()))
        .collect();
    for (i, (_, next, _)) in specs.iter().enumerate() {
        if let Some(next) = next {
            let target = ids[next % ids.len()];
            store
                .set_slot(ids[i], NODE_NEXT, Value::Ref(Some(target)))
                .unwrap();
        }
        if i % 2 == 0 {
            store.add_to_view(view, ids[i]).unwrap();
        }
    }
    store
}
