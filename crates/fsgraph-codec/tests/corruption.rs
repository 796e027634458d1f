// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Malformed input must fail with an error, never a panic.

mod common;

use common::*;
use std::ops::Range;

use fsgraph_codec::{
    deserialize, serialize_delta, CodecError, DeserializeOptions, SerializeOptions, StreamId,
    HEADER_SIZE,
};
use fsgraph_store::{RecordStore, Value};
use proptest::prelude::*;

fn sample(fx: &Fixture) -> RecordStore {
    let mut store = fx.store();
    let ids = fx.chain(&mut store, &[7, -3, 1 << 20, 0]);
    let arr = store.create_array(fx.doubles, 3).unwrap();
    store.set_element(arr, 1, Value::Double(2.5)).unwrap();
    store.add_to_view(0, arr).unwrap();
    let sofa = store.create_container(fx.sofa, "s").unwrap();
    let ann = store.create_anchored(fx.annotation, sofa).unwrap();
    store.add_to_view(0, ann).unwrap();
    store.set_slot(ids[3], NODE_NEXT, Value::Ref(Some(ann))).unwrap();
    store
}

fn decode(fx: &Fixture, bytes: &[u8]) -> Result<(), CodecError> {
    let mut target = fx.store();
    deserialize(&mut target, bytes, None, &DeserializeOptions::default()).map(|_| ())
}

#[test]
fn bad_magic_is_reported() {
    let fx = fixture();
    let (mut bytes, _) = encode(&sample(&fx), &stored());
    bytes[0] = b'X';
    let err = decode(&fx, &bytes).unwrap_err();
    assert!(matches!(err, CodecError::BadMagic(m) if m[0] == b'X'), "{err}");
}

#[test]
fn unknown_version_is_reported() {
    let fx = fixture();
    let (mut bytes, _) = encode(&sample(&fx), &stored());
    bytes[4..6].copy_from_slice(&9u16.to_le_bytes());
    let err = decode(&fx, &bytes).unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedVersion(9)), "{err}");
}

#[test]
fn trailing_garbage_is_corruption() {
    let fx = fixture();
    let (mut bytes, _) = encode(&sample(&fx), &SerializeOptions::default());
    bytes.push(0);
    let err = decode(&fx, &bytes).unwrap_err();
    assert!(matches!(err, CodecError::StreamCorruption { .. }), "{err}");
}

#[test]
fn header_alone_is_corruption() {
    let fx = fixture();
    let (bytes, _) = encode(&sample(&fx), &stored());
    let err = decode(&fx, &bytes[..HEADER_SIZE]).unwrap_err();
    assert!(matches!(err, CodecError::StreamCorruption { .. }), "{err}");
}

#[test]
fn empty_input_is_rejected() {
    let fx = fixture();
    assert!(decode(&fx, &[]).is_err());
}

#[test]
fn inflated_length_mismatch_is_reported() {
    let fx = fixture();
    let (mut bytes, _) = encode(&sample(&fx), &SerializeOptions::default());
    // Low byte of the first table entry's uncompressed length:
    // header, entry count, stream byte, compressed length.
    let at = HEADER_SIZE + 4 + 1 + 4;
    bytes[at] = bytes[at].wrapping_add(1);
    let err = decode(&fx, &bytes).unwrap_err();
    assert!(matches!(err, CodecError::StreamCorruption { .. }), "{err}");
}

/// Byte range of `stream`'s payload in a stored stream without a schema.
fn stored_payload(bytes: &[u8], stream: StreamId) -> Range<usize> {
    let le = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
    let count = le(HEADER_SIZE);
    let mut offset = HEADER_SIZE + 4 + count * 9;
    let mut found = None;
    for i in 0..count {
        let entry = HEADER_SIZE + 4 + i * 9;
        let len = le(entry + 1);
        if bytes[entry] == stream as u8 {
            found = Some(offset..offset + len);
        }
        offset += len;
    }
    found.unwrap()
}

#[test]
fn modification_of_unknown_feature_offset_is_a_schema_mismatch() {
    let fx = fixture();
    let mut sender = fx.store();
    let head = fx.chain(&mut sender, &[5])[0];
    let (mut receiver, sent, received) = roundtrip(&sender, &stored());
    let mark = sender.mark();
    sender.set_slot(head, NODE_VALUE, Value::Int(6)).unwrap();
    let mut bytes = Vec::new();
    serialize_delta(&sender, &mut bytes, &mark, &sent.reuse, &stored()).unwrap();

    // Modification log: seq 1, one change, offset delta 0.
    let log = stored_payload(&bytes, StreamId::FsIndexes);
    assert_eq!(&bytes[log.clone()], &[4, 1, 0]);
    bytes[log.end - 1] = 9;

    let err = deserialize(
        &mut receiver,
        &bytes,
        Some(&received.reuse),
        &DeserializeOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CodecError::SchemaMismatch { .. }), "{err}");
}

proptest! {
    #[test]
    fn truncated_input_never_decodes(cut in 0usize..4096) {
        let fx = fixture();
        for options in [stored(), SerializeOptions::default()] {
            let (bytes, _) = encode(&sample(&fx), &options);
            let cut = cut % bytes.len();
            prop_assert!(decode(&fx, &bytes[..cut]).is_err());
        }
    }

    #[test]
    fn flipped_bytes_never_panic(at in any::<prop::sample::Index>(), mask in 1u8..=255) {
        let fx = fixture();
        let (mut bytes, _) = encode(&sample(&fx), &stored());
        let i = at.index(bytes.len());
        bytes[i] ^= mask;
        // Either outcome is fine; reaching this line is the assertion.
        let _ = decode(&fx, &bytes);
    }
}
