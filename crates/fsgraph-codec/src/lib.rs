// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fsgraph-codec: compressed binary form of [`fsgraph_store`] graphs.
//!
//! [`serialize`] writes every reachable record; [`serialize_delta`] writes
//! only what changed since a [`Mark`](fsgraph_store::Mark). Values are
//! classified by [`SlotKind`], difference- or bit-repacked, routed to one
//! of the [`StreamId`] streams and each stream is compressed on its own.
//! [`deserialize`] reverses the chain, resolving forward references once
//! every record of the call exists.
//!
//! ```text
//! header | [schema] | stream table | stream payloads
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions
)]

mod config;
mod deserialize;
pub mod diff;
mod error;
pub mod float;
mod fixup;
mod header;
mod measure;
mod memo;
mod serialize;
mod seq;
mod slot_kind;
mod streams;
mod strings;
pub mod varint;

/// Options and their JSON configuration file.
pub use config::{
    AllowPreexisting, CodecConfig, CompressLevel, CompressStrategy, ConfigError,
    DeserializeOptions, SerializeOptions,
};
/// Decoding.
pub use deserialize::{deserialize, DeserializeOutcome};
/// Errors.
pub use error::{CodecError, Result};
/// Stream header.
pub use header::{Compression, Header, HeaderFlags, FORMAT_MAGIC, FORMAT_VERSION, HEADER_SIZE};
/// Encode-side statistics.
pub use measure::Measurements;
/// Sequence tables across delta calls.
pub use seq::ReuseInfo;
/// Encoding.
pub use serialize::{serialize, serialize_delta, SerializeOutcome};
/// Slot classification.
pub use slot_kind::{classify, SlotInfo, SlotKind};
/// Stream identifiers and byte counts.
pub use streams::{StreamId, StreamStats};
/// String sharing.
pub use strings::{StringOptimizer, StringStats, StringTable, DEFAULT_SPLIT_SIZE, MAX_STRING_LEN};
