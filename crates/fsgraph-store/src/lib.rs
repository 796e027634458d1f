// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fsgraph-store: typed feature-structure graphs.
//!
//! A [`RecordStore`] holds records of the types declared in a
//! [`TypeSystem`], addressed by dense [`RecordId`] handles. Records are
//! indexed into views, and a [`Mark`] enables change tracking so that a
//! later delta can describe only what happened after it.
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

mod compare;
mod index;
mod journal;
mod schema;
mod store;
mod value;

/// Structural comparison of reachable graphs.
pub use compare::{compare_ordered, compare_reachable, Divergence};
/// Index views.
pub use index::{IndexRepository, View};
/// Marks and change sets.
pub use journal::{ChangeSet, Mark, MembershipChanges};
/// Schema declaration and lookup.
pub use schema::{
    FeatureDef, SchemaError, TypeCode, TypeDef, TypeRole, TypeShape, TypeSystem,
    TypeSystemBuilder, ValueKind,
};
/// Record arena.
pub use store::{Record, RecordBody, RecordId, RecordStore, StoreError};
/// Slot values.
pub use value::{ArrayValues, Value};
