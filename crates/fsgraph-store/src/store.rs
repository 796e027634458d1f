// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record arena, index views and change journal behind one handle.
#![allow(clippy::cast_possible_truncation)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::index::{IndexRepository, View};
use crate::journal::{ChangeSet, Journal, Mark, MembershipChanges};
use crate::schema::{TypeCode, TypeDef, TypeRole, TypeShape, TypeSystem, ValueKind};
use crate::value::{ArrayValues, Value};

/// Dense handle of a record in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub(crate) u32);

impl RecordId {
    /// Position of the record in creation order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Slots of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    /// One value per declared feature.
    Struct(Vec<Value>),
    /// Array elements.
    Array(ArrayValues),
}

/// A typed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Type of the record.
    pub type_code: TypeCode,
    /// Slot storage.
    pub body: RecordBody,
}

impl Record {
    /// References held by the record, in slot order.
    pub fn ref_targets(&self) -> Vec<RecordId> {
        match &self.body {
            RecordBody::Struct(values) => values.iter().filter_map(Value::as_ref_target).collect(),
            RecordBody::Array(values) => values.ref_targets().collect(),
        }
    }
}

/// Errors raised by store accessors and mutators.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    /// No record with this handle.
    #[error("unknown record {0:?}")]
    UnknownRecord(RecordId),
    /// Type code not in the schema.
    #[error("unknown type code {0:?}")]
    UnknownType(TypeCode),
    /// The type requires a different factory (`create_container`, `create_anchored`, `create_array`).
    #[error("type {type_name} cannot be created with this factory")]
    WrongFactory {
        /// Type name.
        type_name: String,
    },
    /// Feature offset or element index out of range.
    #[error("slot {slot} out of range for record {record:?}")]
    SlotOutOfRange {
        /// Record addressed.
        record: RecordId,
        /// Offending offset or index.
        slot: usize,
    },
    /// Value kind does not match the slot kind.
    #[error("record {record:?} slot {slot}: expected {expected:?}, got {actual:?}")]
    KindMismatch {
        /// Record addressed.
        record: RecordId,
        /// Slot offset or index.
        slot: usize,
        /// Declared kind.
        expected: ValueKind,
        /// Kind supplied.
        actual: ValueKind,
    },
    /// Struct access on an array record or vice versa.
    #[error("record {0:?} has the wrong shape for this access")]
    WrongShape(RecordId),
    /// A container with this key already exists.
    #[error("duplicate container key {0:?}")]
    DuplicateContainer(String),
    /// The referenced record is not a container.
    #[error("record {0:?} is not a container")]
    NotAContainer(RecordId),
    /// A container's key feature was cleared.
    #[error("container {0:?} requires a key")]
    MissingContainerKey(RecordId),
    /// An anchored record's container reference was cleared.
    #[error("anchored record {0:?} requires a container")]
    MissingContainer(RecordId),
    /// View index out of range.
    #[error("unknown view {0}")]
    UnknownView(usize),
    /// The mark is stale or was never taken on this store.
    #[error("stale or foreign mark")]
    StaleMark,
}

/// In-memory record store over a fixed schema.
///
/// Records live in an arena addressed by [`RecordId`]; handles are never
/// reused until [`RecordStore::reset`].
#[derive(Debug, Clone)]
pub struct RecordStore {
    schema: Arc<TypeSystem>,
    records: Vec<Record>,
    index: IndexRepository,
    journal: Journal,
    /// Container records by key.
    containers: BTreeMap<String, RecordId>,
    /// Anchored records by container.
    anchored: BTreeMap<RecordId, BTreeSet<RecordId>>,
}

impl RecordStore {
    /// Empty store over `schema`.
    pub fn new(schema: Arc<TypeSystem>) -> Self {
        Self {
            schema,
            records: Vec::new(),
            index: IndexRepository::default(),
            journal: Journal::default(),
            containers: BTreeMap::new(),
            anchored: BTreeMap::new(),
        }
    }

    /// Schema of the store.
    pub fn schema(&self) -> &TypeSystem {
        &self.schema
    }

    /// Shared handle to the schema.
    pub fn schema_arc(&self) -> Arc<TypeSystem> {
        Arc::clone(&self.schema)
    }

    /// Number of records ever created since the last reset.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Handle the next created record will receive.
    pub fn next_id(&self) -> RecordId {
        RecordId(self.records.len() as u32)
    }

    /// Handles of all records in creation order.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> {
        (0..self.records.len() as u32).map(RecordId)
    }

    /// Record by handle.
    pub fn record(&self, id: RecordId) -> Result<&Record, StoreError> {
        self.records
            .get(id.index())
            .ok_or(StoreError::UnknownRecord(id))
    }

    /// Type definition of a record.
    pub fn type_of(&self, id: RecordId) -> Result<&TypeDef, StoreError> {
        let code = self.record(id)?.type_code;
        self.type_def(code)
    }

    fn type_def(&self, code: TypeCode) -> Result<&TypeDef, StoreError> {
        self.schema
            .type_for_code(code)
            .ok_or(StoreError::UnknownType(code))
    }

    fn push(&mut self, type_code: TypeCode, body: RecordBody) -> RecordId {
        let id = self.next_id();
        self.records.push(Record { type_code, body });
        id
    }

    fn blank_struct(&self, code: TypeCode) -> Result<(&TypeDef, RecordBody), StoreError> {
        let def = self.type_def(code)?;
        match &def.shape {
            TypeShape::Struct(features) => Ok((
                def,
                RecordBody::Struct(
                    features
                        .iter()
                        .map(|f| Value::default_for(f.kind))
                        .collect(),
                ),
            )),
            TypeShape::Array(_) => Err(StoreError::WrongFactory {
                type_name: def.name.clone(),
            }),
        }
    }

    /// Creates a plain struct record with default slot values.
    pub fn create_record(&mut self, code: TypeCode) -> Result<RecordId, StoreError> {
        let (def, body) = self.blank_struct(code)?;
        if def.role != TypeRole::Plain {
            return Err(StoreError::WrongFactory {
                type_name: def.name.clone(),
            });
        }
        Ok(self.push(code, body))
    }

    /// Creates a zero-filled array record.
    pub fn create_array(&mut self, code: TypeCode, len: usize) -> Result<RecordId, StoreError> {
        let def = self.type_def(code)?;
        let Some(kind) = def.element_kind() else {
            return Err(StoreError::WrongFactory {
                type_name: def.name.clone(),
            });
        };
        Ok(self.push(code, RecordBody::Array(ArrayValues::new(kind, len))))
    }

    /// Creates a container record with its unique key.
    pub fn create_container(
        &mut self,
        code: TypeCode,
        key: impl Into<String>,
    ) -> Result<RecordId, StoreError> {
        let key = key.into();
        let (def, mut body) = self.blank_struct(code)?;
        let TypeRole::Container { key_feature } = def.role else {
            return Err(StoreError::WrongFactory {
                type_name: def.name.clone(),
            });
        };
        if self.containers.contains_key(&key) {
            return Err(StoreError::DuplicateContainer(key));
        }
        if let RecordBody::Struct(values) = &mut body {
            if let Some(slot) = values.get_mut(key_feature) {
                *slot = Value::Str(Some(key.clone()));
            }
        }
        let id = self.push(code, body);
        self.containers.insert(key, id);
        Ok(id)
    }

    /// Creates an anchored record bound to an existing container.
    pub fn create_anchored(
        &mut self,
        code: TypeCode,
        container: RecordId,
    ) -> Result<RecordId, StoreError> {
        if !self.is_container(container)? {
            return Err(StoreError::NotAContainer(container));
        }
        let (def, mut body) = self.blank_struct(code)?;
        let TypeRole::Anchored { container_feature } = def.role else {
            return Err(StoreError::WrongFactory {
                type_name: def.name.clone(),
            });
        };
        if let RecordBody::Struct(values) = &mut body {
            if let Some(slot) = values.get_mut(container_feature) {
                *slot = Value::Ref(Some(container));
            }
        }
        let id = self.push(code, body);
        self.anchored.entry(container).or_default().insert(id);
        Ok(id)
    }

    fn is_container(&self, id: RecordId) -> Result<bool, StoreError> {
        Ok(matches!(self.type_of(id)?.role, TypeRole::Container { .. }))
    }

    /// Container record registered under `key`.
    pub fn container_by_key(&self, key: &str) -> Option<RecordId> {
        self.containers.get(key).copied()
    }

    /// Anchored records bound to `container`.
    pub fn anchored_to(&self, container: RecordId) -> impl Iterator<Item = RecordId> + '_ {
        self.anchored
            .get(&container)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Value of feature `offset` of a struct record.
    pub fn slot(&self, id: RecordId, offset: usize) -> Result<&Value, StoreError> {
        match &self.record(id)?.body {
            RecordBody::Struct(values) => values.get(offset).ok_or(StoreError::SlotOutOfRange {
                record: id,
                slot: offset,
            }),
            RecordBody::Array(_) => Err(StoreError::WrongShape(id)),
        }
    }

    /// Writes feature `offset` and journals the change.
    ///
    /// Key features of indexed records are removed from and re-added to
    /// their views. Role features keep the container bookkeeping in sync:
    /// a container key must stay present and unique, and an anchored
    /// record must keep referencing a container.
    pub fn set_slot(&mut self, id: RecordId, offset: usize, value: Value) -> Result<(), StoreError> {
        self.write_slot(id, offset, value, true)?;
        self.finalize_record(id)
    }

    /// Writes feature `offset` without journaling or role bookkeeping.
    ///
    /// Used while reconstructing a graph; call [`RecordStore::finalize_record`]
    /// once reconstruction is complete.
    pub fn restore_slot(
        &mut self,
        id: RecordId,
        offset: usize,
        value: Value,
    ) -> Result<(), StoreError> {
        self.write_slot(id, offset, value, false)
    }

    fn write_slot(
        &mut self,
        id: RecordId,
        offset: usize,
        value: Value,
        journaled: bool,
    ) -> Result<(), StoreError> {
        let def = self.type_of(id)?;
        let feature = def.features().get(offset).ok_or(StoreError::SlotOutOfRange {
            record: id,
            slot: offset,
        })?;
        if feature.kind != value.kind() {
            return Err(StoreError::KindMismatch {
                record: id,
                slot: offset,
                expected: feature.kind,
                actual: value.kind(),
            });
        }
        if journaled {
            self.check_role_write(id, offset, &value)?;
        }
        let reindex_views = if feature.is_key {
            self.index.views_containing(id)
        } else {
            Vec::new()
        };
        for &view in &reindex_views {
            if let Some(v) = self.index.view_mut(view) {
                v.members.remove(&id);
            }
        }
        if let Some(RecordBody::Struct(values)) =
            self.records.get_mut(id.index()).map(|r| &mut r.body)
        {
            if let Some(slot) = values.get_mut(offset) {
                *slot = value;
            }
        }
        for &view in &reindex_views {
            if let Some(v) = self.index.view_mut(view) {
                v.members.insert(id);
            }
            if journaled {
                self.journal.member_reindexed(view, id);
            }
        }
        if journaled {
            self.journal.feature_written(id, offset);
        }
        Ok(())
    }

    fn check_role_write(&self, id: RecordId, offset: usize, value: &Value) -> Result<(), StoreError> {
        match self.type_of(id)?.role {
            TypeRole::Container { key_feature } if key_feature == offset => {
                let Some(key) = value.as_str() else {
                    return Err(StoreError::MissingContainerKey(id));
                };
                match self.containers.get(key) {
                    Some(other) if *other != id => {
                        Err(StoreError::DuplicateContainer(key.to_owned()))
                    }
                    _ => Ok(()),
                }
            }
            TypeRole::Anchored { container_feature } if container_feature == offset => {
                match value.as_ref_target() {
                    None => Err(StoreError::MissingContainer(id)),
                    Some(target) if self.is_container(target)? => Ok(()),
                    Some(target) => Err(StoreError::NotAContainer(target)),
                }
            }
            _ => Ok(()),
        }
    }

    /// Re-synchronizes derived bookkeeping after a record was reconstructed.
    ///
    /// Containers are registered under their current key and anchored
    /// records are bound to the container their reference feature names.
    pub fn finalize_record(&mut self, id: RecordId) -> Result<(), StoreError> {
        match self.type_of(id)?.role {
            TypeRole::Plain => {}
            TypeRole::Container { key_feature } => {
                let key = self.slot(id, key_feature)?.as_str().map(str::to_owned);
                self.containers.retain(|_, v| *v != id);
                if let Some(key) = key {
                    self.containers.insert(key, id);
                }
            }
            TypeRole::Anchored { container_feature } => {
                let target = self.slot(id, container_feature)?.as_ref_target();
                for members in self.anchored.values_mut() {
                    members.remove(&id);
                }
                if let Some(container) = target {
                    self.anchored.entry(container).or_default().insert(id);
                }
                self.anchored.retain(|_, members| !members.is_empty());
            }
        }
        Ok(())
    }

    /// Length of an array record.
    pub fn array_len(&self, id: RecordId) -> Result<usize, StoreError> {
        match &self.record(id)?.body {
            RecordBody::Array(values) => Ok(values.len()),
            RecordBody::Struct(_) => Err(StoreError::WrongShape(id)),
        }
    }

    /// Element storage of an array record.
    pub fn array(&self, id: RecordId) -> Result<&ArrayValues, StoreError> {
        match &self.record(id)?.body {
            RecordBody::Array(values) => Ok(values),
            RecordBody::Struct(_) => Err(StoreError::WrongShape(id)),
        }
    }

    /// Element `index` of an array record.
    pub fn element(&self, id: RecordId, index: usize) -> Result<Value, StoreError> {
        self.array(id)?.get(index).ok_or(StoreError::SlotOutOfRange {
            record: id,
            slot: index,
        })
    }

    /// Writes element `index` and journals the change.
    pub fn set_element(&mut self, id: RecordId, index: usize, value: Value) -> Result<(), StoreError> {
        self.write_element(id, index, value)?;
        self.journal.element_written(id, index);
        Ok(())
    }

    /// Writes element `index` without journaling.
    pub fn restore_element(
        &mut self,
        id: RecordId,
        index: usize,
        value: Value,
    ) -> Result<(), StoreError> {
        self.write_element(id, index, value)
    }

    fn write_element(&mut self, id: RecordId, index: usize, value: Value) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(id.index())
            .ok_or(StoreError::UnknownRecord(id))?;
        let RecordBody::Array(values) = &mut record.body else {
            return Err(StoreError::WrongShape(id));
        };
        let expected = values.kind();
        let len = values.len();
        values.set(index, value).map_err(|rejected| {
            if index >= len {
                StoreError::SlotOutOfRange {
                    record: id,
                    slot: index,
                }
            } else {
                StoreError::KindMismatch {
                    record: id,
                    slot: index,
                    expected,
                    actual: rejected.kind(),
                }
            }
        })
    }

    /// Index views.
    pub fn index(&self) -> &IndexRepository {
        &self.index
    }

    /// Membership of every view, in view order.
    pub fn indexed_per_view(&self) -> Vec<Vec<RecordId>> {
        self.index
            .views()
            .iter()
            .map(|view| view.members.iter().copied().collect())
            .collect()
    }

    /// Grows the index to at least `count` views.
    pub fn ensure_views(&mut self, count: usize) {
        self.index.ensure(count);
    }

    /// Adds a new, unbound view and returns its index.
    pub fn add_view(&mut self) -> usize {
        let index = self.index.len();
        self.index.ensure(index + 1);
        index
    }

    fn view_mut(&mut self, view: usize) -> Result<&mut View, StoreError> {
        self.index.view_mut(view).ok_or(StoreError::UnknownView(view))
    }

    /// Binds a view to a container record.
    pub fn set_view_container(
        &mut self,
        view: usize,
        container: Option<RecordId>,
    ) -> Result<(), StoreError> {
        if let Some(id) = container {
            self.record(id)?;
        }
        self.view_mut(view)?.container = container;
        Ok(())
    }

    /// Adds a record to a view.
    pub fn add_to_view(&mut self, view: usize, id: RecordId) -> Result<(), StoreError> {
        self.record(id)?;
        if self.view_mut(view)?.members.insert(id) {
            self.journal.member_added(view, id);
        }
        Ok(())
    }

    /// Removes a record from a view.
    pub fn remove_from_view(&mut self, view: usize, id: RecordId) -> Result<(), StoreError> {
        if self.view_mut(view)?.members.remove(&id) {
            self.journal.member_removed(view, id);
        }
        Ok(())
    }

    /// Removes and re-adds an indexed record after a key change.
    pub fn reindex(&mut self, view: usize, id: RecordId) -> Result<(), StoreError> {
        let members = &mut self.view_mut(view)?.members;
        if members.remove(&id) {
            members.insert(id);
            self.journal.member_reindexed(view, id);
        }
        Ok(())
    }

    /// Applies a batch of membership changes to one view without journaling.
    pub fn apply_membership_delta(
        &mut self,
        view: usize,
        added: &[RecordId],
        removed: &[RecordId],
        reindexed: &[RecordId],
    ) -> Result<(), StoreError> {
        for &id in added.iter().chain(removed).chain(reindexed) {
            self.record(id)?;
        }
        let members = &mut self.view_mut(view)?.members;
        for id in removed {
            members.remove(id);
        }
        for id in reindexed {
            if members.remove(id) {
                members.insert(*id);
            }
        }
        members.extend(added.iter().copied());
        Ok(())
    }

    /// Records reachable from the index roots, in creation order.
    ///
    /// Roots are view containers and view members; references are followed
    /// transitively through struct slots and reference arrays.
    pub fn reachable_in_creation_order(&self) -> Vec<RecordId> {
        let mut seen = vec![false; self.records.len()];
        let mut queue: VecDeque<RecordId> = VecDeque::new();
        for root in self.index.roots() {
            if let Some(flag) = seen.get_mut(root.index()) {
                if !*flag {
                    *flag = true;
                    queue.push_back(root);
                }
            }
        }
        while let Some(id) = queue.pop_front() {
            let Some(record) = self.records.get(id.index()) else {
                continue;
            };
            for target in record.ref_targets() {
                if let Some(flag) = seen.get_mut(target.index()) {
                    if !*flag {
                        *flag = true;
                        queue.push_back(target);
                    }
                }
            }
        }
        seen.iter()
            .enumerate()
            .filter(|(_, reached)| **reached)
            .map(|(i, _)| RecordId(i as u32))
            .collect()
    }

    /// Drops all records, views and marks; the schema is kept.
    pub fn reset(&mut self) {
        self.records.clear();
        self.index.clear();
        self.containers.clear();
        self.anchored.clear();
        self.journal.invalidate();
    }

    /// Takes a new mark at the current end of the arena.
    ///
    /// Any previously taken mark becomes stale.
    pub fn mark(&mut self) -> Mark {
        self.journal.mark(self.records.len() as u32)
    }

    /// Returns `true` if `mark` is the store's current mark.
    pub fn is_valid_mark(&self, mark: &Mark) -> bool {
        self.journal.is_valid(mark)
    }

    /// Preexisting records written since `mark`, ordered by handle.
    pub fn modified_since_mark(&self, mark: &Mark) -> Result<Vec<(RecordId, ChangeSet)>, StoreError> {
        if !self.is_valid_mark(mark) {
            return Err(StoreError::StaleMark);
        }
        Ok(self.journal.slot_changes())
    }

    /// Per-view membership changes since `mark`.
    pub fn membership_since_mark(&self, mark: &Mark) -> Result<Vec<MembershipChanges>, StoreError> {
        if !self.is_valid_mark(mark) {
            return Err(StoreError::StaleMark);
        }
        Ok(self.journal.membership_changes(self.index.len()))
    }
}
