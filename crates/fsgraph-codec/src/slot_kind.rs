// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Slot classification over the schema.

use fsgraph_store::{TypeCode, TypeRole, TypeShape, TypeSystem, ValueKind};
use rustc_hash::FxHashMap;

use crate::error::{CodecError, Result};
use crate::streams::StreamId;

/// Closed set of slot kinds the codec distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Length prefix of an array record.
    ArrayLength,
    /// Reference to another record, written as its sequence number.
    HeapRef,
    /// 32-bit integer.
    Int,
    /// 8-bit integer.
    Byte,
    /// 16-bit integer.
    Short,
    /// Boolean.
    Boolean,
    /// binary32.
    Float,
    /// binary64.
    Double,
    /// 64-bit integer.
    Long,
    /// String occurrence.
    StrRef,
    /// Record type tag.
    TypeCode,
}

impl SlotKind {
    /// Slot kind of a schema value kind.
    pub fn of(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int => Self::Int,
            ValueKind::Short => Self::Short,
            ValueKind::Byte => Self::Byte,
            ValueKind::Boolean => Self::Boolean,
            ValueKind::Float => Self::Float,
            ValueKind::Double => Self::Double,
            ValueKind::Long => Self::Long,
            ValueKind::Str => Self::StrRef,
            ValueKind::Ref => Self::HeapRef,
        }
    }

    /// Whether values are difference-encoded against a previous value.
    pub fn is_diff_encoded(self) -> bool {
        matches!(self, Self::HeapRef | Self::Int | Self::Short | Self::Long)
    }

    /// Whether the kind has negative values.
    pub fn can_be_negative(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Short | Self::Byte | Self::Float | Self::Double | Self::Long
        )
    }

    /// Streams values of this kind are written to.
    pub fn streams(self) -> &'static [StreamId] {
        match self {
            Self::ArrayLength => &[StreamId::ArrayLength],
            Self::HeapRef => &[StreamId::HeapRef],
            Self::Int => &[StreamId::Int],
            Self::Byte | Self::Boolean => &[StreamId::Byte],
            Self::Short => &[StreamId::Short],
            Self::Float => &[StreamId::FloatExponent, StreamId::FloatMantissaSign],
            Self::Double => &[StreamId::DoubleExponent, StreamId::DoubleMantissaSign],
            Self::Long => &[StreamId::LongHigh, StreamId::LongLow],
            Self::StrRef => &[StreamId::StrLength, StreamId::StrOffset, StreamId::StrSeg],
            Self::TypeCode => &[StreamId::TypeCode],
        }
    }
}

/// Classification of one slot of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Kind of the slot (for arrays with no feature: [`SlotKind::ArrayLength`]).
    pub kind: SlotKind,
    /// Whether the owning type is an array.
    pub is_array: bool,
    /// Element kind for array types.
    pub element_kind: Option<SlotKind>,
    /// Whether the slot is difference-encoded.
    pub is_diff_encoded: bool,
    /// Whether the slot can hold negative values.
    pub can_be_negative: bool,
    /// Primary stream of the slot.
    pub stream: StreamId,
}

impl SlotInfo {
    fn new(kind: SlotKind, element_kind: Option<SlotKind>) -> Self {
        Self {
            kind,
            is_array: element_kind.is_some(),
            element_kind,
            is_diff_encoded: kind.is_diff_encoded(),
            can_be_negative: kind.can_be_negative(),
            stream: kind.streams()[0],
        }
    }
}

/// Classifies feature `feature` of type `code`, or the array itself when
/// `feature` is `None`. For arrays, `Some(_)` addresses an element.
pub fn classify(schema: &TypeSystem, code: TypeCode, feature: Option<usize>) -> Result<SlotInfo> {
    let def = schema
        .type_for_code(code)
        .ok_or_else(|| CodecError::mismatch(format!("unknown type code {}", code.0)))?;
    match (&def.shape, feature) {
        (TypeShape::Array(element), None) => {
            Ok(SlotInfo::new(SlotKind::ArrayLength, Some(SlotKind::of(*element))))
        }
        (TypeShape::Array(element), Some(_)) => {
            let element = SlotKind::of(*element);
            Ok(SlotInfo::new(element, Some(element)))
        }
        (TypeShape::Struct(_), None) => Ok(SlotInfo::new(SlotKind::TypeCode, None)),
        (TypeShape::Struct(features), Some(offset)) => features
            .get(offset)
            .map(|f| SlotInfo::new(SlotKind::of(f.kind), None))
            .ok_or_else(|| {
                CodecError::mismatch(format!("type {} has no feature offset {offset}", def.name))
            }),
    }
}

/// Precomputed slot kinds of one type.
#[derive(Debug, Clone)]
pub(crate) enum Layout {
    Struct {
        slots: Vec<SlotKind>,
        keys: Vec<bool>,
        role: TypeRole,
    },
    Array(SlotKind),
}

/// Layouts of every type in a schema, keyed by code.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layouts {
    by_code: FxHashMap<TypeCode, Layout>,
}

impl Layouts {
    pub(crate) fn new(schema: &TypeSystem) -> Self {
        let by_code = schema
            .iter()
            .map(|def| {
                let layout = match &def.shape {
                    TypeShape::Struct(features) => Layout::Struct {
                        slots: features.iter().map(|f| SlotKind::of(f.kind)).collect(),
                        keys: features.iter().map(|f| f.is_key).collect(),
                        role: def.role,
                    },
                    TypeShape::Array(element) => Layout::Array(SlotKind::of(*element)),
                };
                (def.code, layout)
            })
            .collect();
        Self { by_code }
    }

    pub(crate) fn get(&self, code: TypeCode) -> Result<&Layout> {
        self.by_code
            .get(&code)
            .ok_or_else(|| CodecError::mismatch(format!("unknown type code {}", code.0)))
    }
}
