// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Slot values and homogeneous array storage.

use crate::schema::ValueKind;
use crate::store::RecordId;

/// A single scalar slot value, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 32-bit integer.
    Int(i32),
    /// 16-bit integer.
    Short(i16),
    /// 8-bit integer.
    Byte(i8),
    /// Boolean.
    Boolean(bool),
    /// binary32.
    Float(f32),
    /// binary64.
    Double(f64),
    /// 64-bit integer.
    Long(i64),
    /// Optional string; `None` is distinct from the empty string.
    Str(Option<String>),
    /// Optional record reference.
    Ref(Option<RecordId>),
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Short(_) => ValueKind::Short,
            Self::Byte(_) => ValueKind::Byte,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Long(_) => ValueKind::Long,
            Self::Str(_) => ValueKind::Str,
            Self::Ref(_) => ValueKind::Ref,
        }
    }

    /// The value a freshly created slot holds.
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int => Self::Int(0),
            ValueKind::Short => Self::Short(0),
            ValueKind::Byte => Self::Byte(0),
            ValueKind::Boolean => Self::Boolean(false),
            ValueKind::Float => Self::Float(0.0),
            ValueKind::Double => Self::Double(0.0),
            ValueKind::Long => Self::Long(0),
            ValueKind::Str => Self::Str(None),
            ValueKind::Ref => Self::Ref(None),
        }
    }

    /// Equality that compares floats by bit pattern and ignores references.
    ///
    /// References are compared by the caller, which knows how to map
    /// handles between stores.
    pub fn same_scalar(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Ref(_), Self::Ref(_)) => true,
            _ => self == other,
        }
    }

    /// Referenced record, if this is a non-null reference.
    pub fn as_ref_target(&self) -> Option<RecordId> {
        match self {
            Self::Ref(target) => *target,
            _ => None,
        }
    }

    /// String payload, if this is a non-null string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(Some(s)) => Some(s),
            _ => None,
        }
    }
}

/// Element storage of an array record.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValues {
    /// Int elements.
    Int(Vec<i32>),
    /// Short elements.
    Short(Vec<i16>),
    /// Byte elements.
    Byte(Vec<i8>),
    /// Boolean elements.
    Boolean(Vec<bool>),
    /// Float elements.
    Float(Vec<f32>),
    /// Double elements.
    Double(Vec<f64>),
    /// Long elements.
    Long(Vec<i64>),
    /// String elements.
    Str(Vec<Option<String>>),
    /// Reference elements.
    Ref(Vec<Option<RecordId>>),
}

impl ArrayValues {
    /// Zero-filled storage of `len` elements.
    pub fn new(kind: ValueKind, len: usize) -> Self {
        match kind {
            ValueKind::Int => Self::Int(vec![0; len]),
            ValueKind::Short => Self::Short(vec![0; len]),
            ValueKind::Byte => Self::Byte(vec![0; len]),
            ValueKind::Boolean => Self::Boolean(vec![false; len]),
            ValueKind::Float => Self::Float(vec![0.0; len]),
            ValueKind::Double => Self::Double(vec![0.0; len]),
            ValueKind::Long => Self::Long(vec![0; len]),
            ValueKind::Str => Self::Str(vec![None; len]),
            ValueKind::Ref => Self::Ref(vec![None; len]),
        }
    }

    /// Element kind.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Short(_) => ValueKind::Short,
            Self::Byte(_) => ValueKind::Byte,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Long(_) => ValueKind::Long,
            Self::Str(_) => ValueKind::Str,
            Self::Ref(_) => ValueKind::Ref,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Ref(v) => v.len(),
        }
    }

    /// Returns `true` for zero-length arrays.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` as a tagged value.
    pub fn get(&self, index: usize) -> Option<Value> {
        Some(match self {
            Self::Int(v) => Value::Int(*v.get(index)?),
            Self::Short(v) => Value::Short(*v.get(index)?),
            Self::Byte(v) => Value::Byte(*v.get(index)?),
            Self::Boolean(v) => Value::Boolean(*v.get(index)?),
            Self::Float(v) => Value::Float(*v.get(index)?),
            Self::Double(v) => Value::Double(*v.get(index)?),
            Self::Long(v) => Value::Long(*v.get(index)?),
            Self::Str(v) => Value::Str(v.get(index)?.clone()),
            Self::Ref(v) => Value::Ref(*v.get(index)?),
        })
    }

    /// Stores `value` at `index`.
    ///
    /// Returns the rejected value when the index is out of range or the
    /// kind does not match the element kind.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), Value> {
        match (self, value) {
            (Self::Int(v), Value::Int(x)) => put(v, index, x, Value::Int),
            (Self::Short(v), Value::Short(x)) => put(v, index, x, Value::Short),
            (Self::Byte(v), Value::Byte(x)) => put(v, index, x, Value::Byte),
            (Self::Boolean(v), Value::Boolean(x)) => put(v, index, x, Value::Boolean),
            (Self::Float(v), Value::Float(x)) => put(v, index, x, Value::Float),
            (Self::Double(v), Value::Double(x)) => put(v, index, x, Value::Double),
            (Self::Long(v), Value::Long(x)) => put(v, index, x, Value::Long),
            (Self::Str(v), Value::Str(x)) => put(v, index, x, Value::Str),
            (Self::Ref(v), Value::Ref(x)) => put(v, index, x, Value::Ref),
            (_, other) => Err(other),
        }
    }

    /// Non-null references held by the array.
    pub fn ref_targets(&self) -> impl Iterator<Item = RecordId> + '_ {
        let refs: &[Option<RecordId>] = match self {
            Self::Ref(v) => v,
            _ => &[],
        };
        refs.iter().flatten().copied()
    }
}

fn put<T>(slots: &mut [T], index: usize, x: T, wrap: fn(T) -> Value) -> Result<(), Value> {
    match slots.get_mut(index) {
        Some(slot) => {
            *slot = x;
            Ok(())
        }
        None => Err(wrap(x)),
    }
}
