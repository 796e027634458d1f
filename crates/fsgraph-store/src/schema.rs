// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Type schema: record types, their features, and the kind of every slot.
//!
//! A [`TypeSystem`] is immutable once built. Type codes are dense, assigned
//! by [`TypeSystemBuilder`] in declaration order starting at 1; code 0 is
//! reserved so it can never collide with a real type on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric identifier of a record type. Code 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeCode(pub u32);

impl TypeCode {
    /// The reserved "no type" code.
    pub const NONE: TypeCode = TypeCode(0);
}

/// Storage representation of a scalar feature or an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// 32-bit signed integer.
    Int,
    /// 16-bit signed integer.
    Short,
    /// 8-bit signed integer.
    Byte,
    /// Boolean flag.
    Boolean,
    /// IEEE-754 binary32.
    Float,
    /// IEEE-754 binary64.
    Double,
    /// 64-bit signed integer.
    Long,
    /// Optional UTF-8 string.
    Str,
    /// Optional reference to another record.
    Ref,
}

/// A named scalar slot of a struct type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Feature name, unique within its type.
    pub name: String,
    /// Representation of the slot value.
    pub kind: ValueKind,
    /// Whether the feature participates in index keys.
    ///
    /// Changing a key feature of an indexed record requires the index to
    /// remove and re-add the record.
    pub is_key: bool,
}

impl FeatureDef {
    /// A non-key feature.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_key: false,
        }
    }

    /// Marks the feature as part of index keys.
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }
}

/// Layout of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeShape {
    /// Ordered scalar slots, one per feature.
    Struct(Vec<FeatureDef>),
    /// Homogeneous array of the given element kind.
    Array(ValueKind),
}

/// How records of a type are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRole {
    /// Created empty and filled slot by slot.
    Plain,
    /// A container (sofa). Created together with its string key, which must
    /// be unique in the store.
    Container {
        /// Offset of the string feature holding the key.
        key_feature: usize,
    },
    /// Annotation-like. Created together with a reference to an existing
    /// container record.
    Anchored {
        /// Offset of the reference feature pointing at the container.
        container_feature: usize,
    },
}

/// A single record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Wire code.
    pub code: TypeCode,
    /// Unique type name.
    pub name: String,
    /// Slot layout.
    pub shape: TypeShape,
    /// Creation requirements.
    pub role: TypeRole,
}

impl TypeDef {
    /// Features of a struct type; empty for arrays.
    pub fn features(&self) -> &[FeatureDef] {
        match &self.shape {
            TypeShape::Struct(features) => features,
            TypeShape::Array(_) => &[],
        }
    }

    /// Element kind if this is an array type.
    pub fn element_kind(&self) -> Option<ValueKind> {
        match self.shape {
            TypeShape::Array(kind) => Some(kind),
            TypeShape::Struct(_) => None,
        }
    }

    /// Returns `true` for array types.
    pub fn is_array(&self) -> bool {
        matches!(self.shape, TypeShape::Array(_))
    }
}

/// Errors raised while declaring a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A type with this name was already declared.
    #[error("duplicate type name: {0}")]
    DuplicateType(String),
    /// Two features of one type share a name.
    #[error("duplicate feature {feature} on type {type_name}")]
    DuplicateFeature {
        /// Owning type.
        type_name: String,
        /// Repeated feature name.
        feature: String,
    },
    /// A role names a feature that does not exist or has the wrong kind.
    #[error("type {type_name}: role feature {offset} must be a {expected:?} feature")]
    InvalidRoleFeature {
        /// Owning type.
        type_name: String,
        /// Offending feature offset.
        offset: usize,
        /// Kind the role requires.
        expected: ValueKind,
    },
    /// More types than fit in a type code.
    #[error("type code space exhausted")]
    CodeSpaceExhausted,
}

/// Immutable set of record types keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSystem {
    types: BTreeMap<TypeCode, TypeDef>,
}

impl TypeSystem {
    /// Looks up a type by wire code.
    pub fn type_for_code(&self, code: TypeCode) -> Option<&TypeDef> {
        self.types.get(&code)
    }

    /// Looks up a type code by name.
    pub fn code_for_name(&self, name: &str) -> Option<TypeCode> {
        self.types
            .values()
            .find(|def| def.name == name)
            .map(|def| def.code)
    }

    /// Ordered features of a struct type; `None` for unknown codes.
    pub fn features_of(&self, code: TypeCode) -> Option<&[FeatureDef]> {
        self.type_for_code(code).map(TypeDef::features)
    }

    /// All types in code order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    /// Number of declared types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are declared.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Largest declared code, or [`TypeCode::NONE`] when empty.
    pub fn max_code(&self) -> TypeCode {
        self.types
            .keys()
            .next_back()
            .copied()
            .unwrap_or(TypeCode::NONE)
    }
}

/// Incremental builder for a [`TypeSystem`].
#[derive(Debug)]
pub struct TypeSystemBuilder {
    types: BTreeMap<TypeCode, TypeDef>,
    next_code: u32,
}

impl Default for TypeSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystemBuilder {
    /// Empty builder; the first declared type receives code 1.
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
            next_code: 1,
        }
    }

    /// Declares a plain struct type.
    pub fn struct_type(
        &mut self,
        name: impl Into<String>,
        features: Vec<FeatureDef>,
    ) -> Result<TypeCode, SchemaError> {
        self.declare(name.into(), TypeShape::Struct(features), TypeRole::Plain)
    }

    /// Declares an array type.
    pub fn array_type(
        &mut self,
        name: impl Into<String>,
        element: ValueKind,
    ) -> Result<TypeCode, SchemaError> {
        self.declare(name.into(), TypeShape::Array(element), TypeRole::Plain)
    }

    /// Declares a container type keyed by the string feature at `key_feature`.
    pub fn container_type(
        &mut self,
        name: impl Into<String>,
        features: Vec<FeatureDef>,
        key_feature: usize,
    ) -> Result<TypeCode, SchemaError> {
        let name = name.into();
        check_role_feature(&name, &features, key_feature, ValueKind::Str)?;
        self.declare(
            name,
            TypeShape::Struct(features),
            TypeRole::Container { key_feature },
        )
    }

    /// Declares an anchored type whose reference feature at
    /// `container_feature` points at its container.
    pub fn anchored_type(
        &mut self,
        name: impl Into<String>,
        features: Vec<FeatureDef>,
        container_feature: usize,
    ) -> Result<TypeCode, SchemaError> {
        let name = name.into();
        check_role_feature(&name, &features, container_feature, ValueKind::Ref)?;
        self.declare(
            name,
            TypeShape::Struct(features),
            TypeRole::Anchored { container_feature },
        )
    }

    /// Finishes the schema.
    pub fn build(self) -> TypeSystem {
        TypeSystem { types: self.types }
    }

    fn declare(
        &mut self,
        name: String,
        shape: TypeShape,
        role: TypeRole,
    ) -> Result<TypeCode, SchemaError> {
        if self.types.values().any(|def| def.name == name) {
            return Err(SchemaError::DuplicateType(name));
        }
        if let TypeShape::Struct(features) = &shape {
            for (i, feature) in features.iter().enumerate() {
                if features[..i].iter().any(|f| f.name == feature.name) {
                    return Err(SchemaError::DuplicateFeature {
                        type_name: name,
                        feature: feature.name.clone(),
                    });
                }
            }
        }
        let code = TypeCode(self.next_code);
        self.next_code = self
            .next_code
            .checked_add(1)
            .ok_or(SchemaError::CodeSpaceExhausted)?;
        self.types.insert(
            code,
            TypeDef {
                code,
                name,
                shape,
                role,
            },
        );
        Ok(code)
    }
}

fn check_role_feature(
    type_name: &str,
    features: &[FeatureDef],
    offset: usize,
    expected: ValueKind,
) -> Result<(), SchemaError> {
    match features.get(offset) {
        Some(feature) if feature.kind == expected => Ok(()),
        _ => Err(SchemaError::InvalidRoleFeature {
            type_name: type_name.to_owned(),
            offset,
            expected,
        }),
    }
}
