//! Debug type records as they appear in a module's embedded metadata
//!
//! Records reference each other by [`TypeRef`] (an index into the module's
//! type table) instead of nesting, so shared element and base types are stored
//! once and the engine can detect cycles while resolving.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a record in [`crate::ModuleSnapshot::types`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeRef(pub u32);

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!type{}", self.0)
    }
}

/// Type record with full fidelity from the producer's debug metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRecord {
    /// Scalar type (float, int, bool, min16float, ...)
    BaseType {
        name: String,
        bit_size: u64,
        encoding: u16, // Store DwAte as u16 for serialization
    },

    /// Typedef (type alias)
    Typedef { name: String, underlying: TypeRef },

    /// Qualified type (const, volatile, restrict)
    Qualified {
        qualifier: TypeQualifier,
        underlying: TypeRef,
    },

    /// Pointer or reference (`inout` parameters, `this`)
    Pointer {
        target: Option<TypeRef>,
        bit_size: u64,
        #[serde(default)]
        reference: bool,
    },

    /// Array with one entry per dimension, outermost first
    Array {
        element: TypeRef,
        dimensions: Vec<u64>,
    },

    /// Short vector (float4, uint2, ...)
    Vector { element: TypeRef, count: u32 },

    /// Struct/class type, optionally deriving from a single base
    Struct {
        name: String,
        bit_size: u64,
        members: Vec<MemberRecord>,
        #[serde(default)]
        base: Option<TypeRef>,
    },

    /// Enum type, stored as its underlying integer
    Enum { name: String, bit_size: u64 },

    /// Opaque resource handle; has no addressable storage bits
    Resource {
        #[serde(rename = "resource_kind")]
        kind: ResourceKind,
        name: String,
    },
}

/// Struct member information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub name: String,
    pub ty: TypeRef,
    /// Offset from the start of the containing struct
    pub bit_offset: u64,
    /// Declared width for bitfields; `None` for ordinary members
    #[serde(default)]
    pub bit_size: Option<u64>,
}

/// Type qualifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeQualifier {
    Const,
    Volatile,
    Restrict,
}

impl TypeQualifier {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeQualifier::Const => "const",
            TypeQualifier::Volatile => "volatile",
            TypeQualifier::Restrict => "restrict",
        }
    }
}

/// Resource handle classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Texture,
    RwTexture,
    Buffer,
    RwBuffer,
    StructuredBuffer,
    RwStructuredBuffer,
    ByteAddressBuffer,
    ConstantBuffer,
    Sampler,
    AccelerationStructure,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Texture => "Texture",
            ResourceKind::RwTexture => "RWTexture",
            ResourceKind::Buffer => "Buffer",
            ResourceKind::RwBuffer => "RWBuffer",
            ResourceKind::StructuredBuffer => "StructuredBuffer",
            ResourceKind::RwStructuredBuffer => "RWStructuredBuffer",
            ResourceKind::ByteAddressBuffer => "ByteAddressBuffer",
            ResourceKind::ConstantBuffer => "ConstantBuffer",
            ResourceKind::Sampler => "SamplerState",
            ResourceKind::AccelerationStructure => "RaytracingAccelerationStructure",
        }
    }
}

/// Names of the HLSL minimum-precision scalar types
const MIN_PRECISION_NAMES: &[&str] = &[
    "min16float",
    "min16int",
    "min16uint",
    "min10float",
    "min12int",
];

/// Whether a base type name denotes a minimum-precision scalar
pub fn is_min_precision_name(name: &str) -> bool {
    MIN_PRECISION_NAMES.contains(&name)
}

/// Describe a DW_ATE encoding stored as u16
pub fn encoding_name(encoding: u16) -> &'static str {
    if encoding == gimli::constants::DW_ATE_signed.0 as u16 {
        "signed"
    } else if encoding == gimli::constants::DW_ATE_unsigned.0 as u16 {
        "unsigned"
    } else if encoding == gimli::constants::DW_ATE_float.0 as u16 {
        "float"
    } else if encoding == gimli::constants::DW_ATE_boolean.0 as u16 {
        "bool"
    } else if encoding == gimli::constants::DW_ATE_address.0 as u16 {
        "address"
    } else if encoding == gimli::constants::DW_ATE_signed_char.0 as u16 {
        "signed char"
    } else if encoding == gimli::constants::DW_ATE_unsigned_char.0 as u16 {
        "unsigned char"
    } else {
        "unknown"
    }
}

impl TypeRecord {
    /// All type references held by this record, in declaration order
    pub fn referenced_types(&self) -> Vec<TypeRef> {
        match self {
            TypeRecord::BaseType { .. }
            | TypeRecord::Enum { .. }
            | TypeRecord::Resource { .. } => Vec::new(),
            TypeRecord::Typedef { underlying, .. } | TypeRecord::Qualified { underlying, .. } => {
                vec![*underlying]
            }
            TypeRecord::Pointer { target, .. } => target.iter().copied().collect(),
            TypeRecord::Array { element, .. } | TypeRecord::Vector { element, .. } => {
                vec![*element]
            }
            TypeRecord::Struct { members, base, .. } => members
                .iter()
                .map(|m| m.ty)
                .chain(base.iter().copied())
                .collect(),
        }
    }

    /// Short name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeRecord::BaseType { .. } => "base",
            TypeRecord::Typedef { .. } => "typedef",
            TypeRecord::Qualified { .. } => "qualified",
            TypeRecord::Pointer { .. } => "pointer",
            TypeRecord::Array { .. } => "array",
            TypeRecord::Vector { .. } => "vector",
            TypeRecord::Struct { .. } => "struct",
            TypeRecord::Enum { .. } => "enum",
            TypeRecord::Resource { .. } => "resource",
        }
    }

    /// Create a float base type
    pub fn float(bit_size: u64) -> Self {
        TypeRecord::BaseType {
            name: match bit_size {
                16 => "half",
                64 => "double",
                _ => "float",
            }
            .to_string(),
            bit_size,
            encoding: gimli::constants::DW_ATE_float.0 as u16,
        }
    }

    /// Create a signed integer base type
    pub fn signed_int(bit_size: u64) -> Self {
        TypeRecord::BaseType {
            name: match bit_size {
                16 => "int16_t",
                64 => "int64_t",
                _ => "int",
            }
            .to_string(),
            bit_size,
            encoding: gimli::constants::DW_ATE_signed.0 as u16,
        }
    }

    /// Create an unsigned integer base type
    pub fn unsigned_int(bit_size: u64) -> Self {
        TypeRecord::BaseType {
            name: match bit_size {
                16 => "uint16_t",
                64 => "uint64_t",
                _ => "uint",
            }
            .to_string(),
            bit_size,
            encoding: gimli::constants::DW_ATE_unsigned.0 as u16,
        }
    }

    /// HLSL `bool` is stored in 32 bits
    pub fn boolean() -> Self {
        TypeRecord::BaseType {
            name: "bool".to_string(),
            bit_size: 32,
            encoding: gimli::constants::DW_ATE_boolean.0 as u16,
        }
    }
}

impl fmt::Display for TypeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRecord::BaseType {
                name,
                bit_size,
                encoding,
            } => write!(f, "{name} ({}, {bit_size} bits)", encoding_name(*encoding)),
            TypeRecord::Typedef { name, underlying } => write!(f, "typedef {name} = {underlying}"),
            TypeRecord::Qualified {
                qualifier,
                underlying,
            } => write!(f, "{} {underlying}", qualifier.as_str()),
            TypeRecord::Pointer {
                target, reference, ..
            } => {
                let sigil = if *reference { "&" } else { "*" };
                match target {
                    Some(t) => write!(f, "{t}{sigil}"),
                    None => write!(f, "void{sigil}"),
                }
            }
            TypeRecord::Array {
                element,
                dimensions,
            } => {
                write!(f, "{element}")?;
                for d in dimensions {
                    write!(f, "[{d}]")?;
                }
                Ok(())
            }
            TypeRecord::Vector { element, count } => write!(f, "{element}x{count}"),
            TypeRecord::Struct { name, .. } => {
                if name.is_empty() {
                    write!(f, "struct")
                } else {
                    write!(f, "struct {name}")
                }
            }
            TypeRecord::Enum { name, .. } => write!(f, "enum {name}"),
            TypeRecord::Resource { kind, name } => {
                if name.is_empty() {
                    write!(f, "{}", kind.as_str())
                } else {
                    write!(f, "{name}")
                }
            }
        }
    }
}
