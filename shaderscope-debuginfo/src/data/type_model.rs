//! Debug type model
//!
//! Types are stored by index ([`TypeId`]) in a flat arena built once from the
//! module's type records. All references are indices, so shared element and
//! base types are stored once and lookups never chase boxed trees.

use crate::core::{DebugInfoError, MinPrecisionLayout, Result};
use shaderscope_protocol::{is_min_precision_name, ResourceKind, TypeQualifier, TypeRecord};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Index of a type in the model (same numbering as the module's type records)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<shaderscope_protocol::TypeRef> for TypeId {
    fn from(r: shaderscope_protocol::TypeRef) -> Self {
        TypeId(r.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Layers that resolution strips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    Typedef,
    Const,
    Volatile,
    Restrict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicType {
    pub name: String,
    /// Width declared by the producer
    pub bit_size: u64,
    pub encoding: gimli::DwAte,
    /// min16float/min16int/... whose storage width depends on the layout
    pub min_precision: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: TypeId,
    pub bit_offset: u64,
    /// Declared width when the field is a bitfield
    pub bitfield_width: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: Option<String>,
    pub bit_size: u64,
    pub fields: Vec<StructField>,
    pub base: Option<TypeId>,
}

/// Source-level type
#[derive(Debug, Clone, PartialEq)]
pub enum DebugType {
    Basic(BasicType),
    Alias {
        name: Option<String>,
        kind: AliasKind,
        target: TypeId,
    },
    Pointer {
        target: Option<TypeId>,
        bit_size: u64,
        is_reference: bool,
    },
    Array {
        element: TypeId,
        /// Outermost dimension first
        dimensions: Vec<u64>,
    },
    Vector {
        element: TypeId,
        count: u32,
    },
    Struct(StructType),
    Enum {
        name: String,
        bit_size: u64,
    },
    Resource {
        kind: ResourceKind,
        name: String,
    },
}

/// Field as reported to a debugger host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Empty for the synthetic base-class field
    pub name: String,
    pub ty: TypeId,
    pub offset_in_bits: u64,
    pub size_in_bits: u64,
    pub bitfield_width: Option<u64>,
    pub is_base: bool,
}

/// Guard for walks that do not track visited sets
const MAX_TYPE_DEPTH: usize = 64;

/// Immutable arena of debug types
#[derive(Debug, Clone)]
pub struct DebugTypeModel {
    types: Vec<DebugType>,
    layout: MinPrecisionLayout,
}

impl DebugTypeModel {
    /// Build the model from a module's type records, rejecting dangling
    /// references and cyclic type graphs
    pub fn from_records(records: &[TypeRecord], layout: MinPrecisionLayout) -> Result<Self> {
        let len = records.len();
        let check = |r: shaderscope_protocol::TypeRef, owner: usize| -> Result<TypeId> {
            if (r.0 as usize) < len {
                Ok(TypeId(r.0))
            } else {
                Err(DebugInfoError::malformed(format!(
                    "type {owner} references missing type {}",
                    r.0
                )))
            }
        };

        let mut types = Vec::with_capacity(len);
        for (idx, record) in records.iter().enumerate() {
            let ty = match record {
                TypeRecord::BaseType {
                    name,
                    bit_size,
                    encoding,
                } => DebugType::Basic(BasicType {
                    name: name.clone(),
                    bit_size: *bit_size,
                    encoding: gimli::DwAte(*encoding as u8),
                    min_precision: is_min_precision_name(name),
                }),
                TypeRecord::Typedef { name, underlying } => DebugType::Alias {
                    name: Some(name.clone()).filter(|n| !n.is_empty()),
                    kind: AliasKind::Typedef,
                    target: check(*underlying, idx)?,
                },
                TypeRecord::Qualified {
                    qualifier,
                    underlying,
                } => DebugType::Alias {
                    name: None,
                    kind: match qualifier {
                        TypeQualifier::Const => AliasKind::Const,
                        TypeQualifier::Volatile => AliasKind::Volatile,
                        TypeQualifier::Restrict => AliasKind::Restrict,
                    },
                    target: check(*underlying, idx)?,
                },
                TypeRecord::Pointer {
                    target,
                    bit_size,
                    reference,
                } => DebugType::Pointer {
                    target: target.map(|t| check(t, idx)).transpose()?,
                    bit_size: *bit_size,
                    is_reference: *reference,
                },
                TypeRecord::Array {
                    element,
                    dimensions,
                } => {
                    if dimensions.is_empty() || dimensions.contains(&0) {
                        return Err(DebugInfoError::malformed(format!(
                            "array type {idx} has invalid dimensions {dimensions:?}"
                        )));
                    }
                    DebugType::Array {
                        element: check(*element, idx)?,
                        dimensions: dimensions.clone(),
                    }
                }
                TypeRecord::Vector { element, count } => {
                    if *count == 0 {
                        return Err(DebugInfoError::malformed(format!(
                            "vector type {idx} has no components"
                        )));
                    }
                    DebugType::Vector {
                        element: check(*element, idx)?,
                        count: *count,
                    }
                }
                TypeRecord::Struct {
                    name,
                    bit_size,
                    members,
                    base,
                } => {
                    let mut fields = Vec::with_capacity(members.len());
                    let mut last_offset = 0u64;
                    for m in members {
                        if m.bit_offset < last_offset {
                            return Err(DebugInfoError::malformed(format!(
                                "struct type {idx}: member '{}' at bit {} precedes bit {}",
                                m.name, m.bit_offset, last_offset
                            )));
                        }
                        last_offset = m.bit_offset;
                        fields.push(StructField {
                            name: m.name.clone(),
                            ty: check(m.ty, idx)?,
                            bit_offset: m.bit_offset,
                            bitfield_width: m.bit_size,
                        });
                    }
                    DebugType::Struct(StructType {
                        name: Some(name.clone()).filter(|n| !n.is_empty()),
                        bit_size: *bit_size,
                        fields,
                        base: base.map(|b| check(b, idx)).transpose()?,
                    })
                }
                TypeRecord::Enum { name, bit_size } => DebugType::Enum {
                    name: name.clone(),
                    bit_size: *bit_size,
                },
                TypeRecord::Resource { kind, name } => DebugType::Resource {
                    kind: *kind,
                    name: name.clone(),
                },
            };
            types.push(ty);
        }

        let model = Self { types, layout };
        model.check_acyclic()?;
        for idx in 0..model.types.len() {
            model.resolve_to_underlying(TypeId(idx as u32))?;
        }
        debug!(
            "DebugTypeModel: built {} types ({:?} layout)",
            model.types.len(),
            layout
        );
        Ok(model)
    }

    /// Reject cycles through containment edges (alias, element, field, base).
    /// Pointer edges are excluded; resolution guards those separately.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.types.len()];
        for root in 0..self.types.len() {
            if marks[root] != Mark::New {
                continue;
            }
            // (node, next child index)
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Active;
            while let Some((node, child_idx)) = stack.pop() {
                let children = self.containment_edges(TypeId(node as u32));
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let child = children[child_idx].index();
                    match marks[child] {
                        Mark::Active => {
                            return Err(DebugInfoError::malformed(format!(
                                "type graph cycle through type {child}"
                            )));
                        }
                        Mark::New => {
                            marks[child] = Mark::Active;
                            stack.push((child, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                }
            }
        }
        Ok(())
    }

    fn containment_edges(&self, id: TypeId) -> Vec<TypeId> {
        match &self.types[id.index()] {
            DebugType::Alias { target, .. } => vec![*target],
            DebugType::Array { element, .. } | DebugType::Vector { element, .. } => vec![*element],
            DebugType::Struct(s) => s
                .fields
                .iter()
                .map(|f| f.ty)
                .chain(s.base.iter().copied())
                .collect(),
            DebugType::Basic(_)
            | DebugType::Pointer { .. }
            | DebugType::Enum { .. }
            | DebugType::Resource { .. } => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn layout(&self) -> MinPrecisionLayout {
        self.layout
    }

    pub fn get(&self, id: TypeId) -> Option<&DebugType> {
        self.types.get(id.index())
    }

    /// Strip typedef/const/volatile/restrict and pointer/reference wrappers
    /// until a basic, array, vector, struct, enum or resource node is reached.
    /// An untyped pointer (`void*`) is returned as is.
    pub fn resolve_to_underlying(&self, id: TypeId) -> Result<TypeId> {
        let mut visited = HashSet::new();
        let mut current = id;
        loop {
            if !visited.insert(current) {
                return Err(DebugInfoError::malformed(format!(
                    "cyclic alias chain while resolving {id}"
                )));
            }
            match self.get(current) {
                Some(DebugType::Alias { target, .. }) => current = *target,
                Some(DebugType::Pointer {
                    target: Some(target),
                    ..
                }) => current = *target,
                Some(_) => return Ok(current),
                None => {
                    return Err(DebugInfoError::NotFound(format!("{current}")));
                }
            }
        }
    }

    /// Resolved type node; lookup failures collapse to `None`
    pub fn underlying(&self, id: TypeId) -> Option<(TypeId, &DebugType)> {
        let resolved = self.resolve_to_underlying(id).ok()?;
        self.get(resolved).map(|t| (resolved, t))
    }

    /// Display name as a debugger shows it
    pub fn name_of(&self, id: TypeId) -> String {
        self.name_with_depth(id, 0)
    }

    fn name_with_depth(&self, id: TypeId, depth: usize) -> String {
        if depth > MAX_TYPE_DEPTH {
            return "<recursive>".to_string();
        }
        match self.get(id) {
            None => format!("<invalid:{}>", id.0),
            Some(DebugType::Basic(b)) => b.name.clone(),
            Some(DebugType::Alias { name, kind, target }) => match kind {
                AliasKind::Typedef => match name {
                    Some(n) => n.clone(),
                    None => self.name_with_depth(*target, depth + 1),
                },
                AliasKind::Const => format!("const {}", self.name_with_depth(*target, depth + 1)),
                AliasKind::Volatile => {
                    format!("volatile {}", self.name_with_depth(*target, depth + 1))
                }
                AliasKind::Restrict => {
                    format!("restrict {}", self.name_with_depth(*target, depth + 1))
                }
            },
            Some(DebugType::Pointer {
                target,
                is_reference,
                ..
            }) => {
                let inner = match target {
                    Some(t) => self.name_with_depth(*t, depth + 1),
                    None => "void".to_string(),
                };
                format!("{inner}{}", if *is_reference { "&" } else { "*" })
            }
            Some(DebugType::Array { element, .. }) => {
                format!("{}[]", self.name_with_depth(*element, depth + 1))
            }
            Some(DebugType::Vector { element, count }) => {
                format!("{}{}", self.name_with_depth(*element, depth + 1), count)
            }
            Some(DebugType::Struct(s)) => s.name.clone().unwrap_or_else(|| "<unnamed>".to_string()),
            Some(DebugType::Enum { name, .. }) => {
                if name.is_empty() {
                    "<unnamed>".to_string()
                } else {
                    name.clone()
                }
            }
            Some(DebugType::Resource { kind, name }) => {
                if name.is_empty() {
                    kind.as_str().to_string()
                } else {
                    name.clone()
                }
            }
        }
    }

    /// Storage width of a basic type under the active layout
    pub fn basic_bit_size(&self, basic: &BasicType) -> u64 {
        if !basic.min_precision {
            return basic.bit_size;
        }
        match self.layout {
            MinPrecisionLayout::Packed16 => 16,
            MinPrecisionLayout::Unpacked => basic.bit_size.max(32),
        }
    }

    /// Size in bits; resources have no storage and report 0
    pub fn bit_size(&self, id: TypeId) -> Result<u64> {
        self.bit_size_with_depth(id, 0)
    }

    fn bit_size_with_depth(&self, id: TypeId, depth: usize) -> Result<u64> {
        if depth > MAX_TYPE_DEPTH {
            return Err(DebugInfoError::malformed(format!(
                "type nesting too deep while sizing {id}"
            )));
        }
        match self.get(id) {
            None => Err(DebugInfoError::NotFound(format!("{id}"))),
            Some(DebugType::Basic(b)) => Ok(self.basic_bit_size(b)),
            Some(DebugType::Alias { target, .. }) => self.bit_size_with_depth(*target, depth + 1),
            Some(DebugType::Pointer { bit_size, .. }) => Ok(*bit_size),
            Some(DebugType::Array {
                element,
                dimensions,
            }) => {
                let elem = self.bit_size_with_depth(*element, depth + 1)?;
                Ok(elem * dimensions.iter().product::<u64>())
            }
            Some(DebugType::Vector { element, count }) => {
                Ok(self.bit_size_with_depth(*element, depth + 1)? * u64::from(*count))
            }
            Some(DebugType::Struct(s)) => Ok(s.bit_size),
            Some(DebugType::Enum { bit_size, .. }) => Ok(*bit_size),
            Some(DebugType::Resource { .. }) => Ok(0),
        }
    }

    /// Struct node behind `id`, after resolution
    pub fn struct_type(&self, id: TypeId) -> Option<&StructType> {
        match self.underlying(id)? {
            (_, DebugType::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_resource(&self, id: TypeId) -> bool {
        matches!(self.underlying(id), Some((_, DebugType::Resource { .. })))
    }

    /// Declared fields plus one synthetic field for the base, if any
    pub fn struct_field_count(&self, id: TypeId) -> usize {
        self.struct_type(id)
            .map(|s| s.fields.len() + usize::from(s.base.is_some()))
            .unwrap_or(0)
    }

    /// Field `index` in declaration order; the base class, when present, is the
    /// empty-named field after the declared ones, located at offset 0
    pub fn struct_field_by_index(&self, id: TypeId, index: usize) -> Option<FieldInfo> {
        let s = self.struct_type(id)?;
        if let Some(field) = s.fields.get(index) {
            return Some(self.field_info(field));
        }
        match s.base {
            Some(base) if index == s.fields.len() => Some(FieldInfo {
                name: String::new(),
                ty: base,
                offset_in_bits: 0,
                size_in_bits: self.bit_size(base).unwrap_or(0),
                bitfield_width: None,
                is_base: true,
            }),
            _ => None,
        }
    }

    pub fn struct_base_type(&self, id: TypeId) -> Option<TypeId> {
        self.struct_type(id)?.base
    }

    /// Look a field up by name, searching declared fields first and then the
    /// base chain (base fields share the derived struct's origin). The empty
    /// name selects the base itself.
    pub fn find_field(&self, id: TypeId, name: &str) -> Option<FieldInfo> {
        self.find_field_with_depth(id, name, 0)
    }

    fn find_field_with_depth(&self, id: TypeId, name: &str, depth: usize) -> Option<FieldInfo> {
        if depth > MAX_TYPE_DEPTH {
            return None;
        }
        let s = self.struct_type(id)?;
        if name.is_empty() {
            return self.struct_field_by_index(id, s.fields.len());
        }
        if let Some(field) = s.fields.iter().find(|f| f.name == name) {
            return Some(self.field_info(field));
        }
        let base = s.base?;
        self.find_field_with_depth(base, name, depth + 1)
    }

    fn field_info(&self, field: &StructField) -> FieldInfo {
        FieldInfo {
            name: field.name.clone(),
            ty: field.ty,
            offset_in_bits: field.bit_offset,
            size_in_bits: field
                .bitfield_width
                .unwrap_or_else(|| self.bit_size(field.ty).unwrap_or(0)),
            bitfield_width: field.bitfield_width,
            is_base: false,
        }
    }
}
