//! Member flattening: decompose a variable's type into addressable leaves

use crate::core::{DebugInfoError, Result};
use crate::data::{DebugType, DebugTypeModel, TypeId};
use shaderscope_protocol::Fragment;
use tracing::debug;

const MAX_FLATTEN_DEPTH: usize = 64;

/// Naturally aligned container a leaf is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageUnit {
    pub bit_offset: u64,
    pub bit_size: u64,
}

impl StorageUnit {
    #[inline]
    pub fn end(&self) -> u64 {
        self.bit_offset + self.bit_size
    }
}

/// One scalar component of a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedMember {
    /// Dot/bracket-joined path, e.g. `s.arr[1][0].x`
    pub name_path: String,
    /// Resolved leaf type
    pub ty: TypeId,
    /// Relative to the start of the flattened storage
    pub bit_offset: u64,
    /// Declared width for bitfields, otherwise the type's size
    pub bit_size: u64,
    pub bitfield_width: Option<u64>,
    pub storage_unit: StorageUnit,
    /// Bitfield range runs past the end of its storage unit
    pub crosses_storage_unit: bool,
}

impl FlattenedMember {
    #[inline]
    pub fn end(&self) -> u64 {
        self.bit_offset + self.bit_size
    }

    #[inline]
    pub fn contains_bit(&self, bit: u64) -> bool {
        bit >= self.bit_offset && bit < self.end()
    }
}

/// Leaves of one variable (or sub-storage), in storage order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flattening {
    pub members: Vec<FlattenedMember>,
    /// Set when some bitfield crosses its storage unit. Offsets and sizes are
    /// still exact, but leaves sharing a physical register cannot be derived
    /// reliably for such fields.
    pub partial_coverage: bool,
}

impl Flattening {
    fn from_members(members: Vec<FlattenedMember>) -> Self {
        let partial_coverage = members.iter().any(|m| m.crosses_storage_unit);
        Self {
            members,
            partial_coverage,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members, or `PartialCoverage` when the decomposition has a known gap
    pub fn into_complete(self, variable: &str) -> Result<Vec<FlattenedMember>> {
        if self.partial_coverage {
            return Err(DebugInfoError::PartialCoverage {
                variable: variable.to_string(),
            });
        }
        Ok(self.members)
    }

    /// Keep only leaves overlapping `fragment`
    pub fn restrict_to(&self, fragment: Fragment) -> Flattening {
        Self::from_members(
            self.members
                .iter()
                .filter(|m| m.bit_offset < fragment.end() && m.end() > fragment.bit_offset)
                .cloned()
                .collect(),
        )
    }

    /// Distinct storage units in first-use order
    pub fn storage_units(&self) -> Vec<StorageUnit> {
        let mut units: Vec<StorageUnit> = Vec::new();
        for m in &self.members {
            if !units.contains(&m.storage_unit) {
                units.push(m.storage_unit);
            }
        }
        units
    }

    /// Leaf holding `bit`, or the first leaf starting after it
    pub fn leaf_at_or_after(&self, bit: u64) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.contains_bit(bit))
            .or_else(|| self.members.iter().position(|m| m.bit_offset >= bit))
    }

    pub fn find(&self, name_path: &str) -> Option<&FlattenedMember> {
        self.members.iter().find(|m| m.name_path == name_path)
    }
}

/// Result of checking leaves against a declared size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    pub declared_bits: u64,
    pub leaf_bits: u64,
    /// Gaps between leaves, plus leading and trailing gaps
    pub padding_bits: u64,
    /// Pairs of overlapping leaves
    pub overlaps: Vec<(String, String)>,
}

impl CoverageReport {
    pub fn is_consistent(&self) -> bool {
        self.overlaps.is_empty() && self.leaf_bits + self.padding_bits == self.declared_bits
    }
}

/// Account leaf bits and padding against `declared_bits`
pub fn coverage_report(members: &[FlattenedMember], declared_bits: u64) -> CoverageReport {
    let mut sorted: Vec<&FlattenedMember> = members.iter().collect();
    sorted.sort_by_key(|m| (m.bit_offset, m.bit_size));

    let mut report = CoverageReport {
        declared_bits,
        ..Default::default()
    };
    let mut cursor = 0u64;
    let mut last: Option<&FlattenedMember> = None;
    for m in sorted {
        report.leaf_bits += m.bit_size;
        if m.bit_offset > cursor {
            report.padding_bits += m.bit_offset - cursor;
        } else if m.bit_offset < cursor {
            if let Some(prev) = last {
                report
                    .overlaps
                    .push((prev.name_path.clone(), m.name_path.clone()));
            }
        }
        if m.end() > cursor {
            cursor = m.end();
            last = Some(m);
        }
    }
    if declared_bits > cursor {
        report.padding_bits += declared_bits - cursor;
    }
    report
}

/// Component suffix for vector element `i`
pub(crate) fn component_suffix(i: u32, count: u32) -> String {
    const NAMES: [&str; 4] = ["x", "y", "z", "w"];
    if count <= 4 {
        format!(".{}", NAMES[i as usize])
    } else {
        format!("[{i}]")
    }
}

/// Recursive type walker producing leaves
pub struct MemberFlattener<'a> {
    types: &'a DebugTypeModel,
}

impl<'a> MemberFlattener<'a> {
    pub fn new(types: &'a DebugTypeModel) -> Self {
        Self { types }
    }

    /// Flatten `ty` with leaf names prefixed by `prefix`, offsets from 0
    pub fn flatten(&self, ty: TypeId, prefix: &str) -> Result<Flattening> {
        self.flatten_at(ty, prefix, 0, None)
    }

    /// Flatten a sub-storage located at `bit_offset`. `bitfield_width` is set
    /// when the sub-storage is itself a bitfield member.
    pub fn flatten_at(
        &self,
        ty: TypeId,
        prefix: &str,
        bit_offset: u64,
        bitfield_width: Option<u64>,
    ) -> Result<Flattening> {
        let members = self.walk(ty, prefix.to_string(), bit_offset, bitfield_width, 0)?;
        let flattening = Flattening::from_members(members);
        if flattening.partial_coverage {
            debug!(
                "MemberFlattener: '{}' has bitfields crossing their storage unit",
                prefix
            );
        }
        Ok(flattening)
    }

    fn walk(
        &self,
        ty: TypeId,
        path: String,
        offset: u64,
        bitfield_width: Option<u64>,
        depth: usize,
    ) -> Result<Vec<FlattenedMember>> {
        if depth > MAX_FLATTEN_DEPTH {
            return Err(DebugInfoError::malformed(format!(
                "type nesting too deep while flattening '{path}'"
            )));
        }
        let resolved = self.types.resolve_to_underlying(ty)?;
        let node = self
            .types
            .get(resolved)
            .ok_or_else(|| DebugInfoError::NotFound(format!("{resolved}")))?;

        match node {
            DebugType::Basic(b) => {
                let natural = self.types.basic_bit_size(b);
                Ok(vec![Self::leaf(path, resolved, offset, natural, bitfield_width)])
            }
            DebugType::Enum { bit_size, .. } => {
                Ok(vec![Self::leaf(path, resolved, offset, *bit_size, bitfield_width)])
            }
            // Only untyped pointers survive resolution
            DebugType::Pointer { bit_size, .. } => {
                Ok(vec![Self::leaf(path, resolved, offset, *bit_size, None)])
            }
            DebugType::Array {
                element,
                dimensions,
            } => {
                let stride = self.types.bit_size(*element)?;
                let total: u64 = dimensions.iter().product();
                let mut out = Vec::new();
                for linear in 0..total {
                    let mut suffix = String::new();
                    let mut rest = linear;
                    let mut divisor = total;
                    for dim in dimensions {
                        divisor /= dim;
                        suffix.push_str(&format!("[{}]", rest / divisor));
                        rest %= divisor;
                    }
                    out.extend(self.walk(
                        *element,
                        format!("{path}{suffix}"),
                        offset + linear * stride,
                        None,
                        depth + 1,
                    )?);
                }
                Ok(out)
            }
            DebugType::Vector { element, count } => {
                let stride = self.types.bit_size(*element)?;
                let mut out = Vec::new();
                for i in 0..*count {
                    out.extend(self.walk(
                        *element,
                        format!("{path}{}", component_suffix(i, *count)),
                        offset + u64::from(i) * stride,
                        None,
                        depth + 1,
                    )?);
                }
                Ok(out)
            }
            DebugType::Struct(s) => {
                let mut out = Vec::new();
                // Base fields share the derived prefix and origin
                if let Some(base) = s.base {
                    out.extend(self.walk(base, path.clone(), offset, None, depth + 1)?);
                }
                for field in &s.fields {
                    let field_path = if field.name.is_empty() {
                        path.clone()
                    } else {
                        format!("{path}.{}", field.name)
                    };
                    out.extend(self.walk(
                        field.ty,
                        field_path,
                        offset + field.bit_offset,
                        field.bitfield_width,
                        depth + 1,
                    )?);
                }
                Ok(out)
            }
            DebugType::Resource { .. } => Ok(Vec::new()),
            DebugType::Alias { .. } => Err(DebugInfoError::malformed(format!(
                "alias {resolved} survived resolution while flattening '{path}'"
            ))),
        }
    }

    fn leaf(
        name_path: String,
        ty: TypeId,
        bit_offset: u64,
        natural_size: u64,
        bitfield_width: Option<u64>,
    ) -> FlattenedMember {
        match bitfield_width {
            Some(width) => {
                let unit_size = if natural_size == 0 { width } else { natural_size };
                // Zero-width bitfields over a sizeless type still need a unit
                let unit_size = unit_size.max(1);
                let unit_offset = (bit_offset / unit_size) * unit_size;
                let storage_unit = StorageUnit {
                    bit_offset: unit_offset,
                    bit_size: unit_size,
                };
                FlattenedMember {
                    name_path,
                    ty,
                    bit_offset,
                    bit_size: width,
                    bitfield_width: Some(width),
                    storage_unit,
                    crosses_storage_unit: bit_offset + width > storage_unit.end(),
                }
            }
            None => FlattenedMember {
                name_path,
                ty,
                bit_offset,
                bit_size: natural_size,
                bitfield_width: None,
                storage_unit: StorageUnit {
                    bit_offset,
                    bit_size: natural_size,
                },
                crosses_storage_unit: false,
            },
        }
    }
}
