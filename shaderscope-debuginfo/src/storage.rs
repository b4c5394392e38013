//! Variable and storage handles returned by [`DebugInfo`] queries
//!
//! Handles borrow the loaded module and are evaluated against the instruction
//! offset they were obtained at, so a variable whose value moves between SSA
//! values in optimized code reports the register current at that point.

use crate::analyzer::DebugInfo;
use crate::core::{InstructionOffset, Result, StorageLocation, VariableInstanceId};
use crate::data::{DebugType, TypeId};
use crate::parser::{component_suffix, Flattening, MemberFlattener};
use shaderscope_protocol::{LocationRef, VariableRecord};

/// A source variable live at an instruction
#[derive(Debug, Clone, Copy)]
pub struct Variable<'a> {
    info: &'a DebugInfo,
    instance: VariableInstanceId,
    record: &'a VariableRecord,
    inlined_at: Option<LocationRef>,
    at: InstructionOffset,
}

impl<'a> Variable<'a> {
    pub(crate) fn new(
        info: &'a DebugInfo,
        instance: VariableInstanceId,
        at: InstructionOffset,
    ) -> Option<Self> {
        let inst = info.scopes.variable(instance)?;
        let record = info.snapshot.variable(inst.variable)?;
        Some(Self {
            info,
            instance,
            record,
            inlined_at: inst.inlined_at,
            at,
        })
    }

    pub fn name(&self) -> &'a str {
        &self.record.name
    }

    pub fn instance(&self) -> VariableInstanceId {
        self.instance
    }

    pub fn type_id(&self) -> TypeId {
        TypeId::from(self.record.ty)
    }

    pub fn type_name(&self) -> String {
        self.info.types.name_of(self.type_id())
    }

    /// 1-based argument number for parameters
    pub fn arg(&self) -> Option<u32> {
        self.record.arg
    }

    pub fn declared_line(&self) -> u32 {
        self.record.line
    }

    /// Call site of the inlined body this instance belongs to
    pub fn inlined_at(&self) -> Option<LocationRef> {
        self.inlined_at
    }

    /// Raw storage locations in effect, one per described fragment
    pub fn storage_locations(&self) -> Vec<StorageLocation> {
        self.info.allocator.storage_for(self.instance, self.at)
    }

    /// Root storage handle; `None` when the variable has no storage at this
    /// point (optimized out, or before its first value annotation)
    pub fn storage(&self) -> Option<Storage<'a>> {
        if self.storage_locations().is_empty() {
            return None;
        }
        Some(Storage {
            info: self.info,
            instance: self.instance,
            at: self.at,
            ty: self.type_id(),
            skip_dims: 0,
            bit_offset: 0,
            name_path: self.record.name.clone(),
            bitfield_width: None,
        })
    }

    pub fn flatten(&self) -> Result<Flattening> {
        MemberFlattener::new(&self.info.types).flatten(self.type_id(), self.name())
    }
}

/// View of (part of) a variable's storage
#[derive(Debug, Clone)]
pub struct Storage<'a> {
    info: &'a DebugInfo,
    instance: VariableInstanceId,
    at: InstructionOffset,
    ty: TypeId,
    /// Array dimensions already consumed by `index`
    skip_dims: usize,
    /// Relative to the variable start
    bit_offset: u64,
    name_path: String,
    bitfield_width: Option<u64>,
}

impl<'a> Storage<'a> {
    pub fn name_path(&self) -> &str {
        &self.name_path
    }

    /// Declared type; for a partially indexed array this is still the array
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    pub fn bit_offset(&self) -> u64 {
        self.bit_offset
    }

    pub fn bit_size(&self) -> u64 {
        if let Some(width) = self.bitfield_width {
            return width;
        }
        match (self.skip_dims, self.array_shape()) {
            (skip, Some((element, dims))) if skip > 0 => {
                let elem = self.info.types.bit_size(element).unwrap_or(0);
                elem * dims[skip..].iter().product::<u64>()
            }
            _ => self.info.types.bit_size(self.ty).unwrap_or(0),
        }
    }

    fn array_shape(&self) -> Option<(TypeId, &'a [u64])> {
        match self.info.types.underlying(self.ty)? {
            (_, DebugType::Array {
                element,
                dimensions,
            }) => Some((*element, dimensions.as_slice())),
            _ => None,
        }
    }

    /// Member `name`, searched through declared fields and then the base
    /// chain. The empty name selects the base class part.
    pub fn access_field(&self, name: &str) -> Option<Storage<'a>> {
        if self.skip_dims > 0 {
            return None;
        }
        let field = self.info.types.find_field(self.ty, name)?;
        let name_path = if name.is_empty() {
            self.name_path.clone()
        } else {
            format!("{}.{}", self.name_path, name)
        };
        Some(Storage {
            info: self.info,
            instance: self.instance,
            at: self.at,
            ty: field.ty,
            skip_dims: 0,
            bit_offset: self.bit_offset + field.offset_in_bits,
            name_path,
            bitfield_width: field.bitfield_width,
        })
    }

    /// Element `i` of the outermost remaining array dimension, or component
    /// `i` of a vector
    pub fn index(&self, i: u64) -> Option<Storage<'a>> {
        let (_, node) = self.info.types.underlying(self.ty)?;
        match node {
            DebugType::Array {
                element,
                dimensions,
            } => {
                let dim = *dimensions.get(self.skip_dims)?;
                if i >= dim {
                    return None;
                }
                let elem = self.info.types.bit_size(*element).ok()?;
                let stride = elem * dimensions[self.skip_dims + 1..].iter().product::<u64>();
                let last = self.skip_dims + 1 == dimensions.len();
                Some(Storage {
                    info: self.info,
                    instance: self.instance,
                    at: self.at,
                    ty: if last { *element } else { self.ty },
                    skip_dims: if last { 0 } else { self.skip_dims + 1 },
                    bit_offset: self.bit_offset + i * stride,
                    name_path: format!("{}[{}]", self.name_path, i),
                    bitfield_width: None,
                })
            }
            DebugType::Vector { element, count } if self.skip_dims == 0 => {
                let i = u32::try_from(i).ok().filter(|i| i < count)?;
                let elem = self.info.types.bit_size(*element).ok()?;
                Some(Storage {
                    info: self.info,
                    instance: self.instance,
                    at: self.at,
                    ty: *element,
                    skip_dims: 0,
                    bit_offset: self.bit_offset + u64::from(i) * elem,
                    name_path: format!("{}{}", self.name_path, component_suffix(i, *count)),
                    bitfield_width: None,
                })
            }
            _ => None,
        }
    }

    /// Virtual register holding the first bit of this view; `None` for
    /// resources and for storage with no register
    pub fn register_number(&self) -> Option<u32> {
        if self.info.types.is_resource(self.ty) {
            return None;
        }
        self.info
            .allocator
            .register_for_bit(self.instance, self.bit_offset, self.at)
    }

    /// Leaves of this view, named from its own path
    pub fn flatten(&self) -> Result<Flattening> {
        if self.skip_dims == 0 {
            return MemberFlattener::new(&self.info.types).flatten_at(
                self.ty,
                &self.name_path,
                self.bit_offset,
                self.bitfield_width,
            );
        }
        let dim = self
            .array_shape()
            .and_then(|(_, dims)| dims.get(self.skip_dims).copied())
            .unwrap_or(0);
        let mut members = Vec::new();
        let mut partial_coverage = false;
        for i in 0..dim {
            if let Some(element) = self.index(i) {
                let part = element.flatten()?;
                partial_coverage |= part.partial_coverage;
                members.extend(part.members);
            }
        }
        Ok(Flattening {
            members,
            partial_coverage,
        })
    }

    /// Register of every leaf, in leaf order
    pub fn leaf_registers(&self) -> Result<Vec<(String, Option<u32>)>> {
        Ok(self
            .flatten()?
            .members
            .into_iter()
            .map(|m| {
                let reg = self
                    .info
                    .allocator
                    .register_for_bit(self.instance, m.bit_offset, self.at);
                (m.name_path, reg)
            })
            .collect())
    }
}
