//! Virtual register allocation for variable storage
//!
//! Every storage-producing instruction (alloca or SSA value) gets a run of
//! consecutive virtual registers, assigned in instruction order so numbering
//! is stable for a given module. Allocas described by a declare annotation
//! get one register per storage unit of the declared variable's leaves;
//! bitfields packed into one unit share a register.

use crate::core::{
    DebugInfoError, InstructionOffset, RegisterRange, Result, StorageKind, StorageLocation,
    VariableInstanceId, WriteRecord,
};
use crate::data::{DebugTypeModel, ScopeTree, TypeId};
use crate::parser::{Flattening, MemberFlattener};
use shaderscope_protocol::{Fragment, Instruction, InstructionKind, ModuleSnapshot};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Width of one virtual register for undescribed storage
const REGISTER_BITS: u64 = 32;

/// Declared-variable layout of an alloca
#[derive(Debug, Clone)]
struct DeclaredLayout {
    instance: VariableInstanceId,
    fragment: Fragment,
    flattening: Flattening,
    /// Register index (within the run) for each leaf
    leaf_register: Vec<u32>,
}

#[derive(Debug, Clone)]
struct AllocatedStorage {
    kind: StorageKind,
    base: u32,
    span: u32,
    count: u32,
    declared: Option<DeclaredLayout>,
}

/// Declare annotation: variable fragment lives in an alloca
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclareBinding {
    pub at: InstructionOffset,
    pub storage: InstructionOffset,
    pub fragment: Fragment,
}

/// Value annotation: variable fragment currently holds an SSA value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBinding {
    pub at: InstructionOffset,
    pub value: InstructionOffset,
    pub fragment: Fragment,
    function: usize,
}

/// Variable, type, name and fragment an alloca was declared for
type PendingLayout = (VariableInstanceId, TypeId, String, Fragment);

/// Register assignment for one module
#[derive(Debug, Default)]
pub struct VirtualRegisterAllocator {
    runs: HashMap<InstructionOffset, AllocatedStorage>,
    declares: HashMap<VariableInstanceId, Vec<DeclareBinding>>,
    values: HashMap<VariableInstanceId, Vec<ValueBinding>>,
    /// Function index per instruction offset
    instruction_function: Vec<usize>,
    next_register: u32,
}

impl VirtualRegisterAllocator {
    pub fn build(
        snapshot: &ModuleSnapshot,
        scopes: &ScopeTree,
        types: &DebugTypeModel,
    ) -> Result<Self> {
        let mut allocator = Self {
            instruction_function: vec![0; snapshot.instruction_count()],
            ..Default::default()
        };
        let flattener = MemberFlattener::new(types);

        // Pass 1: collect annotations so allocas know their variables
        let mut alloca_layout: HashMap<InstructionOffset, PendingLayout> = HashMap::new();
        for (offset, fi, inst) in snapshot.instructions() {
            allocator.instruction_function[offset as usize] = fi;
            let (variable, target, fragment, is_declare) = match &inst.kind {
                InstructionKind::DbgDeclare {
                    variable,
                    storage,
                    fragment,
                } => (*variable, *storage, *fragment, true),
                InstructionKind::DbgValue {
                    variable,
                    value,
                    fragment,
                } => (*variable, *value, *fragment, false),
                _ => continue,
            };

            let inlined_at = match inst.location {
                Some(loc) => snapshot.location(loc).and_then(|l| l.inlined_at),
                None => None,
            };
            let Some(instance) = scopes.variable_instance_of(variable, inlined_at) else {
                warn!(
                    "VirtualRegisterAllocator: annotation @{} names unknown variable instance {}",
                    offset, variable
                );
                continue;
            };
            let record = snapshot.variable(variable).ok_or_else(|| {
                DebugInfoError::malformed(format!(
                    "annotation @{offset} references missing {variable}"
                ))
            })?;
            let ty = TypeId::from(record.ty);
            let fragment = match fragment {
                Some(f) => f,
                None => Fragment::new(0, types.bit_size(ty)?),
            };

            if is_declare {
                let target_is_alloca = snapshot
                    .instruction(target)
                    .map(|i| matches!(i.kind, InstructionKind::Alloca { .. }))
                    .unwrap_or(false);
                if !target_is_alloca {
                    warn!(
                        "VirtualRegisterAllocator: declare @{} of '{}' targets non-alloca @{}",
                        offset, record.name, target
                    );
                    continue;
                }
                alloca_layout
                    .entry(target)
                    .or_insert_with(|| (instance, ty, record.name.clone(), fragment));
                allocator.declares.entry(instance).or_default().push(DeclareBinding {
                    at: offset,
                    storage: target,
                    fragment,
                });
            } else {
                allocator.values.entry(instance).or_default().push(ValueBinding {
                    at: offset,
                    value: target,
                    fragment,
                    function: fi,
                });
            }
        }

        // Pass 2: registers in instruction order
        for (offset, _fi, inst) in snapshot.instructions() {
            let storage = match &inst.kind {
                InstructionKind::Alloca { bit_size } => match alloca_layout.get(&offset) {
                    Some((instance, ty, name, fragment)) => {
                        let flattening = flattener.flatten(*ty, name)?.restrict_to(*fragment);
                        let units = flattening.storage_units();
                        let leaf_register = flattening
                            .members
                            .iter()
                            .map(|m| {
                                units
                                    .iter()
                                    .position(|u| *u == m.storage_unit)
                                    .unwrap_or(0) as u32
                            })
                            .collect();
                        AllocatedStorage {
                            kind: StorageKind::Alloca,
                            base: allocator.next_register,
                            span: units.len() as u32,
                            count: flattening.len() as u32,
                            declared: Some(DeclaredLayout {
                                instance: *instance,
                                fragment: *fragment,
                                flattening,
                                leaf_register,
                            }),
                        }
                    }
                    None => {
                        let span = bit_size.div_ceil(REGISTER_BITS).max(1) as u32;
                        AllocatedStorage {
                            kind: StorageKind::Alloca,
                            base: allocator.next_register,
                            span,
                            count: span,
                            declared: None,
                        }
                    }
                },
                InstructionKind::Value { .. } => AllocatedStorage {
                    kind: StorageKind::VirtualValue,
                    base: allocator.next_register,
                    span: 1,
                    count: 1,
                    declared: None,
                },
                _ => continue,
            };

            if storage.kind == StorageKind::Alloca {
                debug!(
                    "VirtualRegisterAllocator: alloca @{} -> base r{} span {} ({} leaves)",
                    offset, storage.base, storage.span, storage.count
                );
            }
            allocator.next_register += storage.span;
            allocator.runs.insert(offset, storage);
        }

        for bindings in allocator.declares.values_mut() {
            bindings.sort_by_key(|b| b.at);
        }
        for bindings in allocator.values.values_mut() {
            bindings.sort_by_key(|b| b.at);
        }

        debug!(
            "VirtualRegisterAllocator: {} storage runs, {} registers",
            allocator.runs.len(),
            allocator.next_register
        );
        Ok(allocator)
    }

    pub fn total_registers(&self) -> u32 {
        self.next_register
    }

    pub fn declares_of(&self, instance: VariableInstanceId) -> &[DeclareBinding] {
        self.declares.get(&instance).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn values_of(&self, instance: VariableInstanceId) -> &[ValueBinding] {
        self.values.get(&instance).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register run of a storage location
    pub fn register_for(&self, storage: &StorageLocation) -> Option<RegisterRange> {
        let run = self.runs.get(&storage.instruction)?;
        Some(RegisterRange {
            base: run.base,
            count: run.count,
            span: run.span,
        })
    }

    /// Run produced by the instruction at `offset`
    pub fn register_at(&self, offset: InstructionOffset) -> Option<RegisterRange> {
        self.runs.get(&offset).map(|run| RegisterRange {
            base: run.base,
            count: run.count,
            span: run.span,
        })
    }

    /// Storage of a variable instance in effect at `at`, one entry per
    /// fragment. Declared storage takes precedence over value bindings.
    pub fn storage_for(
        &self,
        instance: VariableInstanceId,
        at: InstructionOffset,
    ) -> Vec<StorageLocation> {
        let declares = self.declares_of(instance);
        if !declares.is_empty() {
            let mut by_fragment: Vec<DeclareBinding> = Vec::new();
            for binding in declares {
                match by_fragment.iter_mut().find(|b| b.fragment == binding.fragment) {
                    // Later declares replace earlier ones once reached
                    Some(existing) if binding.at <= at => *existing = *binding,
                    Some(_) => {}
                    None => by_fragment.push(*binding),
                }
            }
            return by_fragment
                .into_iter()
                .filter_map(|b| {
                    let run = self.runs.get(&b.storage)?;
                    Some(StorageLocation {
                        kind: StorageKind::Alloca,
                        base_id: run.base,
                        instruction: b.storage,
                        fragment_bit_offset: b.fragment.bit_offset,
                        fragment_bit_size: b.fragment.bit_size,
                    })
                })
                .collect();
        }

        let function = self.instruction_function.get(at as usize).copied();
        let mut by_fragment: Vec<ValueBinding> = Vec::new();
        for binding in self.values_of(instance) {
            if binding.at > at || Some(binding.function) != function {
                continue;
            }
            match by_fragment.iter_mut().find(|b| b.fragment == binding.fragment) {
                Some(existing) => *existing = *binding,
                None => by_fragment.push(*binding),
            }
        }
        by_fragment
            .into_iter()
            .filter_map(|b| {
                let run = self.runs.get(&b.value)?;
                Some(StorageLocation {
                    kind: StorageKind::VirtualValue,
                    base_id: run.base,
                    instruction: b.value,
                    fragment_bit_offset: b.fragment.bit_offset,
                    fragment_bit_size: b.fragment.bit_size,
                })
            })
            .collect()
    }

    /// Register holding variable bit `bit` at `at`
    pub fn register_for_bit(
        &self,
        instance: VariableInstanceId,
        bit: u64,
        at: InstructionOffset,
    ) -> Option<u32> {
        let storages = self.storage_for(instance, at);
        let storage = storages
            .iter()
            .find(|s| {
                bit >= s.fragment_bit_offset && bit < s.fragment_bit_offset + s.fragment_bit_size
            })
            .or_else(|| {
                // Zero-sized leaves (e.g. an empty struct) sit at the fragment end
                storages.iter().find(|s| bit == s.fragment_bit_offset)
            })?;
        let run = self.runs.get(&storage.instruction)?;
        match (&run.declared, storage.kind) {
            (Some(layout), StorageKind::Alloca) => {
                let leaf = layout.flattening.leaf_at_or_after(bit)?;
                Some(run.base + layout.leaf_register[leaf])
            }
            (None, StorageKind::Alloca) => {
                let index = ((bit - storage.fragment_bit_offset) / REGISTER_BITS) as u32;
                Some(run.base + index.min(run.span.saturating_sub(1)))
            }
            (_, StorageKind::VirtualValue) => Some(run.base),
        }
    }

    /// Attribute a store to the flattened member it writes
    pub fn record_write(
        &self,
        offset: InstructionOffset,
        inst: &Instruction,
    ) -> Result<WriteRecord> {
        let (address, bit_size) = match &inst.kind {
            InstructionKind::Store { address, bit_size } => (*address, *bit_size),
            InstructionKind::MemCopy { .. } => {
                return Err(DebugInfoError::not_structured(offset, "whole-aggregate copy"));
            }
            InstructionKind::StoreOutput { .. } => {
                return Err(DebugInfoError::not_structured(offset, "write to a shader output"));
            }
            _ => {
                return Err(DebugInfoError::not_structured(offset, "not a store"));
            }
        };

        let run = self.runs.get(&address.base).ok_or_else(|| {
            DebugInfoError::not_structured(
                offset,
                format!("store target @{} is not an alloca", address.base),
            )
        })?;
        let layout = run.declared.as_ref().ok_or_else(|| {
            DebugInfoError::not_structured(
                offset,
                format!("alloca @{} has no declared variable", address.base),
            )
        })?;

        let var_bit = layout.fragment.bit_offset + address.bit_offset;
        let members = &layout.flattening.members;
        let leaf = members
            .iter()
            .position(|m| m.bit_offset == var_bit && m.bit_size == bit_size)
            .or_else(|| {
                // Bitfields are written through their whole storage unit
                members.iter().position(|m| {
                    m.bitfield_width.is_some()
                        && m.storage_unit.bit_offset == var_bit
                        && m.storage_unit.bit_size == bit_size
                })
            })
            .ok_or_else(|| {
                DebugInfoError::not_structured(
                    offset,
                    format!("{bit_size}-bit store at bit {var_bit} does not match a single member"),
                )
            })?;

        debug!(
            "VirtualRegisterAllocator: store @{} writes '{}' (instance {:?})",
            offset, members[leaf].name_path, layout.instance
        );
        Ok(WriteRecord {
            member_name_path: members[leaf].name_path.clone(),
            register_base: run.base,
            register_index: layout.leaf_register[leaf],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MinPrecisionLayout;
    use crate::data::ScopeTreeBuilder;
    use shaderscope_protocol::{ModuleBuilder, TypeRecord};

    struct Fixture {
        snapshot: ModuleSnapshot,
        scopes: ScopeTree,
        allocator: VirtualRegisterAllocator,
    }

    fn build(b: ModuleBuilder) -> Fixture {
        let snapshot = b.build();
        let types =
            DebugTypeModel::from_records(&snapshot.types, MinPrecisionLayout::Unpacked).unwrap();
        let scopes = ScopeTreeBuilder::new(&snapshot).build().unwrap();
        let allocator = VirtualRegisterAllocator::build(&snapshot, &scopes, &types).unwrap();
        Fixture {
            snapshot,
            scopes,
            allocator,
        }
    }

    fn inst(f: &Fixture, offset: u32) -> &Instruction {
        f.snapshot.instruction(offset).unwrap()
    }

    #[test]
    fn test_struct_alloca_gets_one_register_per_member() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("main.hlsl");
        let float = b.float_type();
        let int = b.int_type();
        let layout = b.struct_type("S").field(&b, "f", float).field(&b, "i", int);
        let s = b.finish_struct(layout);
        let main = b.subprogram("main", file, 1);
        let var = b.variable("s", s, main, file, 2);
        b.begin_function("main", Some(main));
        let loc = b.location(2, 1, main);
        let scratch = b.alloca(32, Some(loc));
        let a = b.alloca_for(s, Some(loc));
        b.dbg_declare(var, a, Some(loc));
        let st_f = b.store(a, 0, 32, Some(loc));
        let st_i = b.store(a, 32, 32, Some(loc));
        let st_wide = b.store(a, 0, 64, Some(loc));
        let f = build(b);

        let range = f.allocator.register_at(a).unwrap();
        assert_eq!(range, RegisterRange { base: 1, count: 2, span: 2 });
        assert_eq!(f.allocator.register_at(scratch).unwrap().base, 0);

        let w = f.allocator.record_write(st_i, inst(&f, st_i)).unwrap();
        assert_eq!(w.member_name_path, "s.i");
        assert_eq!((w.register_base, w.register_index), (1, 1));
        assert_eq!(f.allocator.record_write(st_f, inst(&f, st_f)).unwrap().register_index, 0);
        assert!(matches!(
            f.allocator.record_write(st_wide, inst(&f, st_wide)),
            Err(DebugInfoError::NotAStructuredWrite { .. })
        ));

        let instance = f.scopes.variable_instance_of(var, None).unwrap();
        assert_eq!(f.allocator.register_for_bit(instance, 32, st_i), Some(2));
    }

    #[test]
    fn test_value_bindings_follow_program_order() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("main.hlsl");
        let float = b.add_type(TypeRecord::float(32));
        let main = b.subprogram("main", file, 1);
        let x = b.variable("x", float, main, file, 2);
        b.begin_function("main", Some(main));
        let loc = b.location(2, 1, main);
        let v0 = b.value(32, Some(loc));
        b.dbg_value(x, v0, None, Some(loc));
        let mid = b.other("fmul", Some(loc));
        let v1 = b.value(32, Some(loc));
        b.dbg_value(x, v1, None, Some(loc));
        let end = b.ret(Some(loc));
        let f = build(b);

        let instance = f.scopes.variable_instance_of(x, None).unwrap();
        assert_eq!(f.allocator.register_for_bit(instance, 0, mid), Some(0));
        assert_eq!(f.allocator.register_for_bit(instance, 0, end), Some(1));
        assert_eq!(f.allocator.register_for_bit(instance, 0, v0), None);
        let storage = f.allocator.storage_for(instance, end);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage[0].kind, StorageKind::VirtualValue);
    }

    #[test]
    fn test_non_store_writes_are_rejected() {
        let mut b = ModuleBuilder::new();
        let a = b.alloca(64, None);
        let c = b.alloca(64, None);
        let copy = b.emit(
            InstructionKind::MemCopy {
                dst: a,
                src: c,
                bit_size: 64,
            },
            None,
        );
        let undeclared = b.store(a, 0, 32, None);
        let f = build(b);

        assert_eq!(f.allocator.register_at(a).unwrap().span, 2);
        assert!(f.allocator.record_write(copy, inst(&f, copy)).is_err());
        assert!(f.allocator.record_write(undeclared, inst(&f, undeclared)).is_err());
    }
}
