//! Builder for constructing module snapshots
//!
//! Producers that hold debug metadata in memory (and the engine's own tests)
//! use this instead of assembling record vectors by hand. Instructions are
//! appended to the function opened last with [`ModuleBuilder::begin_function`].

use crate::module_snapshot::{
    Address, Capabilities, FileRef, Fragment, FunctionRecord, Instruction, InstructionKind,
    LocationRecord, LocationRef, ModuleSnapshot, ScopeRecord, ScopeRef, SourceFileRecord,
    VariableRecord, VariableRef,
};
use crate::type_info::{MemberRecord, ResourceKind, TypeQualifier, TypeRecord, TypeRef};
use std::collections::HashMap;

/// Builder for [`ModuleSnapshot`]
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    snapshot: ModuleSnapshot,
    /// Source files by path
    file_map: HashMap<String, FileRef>,
    /// Next free instruction offset
    next_offset: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.snapshot.capabilities = capabilities;
        self
    }

    /// Add a source file, returns its reference
    ///
    /// If the path was already added, returns the existing reference.
    pub fn add_file(&mut self, path: &str) -> FileRef {
        if let Some(&id) = self.file_map.get(path) {
            return id;
        }

        let (directory, name) = match path.rfind(['/', '\\']) {
            Some(pos) => (path[..pos].to_string(), path[pos + 1..].to_string()),
            None => (String::new(), path.to_string()),
        };
        let id = FileRef(self.snapshot.files.len() as u32);
        self.snapshot.files.push(SourceFileRecord { directory, name });
        self.file_map.insert(path.to_string(), id);
        id
    }

    pub fn add_type(&mut self, record: TypeRecord) -> TypeRef {
        let id = TypeRef(self.snapshot.types.len() as u32);
        self.snapshot.types.push(record);
        id
    }

    pub fn float_type(&mut self) -> TypeRef {
        self.add_type(TypeRecord::float(32))
    }

    pub fn int_type(&mut self) -> TypeRef {
        self.add_type(TypeRecord::signed_int(32))
    }

    pub fn uint_type(&mut self) -> TypeRef {
        self.add_type(TypeRecord::unsigned_int(32))
    }

    pub fn bool_type(&mut self) -> TypeRef {
        self.add_type(TypeRecord::boolean())
    }

    pub fn base_type(&mut self, name: &str, bit_size: u64, encoding: gimli::DwAte) -> TypeRef {
        self.add_type(TypeRecord::BaseType {
            name: name.to_string(),
            bit_size,
            encoding: encoding.0 as u16,
        })
    }

    pub fn typedef(&mut self, name: &str, underlying: TypeRef) -> TypeRef {
        self.add_type(TypeRecord::Typedef {
            name: name.to_string(),
            underlying,
        })
    }

    pub fn const_of(&mut self, underlying: TypeRef) -> TypeRef {
        self.add_type(TypeRecord::Qualified {
            qualifier: TypeQualifier::Const,
            underlying,
        })
    }

    pub fn pointer_to(&mut self, target: TypeRef) -> TypeRef {
        self.add_type(TypeRecord::Pointer {
            target: Some(target),
            bit_size: 32,
            reference: false,
        })
    }

    pub fn reference_to(&mut self, target: TypeRef) -> TypeRef {
        self.add_type(TypeRecord::Pointer {
            target: Some(target),
            bit_size: 32,
            reference: true,
        })
    }

    pub fn array_of(&mut self, element: TypeRef, dimensions: &[u64]) -> TypeRef {
        self.add_type(TypeRecord::Array {
            element,
            dimensions: dimensions.to_vec(),
        })
    }

    pub fn vector_of(&mut self, element: TypeRef, count: u32) -> TypeRef {
        self.add_type(TypeRecord::Vector { element, count })
    }

    pub fn resource(&mut self, kind: ResourceKind, name: &str) -> TypeRef {
        self.add_type(TypeRecord::Resource {
            kind,
            name: name.to_string(),
        })
    }

    /// Start a struct whose members are laid out with [`StructLayout`]
    pub fn struct_type(&self, name: &str) -> StructLayout {
        StructLayout {
            name: name.to_string(),
            members: Vec::new(),
            base: None,
            cursor: 0,
            align: 8,
        }
    }

    /// Finish a struct started with [`ModuleBuilder::struct_type`]
    pub fn finish_struct(&mut self, layout: StructLayout) -> TypeRef {
        let bit_size = align_up(layout.cursor, layout.align);
        self.add_type(TypeRecord::Struct {
            name: layout.name,
            bit_size,
            members: layout.members,
            base: layout.base,
        })
    }

    /// Bit size of a type under the producer's natural layout
    pub fn type_bit_size(&self, ty: TypeRef) -> u64 {
        self.type_bit_size_with_depth(ty, 0)
    }

    fn type_bit_size_with_depth(&self, ty: TypeRef, depth: usize) -> u64 {
        if depth > 64 {
            return 0;
        }
        match self.snapshot.types.get(ty.0 as usize) {
            Some(TypeRecord::BaseType { bit_size, .. })
            | Some(TypeRecord::Pointer { bit_size, .. })
            | Some(TypeRecord::Struct { bit_size, .. })
            | Some(TypeRecord::Enum { bit_size, .. }) => *bit_size,
            Some(TypeRecord::Typedef { underlying, .. })
            | Some(TypeRecord::Qualified { underlying, .. }) => {
                self.type_bit_size_with_depth(*underlying, depth + 1)
            }
            Some(TypeRecord::Array {
                element,
                dimensions,
            }) => {
                let count: u64 = dimensions.iter().product();
                self.type_bit_size_with_depth(*element, depth + 1) * count
            }
            Some(TypeRecord::Vector { element, count }) => {
                self.type_bit_size_with_depth(*element, depth + 1) * u64::from(*count)
            }
            Some(TypeRecord::Resource { .. }) | None => 0,
        }
    }

    /// Natural alignment in bits (at least one byte)
    fn type_alignment(&self, ty: TypeRef, depth: usize) -> u64 {
        if depth > 64 {
            return 8;
        }
        let align = match self.snapshot.types.get(ty.0 as usize) {
            Some(TypeRecord::BaseType { bit_size, .. })
            | Some(TypeRecord::Pointer { bit_size, .. })
            | Some(TypeRecord::Enum { bit_size, .. }) => *bit_size,
            Some(TypeRecord::Typedef { underlying, .. })
            | Some(TypeRecord::Qualified { underlying, .. }) => {
                self.type_alignment(*underlying, depth + 1)
            }
            Some(TypeRecord::Array { element, .. }) | Some(TypeRecord::Vector { element, .. }) => {
                self.type_alignment(*element, depth + 1)
            }
            Some(TypeRecord::Struct { members, base, .. }) => members
                .iter()
                .map(|m| m.ty)
                .chain(base.iter().copied())
                .map(|t| self.type_alignment(t, depth + 1))
                .max()
                .unwrap_or(8),
            Some(TypeRecord::Resource { .. }) | None => 8,
        };
        align.max(8)
    }

    pub fn subprogram(&mut self, name: &str, file: FileRef, line: u32) -> ScopeRef {
        let id = ScopeRef(self.snapshot.scopes.len() as u32);
        self.snapshot.scopes.push(ScopeRecord::Subprogram {
            name: name.to_string(),
            file,
            line,
        });
        id
    }

    pub fn lexical_block(
        &mut self,
        parent: ScopeRef,
        file: FileRef,
        line: u32,
        column: u32,
    ) -> ScopeRef {
        let id = ScopeRef(self.snapshot.scopes.len() as u32);
        self.snapshot.scopes.push(ScopeRecord::LexicalBlock {
            parent,
            file,
            line,
            column,
        });
        id
    }

    pub fn location(&mut self, line: u32, column: u32, scope: ScopeRef) -> LocationRef {
        self.add_location(line, column, scope, None)
    }

    pub fn inlined_location(
        &mut self,
        line: u32,
        column: u32,
        scope: ScopeRef,
        inlined_at: LocationRef,
    ) -> LocationRef {
        self.add_location(line, column, scope, Some(inlined_at))
    }

    fn add_location(
        &mut self,
        line: u32,
        column: u32,
        scope: ScopeRef,
        inlined_at: Option<LocationRef>,
    ) -> LocationRef {
        let id = LocationRef(self.snapshot.locations.len() as u32);
        self.snapshot.locations.push(LocationRecord {
            line,
            column,
            scope,
            inlined_at,
        });
        id
    }

    pub fn variable(
        &mut self,
        name: &str,
        ty: TypeRef,
        scope: ScopeRef,
        file: FileRef,
        line: u32,
    ) -> VariableRef {
        self.add_variable(name, ty, scope, None, file, line)
    }

    pub fn parameter(
        &mut self,
        name: &str,
        ty: TypeRef,
        scope: ScopeRef,
        arg: u32,
        file: FileRef,
        line: u32,
    ) -> VariableRef {
        self.add_variable(name, ty, scope, Some(arg), file, line)
    }

    fn add_variable(
        &mut self,
        name: &str,
        ty: TypeRef,
        scope: ScopeRef,
        arg: Option<u32>,
        file: FileRef,
        line: u32,
    ) -> VariableRef {
        let id = VariableRef(self.snapshot.variables.len() as u32);
        self.snapshot.variables.push(VariableRecord {
            name: name.to_string(),
            ty,
            scope,
            arg,
            file,
            line,
        });
        id
    }

    /// Begin a new function; subsequent instructions are appended to it
    pub fn begin_function(&mut self, name: &str, subprogram: Option<ScopeRef>) {
        self.snapshot.functions.push(FunctionRecord {
            name: name.to_string(),
            subprogram,
            instructions: Vec::new(),
        });
    }

    /// Append an instruction, returns its module-wide offset
    ///
    /// Opens an anonymous function when none was begun.
    pub fn emit(&mut self, kind: InstructionKind, location: Option<LocationRef>) -> u32 {
        if self.snapshot.functions.is_empty() {
            self.begin_function("", None);
        }
        let offset = self.next_offset;
        self.next_offset += 1;
        if let Some(func) = self.snapshot.functions.last_mut() {
            func.instructions.push(Instruction { kind, location });
        }
        offset
    }

    pub fn alloca(&mut self, bit_size: u64, location: Option<LocationRef>) -> u32 {
        self.emit(InstructionKind::Alloca { bit_size }, location)
    }

    /// Alloca sized for a debug type
    pub fn alloca_for(&mut self, ty: TypeRef, location: Option<LocationRef>) -> u32 {
        let bit_size = self.type_bit_size(ty);
        self.alloca(bit_size, location)
    }

    pub fn value(&mut self, bit_size: u64, location: Option<LocationRef>) -> u32 {
        self.emit(InstructionKind::Value { bit_size }, location)
    }

    pub fn store(
        &mut self,
        base: u32,
        bit_offset: u64,
        bit_size: u64,
        location: Option<LocationRef>,
    ) -> u32 {
        self.emit(
            InstructionKind::Store {
                address: Address { base, bit_offset },
                bit_size,
            },
            location,
        )
    }

    pub fn dbg_declare(
        &mut self,
        variable: VariableRef,
        storage: u32,
        location: Option<LocationRef>,
    ) -> u32 {
        self.emit(
            InstructionKind::DbgDeclare {
                variable,
                storage,
                fragment: None,
            },
            location,
        )
    }

    pub fn dbg_value(
        &mut self,
        variable: VariableRef,
        value: u32,
        fragment: Option<Fragment>,
        location: Option<LocationRef>,
    ) -> u32 {
        self.emit(
            InstructionKind::DbgValue {
                variable,
                value,
                fragment,
            },
            location,
        )
    }

    pub fn other(&mut self, opcode: &str, location: Option<LocationRef>) -> u32 {
        self.emit(
            InstructionKind::Other {
                opcode: opcode.to_string(),
            },
            location,
        )
    }

    pub fn ret(&mut self, location: Option<LocationRef>) -> u32 {
        self.emit(InstructionKind::Return, location)
    }

    pub fn build(self) -> ModuleSnapshot {
        self.snapshot
    }
}

/// Sequential struct member layout with natural alignment
#[derive(Debug, Clone)]
pub struct StructLayout {
    name: String,
    members: Vec<MemberRecord>,
    base: Option<TypeRef>,
    /// Next free bit
    cursor: u64,
    align: u64,
}

impl StructLayout {
    /// Derive from `base`; the base occupies the start of the struct
    pub fn base(mut self, builder: &ModuleBuilder, base: TypeRef) -> Self {
        self.base = Some(base);
        self.cursor = builder.type_bit_size(base);
        self.align = self.align.max(builder.type_alignment(base, 0));
        self
    }

    /// Append a member at the next naturally aligned offset
    pub fn field(mut self, builder: &ModuleBuilder, name: &str, ty: TypeRef) -> Self {
        let align = builder.type_alignment(ty, 0);
        let offset = align_up(self.cursor, align);
        self.cursor = offset + builder.type_bit_size(ty);
        self.align = self.align.max(align);
        self.members.push(MemberRecord {
            name: name.to_string(),
            ty,
            bit_offset: offset,
            bit_size: None,
        });
        self
    }

    /// Append a bitfield, packing it after the previous bitfield when it fits
    /// the same storage unit the way C compilers do
    pub fn bitfield(
        mut self,
        builder: &ModuleBuilder,
        name: &str,
        ty: TypeRef,
        width: u64,
    ) -> Self {
        let unit = builder.type_bit_size(ty).max(1);
        let unit_start = (self.cursor / unit) * unit;
        let offset = if self.cursor + width > unit_start + unit {
            align_up(self.cursor, unit)
        } else {
            self.cursor
        };
        self.cursor = offset + width;
        self.align = self.align.max(builder.type_alignment(ty, 0));
        self.members.push(MemberRecord {
            name: name.to_string(),
            ty,
            bit_offset: offset,
            bit_size: Some(width),
        });
        self
    }

    /// Append a member at an explicit offset (for producer-specific packing)
    pub fn field_at(
        mut self,
        name: &str,
        ty: TypeRef,
        bit_offset: u64,
        bit_size: Option<u64>,
    ) -> Self {
        self.cursor = self.cursor.max(bit_offset + bit_size.unwrap_or(0));
        self.members.push(MemberRecord {
            name: name.to_string(),
            ty,
            bit_offset,
            bit_size,
        });
        self
    }

    /// Force the total size, e.g. when `field_at` members carry their own sizes
    pub fn size(mut self, bit_size: u64) -> Self {
        self.cursor = bit_size;
        self.align = 8;
        self
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        value
    } else {
        value.div_ceil(align) * align
    }
}
