//! Module snapshot: the debug metadata records of one compiled shader module
//!
//! A snapshot is what the producer hands over after compilation: the type
//! table, the lexical scope records, the debug locations attached to
//! instructions and the per-function instruction streams with their
//! declare/value annotations. Instructions are numbered module-wide in
//! ingestion order (function order, then body order); that number is the
//! instruction offset used by every query.

use crate::type_info::{TypeRecord, TypeRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_ref {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

record_ref!(FileRef, "!file");
record_ref!(ScopeRef, "!scope");
record_ref!(LocationRef, "!loc");
record_ref!(VariableRef, "!var");

/// Version-gated features of the producing compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Module was compiled with native 16-bit types, so minimum-precision
    /// scalars may be packed into 16-bit storage
    #[serde(default)]
    pub native_16bit_types: bool,
}

/// Source file as referenced by scopes and variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileRecord {
    #[serde(default)]
    pub directory: String,
    pub name: String,
}

/// Lexical scope metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScopeRecord {
    /// Function definition
    Subprogram {
        name: String,
        file: FileRef,
        line: u32,
    },
    /// `{ }` block, loop body, branch arm
    LexicalBlock {
        parent: ScopeRef,
        file: FileRef,
        line: u32,
        column: u32,
    },
}

impl ScopeRecord {
    pub fn file(&self) -> FileRef {
        match self {
            ScopeRecord::Subprogram { file, .. } | ScopeRecord::LexicalBlock { file, .. } => *file,
        }
    }
}

/// Debug location attached to an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    pub scope: ScopeRef,
    /// Call-site location when this location belongs to an inlined body
    #[serde(default)]
    pub inlined_at: Option<LocationRef>,
}

/// Source-level variable or parameter declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    pub ty: TypeRef,
    pub scope: ScopeRef,
    /// 1-based argument number for parameters
    #[serde(default)]
    pub arg: Option<u32>,
    pub file: FileRef,
    pub line: u32,
}

/// Bit range of a variable described by a declare/value annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub bit_offset: u64,
    pub bit_size: u64,
}

impl Fragment {
    pub fn new(bit_offset: u64, bit_size: u64) -> Self {
        Self {
            bit_offset,
            bit_size,
        }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.bit_offset + self.bit_size
    }

    #[inline]
    pub fn contains_bit(&self, bit: u64) -> bool {
        bit >= self.bit_offset && bit < self.end()
    }
}

/// Address computed from an alloca plus a constant bit offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Instruction offset of the alloca
    pub base: u32,
    #[serde(default)]
    pub bit_offset: u64,
}

/// Instruction shapes the engine distinguishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InstructionKind {
    /// Stack slot for a local
    Alloca { bit_size: u64 },
    /// Any SSA-value-producing instruction
    Value { bit_size: u64 },
    /// Scalar store into an alloca
    Store { address: Address, bit_size: u64 },
    /// Write to a shader output; not backed by an alloca
    StoreOutput { bit_size: u64 },
    /// Whole-aggregate copy between allocas
    MemCopy { dst: u32, src: u32, bit_size: u64 },
    Call { callee: String },
    /// Variable lives in memory at `storage` (an alloca offset)
    DbgDeclare {
        variable: VariableRef,
        storage: u32,
        #[serde(default)]
        fragment: Option<Fragment>,
    },
    /// Variable (or a fragment of it) currently holds SSA value `value`
    DbgValue {
        variable: VariableRef,
        value: u32,
        #[serde(default)]
        fragment: Option<Fragment>,
    },
    Return,
    Other { opcode: String },
}

impl InstructionKind {
    /// Whether the instruction produces storage that receives a register
    pub fn produces_storage(&self) -> bool {
        matches!(
            self,
            InstructionKind::Alloca { .. } | InstructionKind::Value { .. }
        )
    }

    /// Declare/value annotations carry no code of their own
    pub fn is_debug_annotation(&self) -> bool {
        matches!(
            self,
            InstructionKind::DbgDeclare { .. } | InstructionKind::DbgValue { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(flatten)]
    pub kind: InstructionKind,
    #[serde(default)]
    pub location: Option<LocationRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    /// Subprogram scope of the function definition, absent for functions
    /// without debug info
    #[serde(default)]
    pub subprogram: Option<ScopeRef>,
    pub instructions: Vec<Instruction>,
}

/// Everything the engine needs from one compiled module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    #[serde(default)]
    pub capabilities: Capabilities,
    pub files: Vec<SourceFileRecord>,
    pub types: Vec<TypeRecord>,
    pub scopes: Vec<ScopeRecord>,
    pub locations: Vec<LocationRecord>,
    pub variables: Vec<VariableRecord>,
    pub functions: Vec<FunctionRecord>,
}

impl ModuleSnapshot {
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instructions.len()).sum()
    }

    /// Iterate `(offset, function index, instruction)` in offset order
    pub fn instructions(&self) -> impl Iterator<Item = (u32, usize, &Instruction)> + '_ {
        self.functions
            .iter()
            .enumerate()
            .flat_map(|(fi, f)| f.instructions.iter().map(move |inst| (fi, inst)))
            .enumerate()
            .map(|(offset, (fi, inst))| (offset as u32, fi, inst))
    }

    /// Instruction at a module-wide offset, skipping whole functions
    pub fn instruction(&self, offset: u32) -> Option<&Instruction> {
        let mut rest = offset as usize;
        for function in &self.functions {
            if rest < function.instructions.len() {
                return function.instructions.get(rest);
            }
            rest -= function.instructions.len();
        }
        None
    }

    pub fn file(&self, file: FileRef) -> Option<&SourceFileRecord> {
        self.files.get(file.index())
    }

    pub fn scope(&self, scope: ScopeRef) -> Option<&ScopeRecord> {
        self.scopes.get(scope.index())
    }

    pub fn location(&self, location: LocationRef) -> Option<&LocationRecord> {
        self.locations.get(location.index())
    }

    pub fn variable(&self, variable: VariableRef) -> Option<&VariableRecord> {
        self.variables.get(variable.index())
    }

    pub fn type_record(&self, ty: TypeRef) -> Option<&TypeRecord> {
        self.types.get(ty.0 as usize)
    }
}
