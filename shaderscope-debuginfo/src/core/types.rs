//! Core data types for debug-info queries

use std::fmt;

/// Module-wide instruction number
pub type InstructionOffset = u32;

/// Index of a scope instance in the scope arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a variable instance: one declared variable in one inlining
/// instantiation of its scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableInstanceId(pub u32);

impl VariableInstanceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source location (1-based line and column; column 0 means unknown)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_path, self.line, self.column)
    }
}

/// How minimum-precision scalars are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinPrecisionLayout {
    /// Every min16/min10/min12 scalar occupies a 32-bit slot
    #[default]
    Unpacked,
    /// Native 16-bit storage
    Packed16,
}

/// Kind of storage backing a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Stack slot described by a declare annotation
    Alloca,
    /// SSA value described by a value annotation (optimized code)
    VirtualValue,
}

/// Where (a fragment of) a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    pub kind: StorageKind,
    /// First virtual register of the storage
    pub base_id: u32,
    /// Instruction that produced the storage
    pub instruction: InstructionOffset,
    pub fragment_bit_offset: u64,
    pub fragment_bit_size: u64,
}

/// Register run assigned to a storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub base: u32,
    /// Number of flattened leaves the storage represents
    pub count: u32,
    /// Number of registers actually occupied; bitfields sharing a storage
    /// unit share one register, so `span <= count` for such structs
    pub span: u32,
}

/// Attribution of a store instruction to a flattened member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub member_name_path: String,
    pub register_base: u32,
    /// Index into the run starting at `register_base`
    pub register_index: u32,
}

/// One frame of the inlined call stack at an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedFrame {
    pub function_name: String,
    /// Location in the caller; `None` for the outermost frame
    pub call_site: Option<SourceLocation>,
}

/// Statistics for a loaded module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStats {
    pub functions: usize,
    pub instructions: usize,
    pub types: usize,
    pub scopes: usize,
    pub variable_instances: usize,
    pub line_entries: usize,
    pub registers: u32,
}
