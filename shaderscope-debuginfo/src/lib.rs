//! Shaderscope Debug-Info Library
//!
//! Source-level debug information for compiled shader modules: scope and
//! variable lookup at instruction offsets (inlining aware), line tables,
//! member flattening of aggregate types and virtual register assignment.

// Core modules
pub mod core;

// Internal implementation modules
pub(crate) mod allocator;
pub(crate) mod data;
pub(crate) mod loader;
pub(crate) mod parser;
pub(crate) mod storage;

pub mod config;

// Main entry point
pub mod analyzer;

// Re-export main public API only
pub use analyzer::DebugInfo;
pub use config::{EngineConfig, LogLevel};
pub use loader::{LoadConfig, ModuleLoader, ModuleLoadingEvent, ModuleLoadingStats};
pub use storage::{Storage, Variable};

pub use allocator::{DeclareBinding, ValueBinding, VirtualRegisterAllocator};
pub use data::{
    AliasKind, BasicType, DebugType, DebugTypeModel, FieldInfo, LineEntry, PathMatchOptions,
    ScopeKind, ScopeNode, ScopeTree, ScopeTreeBuilder, SourceLocationIndex, StructField,
    StructType, TypeId, VariableInstance,
};
pub use parser::{
    coverage_report, CoverageReport, FlattenedMember, Flattening, MemberFlattener, StorageUnit,
};

// Re-export essential core types
pub use core::{
    DebugInfoError, InlinedFrame, InstructionOffset, MinPrecisionLayout, ModuleStats,
    RegisterRange, Result, ScopeId, SourceLocation, StorageKind, StorageLocation,
    VariableInstanceId, WriteRecord,
};

// Snapshot records come from the protocol crate
pub use shaderscope_protocol::{ModuleBuilder, ModuleSnapshot};
