//! Shaderscope Protocol Library
//!
//! Record types describing the debug metadata of a compiled shader module,
//! shared between producers and the debug-info engine.

pub mod builder;
pub mod module_snapshot;
pub mod type_info;

pub use builder::{ModuleBuilder, StructLayout};

pub use module_snapshot::{
    Address, Capabilities, FileRef, Fragment, FunctionRecord, Instruction, InstructionKind,
    LocationRecord, LocationRef, ModuleSnapshot, ScopeRecord, ScopeRef, SourceFileRecord,
    VariableRecord, VariableRef,
};

pub use type_info::{
    encoding_name, is_min_precision_name, MemberRecord, ResourceKind, TypeQualifier, TypeRecord,
    TypeRef,
};
