//! Indexes built from a module snapshot at load time

pub(crate) mod line_mapping;
pub(crate) mod path;
pub(crate) mod scope_tree;
pub(crate) mod type_model;

pub use line_mapping::{LineEntry, PathMatchOptions, SourceLocationIndex};
pub use scope_tree::{ScopeKind, ScopeNode, ScopeTree, ScopeTreeBuilder, VariableInstance};
pub use type_model::{
    AliasKind, BasicType, DebugType, DebugTypeModel, FieldInfo, StructField, StructType, TypeId,
};

pub(crate) use path::join_paths;
