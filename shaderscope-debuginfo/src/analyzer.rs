//! Main debug-info facade - unified entry point for all queries
//!
//! Built once per module by the load step, then read-only. Lookups that find
//! nothing return `None` or an empty vector; only attributing a store to a
//! member reports an error value, since "not a structured write" is an
//! expected answer for aggregate copies.

use crate::{
    allocator::VirtualRegisterAllocator,
    config::EngineConfig,
    core::{
        DebugInfoError, InlinedFrame, InstructionOffset, MinPrecisionLayout, ModuleStats,
        RegisterRange, Result, ScopeId, SourceLocation, WriteRecord,
    },
    data::{
        join_paths, DebugTypeModel, FieldInfo, ScopeKind, ScopeTree, SourceLocationIndex, TypeId,
    },
    loader::load_module,
    storage::Variable,
};
use shaderscope_protocol::{LocationRef, ModuleSnapshot};
use std::path::Path;
use tracing::debug;

/// Debug information of one loaded shader module
#[derive(Debug)]
pub struct DebugInfo {
    pub(crate) snapshot: ModuleSnapshot,
    pub(crate) types: DebugTypeModel,
    pub(crate) scopes: ScopeTree,
    pub(crate) lines: SourceLocationIndex,
    pub(crate) allocator: VirtualRegisterAllocator,
    config: EngineConfig,
    /// Normalized path per file record
    file_paths: Vec<String>,
    /// Function index per instruction offset
    instruction_function: Vec<usize>,
    diagnostics: Vec<DebugInfoError>,
}

impl DebugInfo {
    /// Run the load step over a snapshot
    pub fn load(snapshot: ModuleSnapshot, config: &EngineConfig) -> Result<Self> {
        load_module(snapshot, config)
    }

    /// Load a snapshot serialized as JSON
    pub fn from_json_str(json: &str, config: &EngineConfig) -> Result<Self> {
        let snapshot: ModuleSnapshot = serde_json::from_str(json)?;
        Self::load(snapshot, config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P, config: &EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading module snapshot from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, config)
    }

    pub(crate) fn from_parts(
        snapshot: ModuleSnapshot,
        types: DebugTypeModel,
        scopes: ScopeTree,
        lines: SourceLocationIndex,
        allocator: VirtualRegisterAllocator,
        config: EngineConfig,
        diagnostics: Vec<DebugInfoError>,
    ) -> Self {
        let file_paths = snapshot
            .files
            .iter()
            .map(|f| join_paths(&f.directory, &f.name))
            .collect();
        let instruction_function = snapshot.instructions().map(|(_, fi, _)| fi).collect();
        Self {
            snapshot,
            types,
            scopes,
            lines,
            allocator,
            config,
            file_paths,
            instruction_function,
            diagnostics,
        }
    }

    /// Recoverable problems found while loading (e.g. an unsupported
    /// packing request that fell back to the unpacked layout)
    pub fn diagnostics(&self) -> &[DebugInfoError] {
        &self.diagnostics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> MinPrecisionLayout {
        self.types.layout()
    }

    pub fn snapshot(&self) -> &ModuleSnapshot {
        &self.snapshot
    }

    pub fn types(&self) -> &DebugTypeModel {
        &self.types
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn line_table(&self) -> &SourceLocationIndex {
        &self.lines
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_function.len()
    }

    /// Name of the innermost function at `offset`; inside an inlined body
    /// this is the inlined callee. Falls back to the containing function
    /// record for instructions without a debug location.
    pub fn function_name(&self, offset: InstructionOffset) -> Option<String> {
        if let Some(name) = self
            .scopes
            .innermost_scope(offset)
            .and_then(|s| self.scopes.enclosing_subprogram(s))
            .and_then(|s| self.subprogram_name(s))
        {
            return Some(name);
        }
        let fi = *self.instruction_function.get(offset as usize)?;
        self.snapshot
            .functions
            .get(fi)
            .map(|f| f.name.clone())
            .filter(|n| !n.is_empty())
    }

    fn subprogram_name(&self, scope: ScopeId) -> Option<String> {
        match &self.scopes.node(scope)?.kind {
            ScopeKind::Subprogram { name } => Some(name.clone()),
            ScopeKind::LexicalBlock => None,
        }
    }

    /// Instruction offsets for a source position, ascending; column 0
    /// matches any column
    pub fn instruction_offsets_from_source_location(
        &self,
        file_path: &str,
        line: u32,
        column: u32,
    ) -> Vec<InstructionOffset> {
        self.lines
            .instruction_offsets_from_location(file_path, line, column)
    }

    /// Source location of an instruction followed by its inlined call sites,
    /// innermost first
    pub fn source_locations_from_instruction_offset(
        &self,
        offset: InstructionOffset,
    ) -> Vec<SourceLocation> {
        self.lines.locations_from_instruction_offset(offset)
    }

    /// Variables in scope at `offset`, innermost scope first
    pub fn live_variables_at(&self, offset: InstructionOffset) -> Vec<Variable<'_>> {
        self.scopes
            .variables_visible_at(offset, self.config.variables.hide_shadowed)
            .into_iter()
            .filter_map(|id| Variable::new(self, id, offset))
            .collect()
    }

    /// Innermost visible variable named `name`
    pub fn variable_at(&self, offset: InstructionOffset, name: &str) -> Option<Variable<'_>> {
        self.scopes
            .variables_visible_at(offset, false)
            .into_iter()
            .filter_map(|id| Variable::new(self, id, offset))
            .find(|v| v.name() == name)
    }

    /// Register run backing variable `name` at `offset`
    pub fn register_for_variable(
        &self,
        offset: InstructionOffset,
        name: &str,
    ) -> Option<RegisterRange> {
        let var = self.variable_at(offset, name)?;
        let storage = var.storage_locations().into_iter().next()?;
        self.allocator.register_for(&storage)
    }

    /// Register run produced by a storage instruction
    pub fn register_for_instruction(&self, offset: InstructionOffset) -> Option<RegisterRange> {
        self.allocator.register_at(offset)
    }

    /// Attribute the store at `offset` to the flattened member it writes
    pub fn record_write(&self, offset: InstructionOffset) -> Result<WriteRecord> {
        let inst = self
            .snapshot
            .instruction(offset)
            .ok_or_else(|| DebugInfoError::NotFound(format!("instruction @{offset}")))?;
        self.allocator.record_write(offset, inst)
    }

    /// Inlined call stack at `offset`, innermost frame first
    pub fn stack_at(&self, offset: InstructionOffset) -> Vec<InlinedFrame> {
        let mut frames = Vec::new();
        let mut current = self.scopes.innermost_scope(offset);
        while let Some(scope) = current {
            let Some(sp) = self.scopes.enclosing_subprogram(scope) else {
                break;
            };
            let function_name = self.subprogram_name(sp).unwrap_or_default();
            let call_site = self.scopes.inlined_call_site(sp);
            frames.push(InlinedFrame {
                function_name,
                call_site: call_site.and_then(|loc| self.resolve_location(loc)),
            });
            current = match call_site {
                Some(_) => self.scopes.node(sp).and_then(|n| n.parent),
                None => None,
            };
        }
        frames
    }

    fn resolve_location(&self, loc: LocationRef) -> Option<SourceLocation> {
        let record = self.snapshot.location(loc)?;
        let scope = self.snapshot.scope(record.scope)?;
        Some(SourceLocation {
            file_path: self.file_paths.get(scope.file().index())?.clone(),
            line: record.line,
            column: record.column,
        })
    }

    pub fn type_name(&self, ty: TypeId) -> String {
        self.types.name_of(ty)
    }

    pub fn struct_field_by_index(&self, ty: TypeId, index: usize) -> Option<FieldInfo> {
        self.types.struct_field_by_index(ty, index)
    }

    pub fn struct_field_count(&self, ty: TypeId) -> usize {
        self.types.struct_field_count(ty)
    }

    pub fn struct_base_type(&self, ty: TypeId) -> Option<TypeId> {
        self.types.struct_base_type(ty)
    }

    /// Statistics for this module
    pub fn module_stats(&self) -> ModuleStats {
        ModuleStats {
            functions: self.snapshot.functions.len(),
            instructions: self.instruction_count(),
            types: self.types.len(),
            scopes: self.scopes.len(),
            variable_instances: self.scopes.variable_instances().len(),
            line_entries: self.lines.total_entries(),
            registers: self.allocator.total_registers(),
        }
    }
}
