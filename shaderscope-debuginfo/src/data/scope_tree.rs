//! Scope-instance tree (blockvector-like, inlining aware)
//!
//! This module builds a compact scope index for a whole module:
//! - One node per (lexical scope, inlined-at location) pair, so every inlined
//!   instantiation of a function body gets its own nodes and variables
//! - Instruction ranges per node, derived from the debug locations attached to
//!   instructions and propagated to all enclosing nodes
//! - Variable instances attached to the node that declared them
//! - Fast lookup of the scope chain and visible variables at an offset

use crate::core::{DebugInfoError, InstructionOffset, Result, ScopeId, VariableInstanceId};
use shaderscope_protocol::{
    FileRef, InstructionKind, LocationRef, ModuleSnapshot, ScopeRecord, ScopeRef, VariableRef,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Subprogram or lexical block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Subprogram { name: String },
    LexicalBlock,
}

/// One instantiation of a lexical scope
#[derive(Debug, Clone)]
pub struct ScopeNode {
    pub kind: ScopeKind,
    pub lexical: ScopeRef,
    /// Call site of the inlined body this node belongs to
    pub inlined_at: Option<LocationRef>,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub file: FileRef,
    pub line: u32,
    /// Sorted, coalesced half-open offset ranges
    pub ranges: Vec<(InstructionOffset, InstructionOffset)>,
    /// Variables declared directly in this node
    pub variables: Vec<VariableInstanceId>,
}

impl ScopeNode {
    #[inline]
    pub fn contains(&self, offset: InstructionOffset) -> bool {
        let idx = self.ranges.partition_point(|(_, hi)| *hi <= offset);
        self.ranges
            .get(idx)
            .map(|(lo, hi)| offset >= *lo && offset < *hi)
            .unwrap_or(false)
    }

    pub fn is_subprogram(&self) -> bool {
        matches!(self.kind, ScopeKind::Subprogram { .. })
    }

    fn add_offset(&mut self, offset: InstructionOffset) {
        match self.ranges.last_mut() {
            Some((_, hi)) if *hi == offset => *hi += 1,
            Some((_, hi)) if *hi > offset => {}
            _ => self.ranges.push((offset, offset + 1)),
        }
    }
}

/// A declared variable within one instantiation of its scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInstance {
    pub id: VariableInstanceId,
    pub variable: VariableRef,
    pub inlined_at: Option<LocationRef>,
    pub scope: ScopeId,
    pub name: String,
}

/// Module-wide scope index; roots are non-inlined subprograms
#[derive(Debug, Default)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
    instance_map: HashMap<(ScopeRef, Option<LocationRef>), ScopeId>,
    variables: Vec<VariableInstance>,
    variable_map: HashMap<(VariableRef, Option<LocationRef>), VariableInstanceId>,
    /// Innermost scope per instruction offset
    innermost: Vec<Option<ScopeId>>,
}

impl ScopeTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(id.index())
    }

    pub fn instance_of(
        &self,
        lexical: ScopeRef,
        inlined_at: Option<LocationRef>,
    ) -> Option<ScopeId> {
        self.instance_map.get(&(lexical, inlined_at)).copied()
    }

    pub fn variable(&self, id: VariableInstanceId) -> Option<&VariableInstance> {
        self.variables.get(id.index())
    }

    pub fn variable_instances(&self) -> &[VariableInstance] {
        &self.variables
    }

    pub fn variable_instance_of(
        &self,
        variable: VariableRef,
        inlined_at: Option<LocationRef>,
    ) -> Option<VariableInstanceId> {
        self.variable_map.get(&(variable, inlined_at)).copied()
    }

    pub fn innermost_scope(&self, offset: InstructionOffset) -> Option<ScopeId> {
        self.innermost.get(offset as usize).copied().flatten()
    }

    /// Scope chain at `offset`, innermost first; empty for offsets without a
    /// debug location (injected prologue/epilogue code)
    pub fn scopes_containing(&self, offset: InstructionOffset) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut current = self.innermost_scope(offset);
        while let Some(id) = current {
            out.push(id);
            current = self.nodes[id.index()].parent;
        }
        out
    }

    pub fn contains(&self, scope: ScopeId, offset: InstructionOffset) -> bool {
        self.node(scope).map(|n| n.contains(offset)).unwrap_or(false)
    }

    /// Variables declared on the scope chain at `offset`, innermost scope
    /// first. Sibling scopes are never consulted. With `hide_shadowed`, an
    /// outer variable whose name is redeclared further in is dropped.
    pub fn variables_visible_at(
        &self,
        offset: InstructionOffset,
        hide_shadowed: bool,
    ) -> Vec<VariableInstanceId> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for scope in self.scopes_containing(offset) {
            for &var_id in &self.nodes[scope.index()].variables {
                let var = &self.variables[var_id.index()];
                if hide_shadowed && !seen.insert(var.name.as_str()) {
                    continue;
                }
                out.push(var_id);
            }
        }
        out
    }

    /// Nearest subprogram node at or above `scope`
    pub fn enclosing_subprogram(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let node = self.node(id)?;
            if node.is_subprogram() {
                return Some(id);
            }
            current = node.parent;
        }
        None
    }

    /// Call-site location of an inlined subprogram node
    pub fn inlined_call_site(&self, scope: ScopeId) -> Option<LocationRef> {
        let node = self.node(scope)?;
        if node.is_subprogram() {
            node.inlined_at
        } else {
            None
        }
    }
}

/// Builder for the scope tree using a module snapshot
pub struct ScopeTreeBuilder<'a> {
    snapshot: &'a ModuleSnapshot,
    tree: ScopeTree,
}

impl<'a> ScopeTreeBuilder<'a> {
    pub fn new(snapshot: &'a ModuleSnapshot) -> Self {
        Self {
            snapshot,
            tree: ScopeTree::default(),
        }
    }

    pub fn build(mut self) -> Result<ScopeTree> {
        self.validate_lexical_chains()?;
        self.validate_inline_chains()?;

        let snapshot = self.snapshot;
        for function in &snapshot.functions {
            if let Some(sp) = function.subprogram {
                self.instance_for(sp, None)?;
            }
        }

        self.tree.innermost = vec![None; snapshot.instruction_count()];
        for (offset, _fi, inst) in snapshot.instructions() {
            let Some(loc_ref) = inst.location else {
                continue;
            };
            let loc = *self.location(loc_ref)?;
            let innermost = self.instance_for(loc.scope, loc.inlined_at)?;
            self.tree.innermost[offset as usize] = Some(innermost);

            let mut current = Some(innermost);
            while let Some(id) = current {
                let node = &mut self.tree.nodes[id.index()];
                node.add_offset(offset);
                current = node.parent;
            }

            if let InstructionKind::DbgDeclare { variable, .. }
            | InstructionKind::DbgValue { variable, .. } = &inst.kind
            {
                self.variable_instance_for(*variable, loc.inlined_at)?;
            }
        }

        // Variables without any annotation were optimized out; they are still
        // visible in their non-inlined scope if that scope has code
        let annotated: HashSet<VariableRef> =
            self.tree.variable_map.keys().map(|(var, _)| *var).collect();
        for (idx, record) in snapshot.variables.iter().enumerate() {
            let var_ref = VariableRef(idx as u32);
            let has_code = self.tree.instance_map.contains_key(&(record.scope, None));
            if !annotated.contains(&var_ref) && has_code {
                self.variable_instance_for(var_ref, None)?;
            }
        }

        let variables = &self.tree.variables;
        for node in self.tree.nodes.iter_mut() {
            node.variables.sort_by_key(|v| variables[v.index()].variable);
        }

        debug!(
            "ScopeTree: built {} scope instances, {} variable instances over {} instructions",
            self.tree.nodes.len(),
            self.tree.variables.len(),
            self.tree.innermost.len()
        );
        Ok(self.tree)
    }

    fn location(&self, loc: LocationRef) -> Result<&'a shaderscope_protocol::LocationRecord> {
        self.snapshot
            .location(loc)
            .ok_or_else(|| DebugInfoError::malformed(format!("missing location {loc}")))
    }

    fn scope_record(&self, scope: ScopeRef) -> Result<&'a ScopeRecord> {
        self.snapshot
            .scope(scope)
            .ok_or_else(|| DebugInfoError::malformed(format!("missing scope {scope}")))
    }

    /// Every lexical block chain must end at a subprogram
    fn validate_lexical_chains(&self) -> Result<()> {
        for idx in 0..self.snapshot.scopes.len() {
            let start = ScopeRef(idx as u32);
            let mut visited = HashSet::new();
            let mut current = start;
            loop {
                if !visited.insert(current) {
                    return Err(DebugInfoError::malformed(format!(
                        "lexical scope cycle through {current}"
                    )));
                }
                match self.scope_record(current)? {
                    ScopeRecord::Subprogram { .. } => break,
                    ScopeRecord::LexicalBlock { parent, .. } => current = *parent,
                }
            }
        }
        Ok(())
    }

    /// Inlined-at chains must be acyclic and reference known scopes
    fn validate_inline_chains(&self) -> Result<()> {
        for (idx, loc) in self.snapshot.locations.iter().enumerate() {
            self.scope_record(loc.scope)?;
            let mut visited = HashSet::new();
            visited.insert(LocationRef(idx as u32));
            let mut current = loc.inlined_at;
            while let Some(at) = current {
                if !visited.insert(at) {
                    return Err(DebugInfoError::malformed(format!(
                        "inlined-at cycle through {at}"
                    )));
                }
                current = self.location(at)?.inlined_at;
            }
        }
        Ok(())
    }

    fn instance_for(
        &mut self,
        lexical: ScopeRef,
        inlined_at: Option<LocationRef>,
    ) -> Result<ScopeId> {
        if let Some(id) = self.tree.instance_map.get(&(lexical, inlined_at)) {
            return Ok(*id);
        }

        let record = self.scope_record(lexical)?;
        let (kind, parent, line) = match record {
            ScopeRecord::Subprogram { name, line, .. } => {
                let parent = match inlined_at {
                    Some(at) => {
                        let call = *self.location(at)?;
                        Some(self.instance_for(call.scope, call.inlined_at)?)
                    }
                    None => None,
                };
                (ScopeKind::Subprogram { name: name.clone() }, parent, *line)
            }
            ScopeRecord::LexicalBlock { parent, line, .. } => (
                ScopeKind::LexicalBlock,
                Some(self.instance_for(*parent, inlined_at)?),
                *line,
            ),
        };

        let id = ScopeId(self.tree.nodes.len() as u32);
        self.tree.nodes.push(ScopeNode {
            kind,
            lexical,
            inlined_at,
            parent,
            children: Vec::new(),
            file: record.file(),
            line,
            ranges: Vec::new(),
            variables: Vec::new(),
        });
        if let Some(p) = parent {
            self.tree.nodes[p.index()].children.push(id);
        }
        self.tree.instance_map.insert((lexical, inlined_at), id);

        if let Some(at) = inlined_at {
            debug!(
                "ScopeTree: new instance {:?} of {} inlined at {}",
                id, lexical, at
            );
        }
        Ok(id)
    }

    fn variable_instance_for(
        &mut self,
        variable: VariableRef,
        inlined_at: Option<LocationRef>,
    ) -> Result<VariableInstanceId> {
        if let Some(id) = self.tree.variable_map.get(&(variable, inlined_at)) {
            return Ok(*id);
        }
        let record = self
            .snapshot
            .variable(variable)
            .ok_or_else(|| DebugInfoError::malformed(format!("missing variable {variable}")))?;
        let scope = self.instance_for(record.scope, inlined_at)?;

        let id = VariableInstanceId(self.tree.variables.len() as u32);
        self.tree.variables.push(VariableInstance {
            id,
            variable,
            inlined_at,
            scope,
            name: record.name.clone(),
        });
        self.tree.nodes[scope.index()].variables.push(id);
        self.tree.variable_map.insert((variable, inlined_at), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaderscope_protocol::{ModuleBuilder, TypeRecord};

    fn names(tree: &ScopeTree, ids: &[VariableInstanceId]) -> Vec<String> {
        ids.iter()
            .map(|id| tree.variable(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_sibling_blocks_do_not_leak() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("/src/main.hlsl");
        let float = b.add_type(TypeRecord::float(32));
        let main = b.subprogram("main", file, 1);
        let left = b.lexical_block(main, file, 2, 5);
        let right = b.lexical_block(main, file, 6, 5);
        let x_left = b.variable("x", float, left, file, 3);
        let x_right = b.variable("y", float, right, file, 7);

        b.begin_function("main", Some(main));
        let l_left = b.location(3, 9, left);
        let l_right = b.location(7, 9, right);
        let a0 = b.alloca(32, Some(l_left));
        b.dbg_declare(x_left, a0, Some(l_left));
        let in_left = b.other("fadd", Some(l_left));
        let a1 = b.alloca(32, Some(l_right));
        b.dbg_declare(x_right, a1, Some(l_right));
        let in_right = b.other("fadd", Some(l_right));
        let snapshot = b.build();

        let tree = ScopeTreeBuilder::new(&snapshot).build().unwrap();
        assert_eq!(names(&tree, &tree.variables_visible_at(in_left, true)), vec!["x"]);
        assert_eq!(names(&tree, &tree.variables_visible_at(in_right, true)), vec!["y"]);
        assert_eq!(tree.scopes_containing(in_left).len(), 2);
    }

    #[test]
    fn test_offsets_without_location_have_no_scope() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("main.hlsl");
        let main = b.subprogram("main", file, 1);
        b.begin_function("main", Some(main));
        let prologue = b.other("load_input", None);
        let l = b.location(2, 1, main);
        let body = b.other("fmul", Some(l));
        let snapshot = b.build();

        let tree = ScopeTreeBuilder::new(&snapshot).build().unwrap();
        assert!(tree.scopes_containing(prologue).is_empty());
        assert!(tree.variables_visible_at(prologue, true).is_empty());
        let chain = tree.scopes_containing(body);
        assert_eq!(chain.len(), 1);
        assert!(tree.contains(chain[0], body));
        assert!(!tree.contains(chain[0], prologue));
    }

    #[test]
    fn test_inlined_bodies_get_distinct_instances() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("main.hlsl");
        let int = b.add_type(TypeRecord::signed_int(32));
        let main = b.subprogram("main", file, 10);
        let callee = b.subprogram("Callee", file, 1);
        let ret = b.variable("ret", int, callee, file, 2);

        b.begin_function("main", Some(main));
        let site0 = b.location(11, 3, main);
        let site1 = b.location(12, 3, main);
        let in0 = b.inlined_location(2, 5, callee, site0);
        let in1 = b.inlined_location(2, 5, callee, site1);
        let a0 = b.alloca(32, Some(in0));
        b.dbg_declare(ret, a0, Some(in0));
        let a1 = b.alloca(32, Some(in1));
        b.dbg_declare(ret, a1, Some(in1));
        let snapshot = b.build();

        let tree = ScopeTreeBuilder::new(&snapshot).build().unwrap();
        let v0 = tree.variable_instance_of(ret, Some(site0)).unwrap();
        let v1 = tree.variable_instance_of(ret, Some(site1)).unwrap();
        assert_ne!(v0, v1);

        let s0 = tree.variable(v0).unwrap().scope;
        assert_eq!(tree.inlined_call_site(s0), Some(site0));
        let root = tree.node(s0).unwrap().parent.unwrap();
        assert_eq!(tree.instance_of(main, None), Some(root));
        assert_eq!(tree.scopes_containing(a0), vec![s0, root]);
    }

    #[test]
    fn test_lexical_cycle_is_malformed() {
        let mut snapshot = ModuleSnapshot::default();
        snapshot.files.push(shaderscope_protocol::SourceFileRecord {
            directory: String::new(),
            name: "a.hlsl".to_string(),
        });
        snapshot.scopes.push(ScopeRecord::LexicalBlock {
            parent: ScopeRef(1),
            file: FileRef(0),
            line: 1,
            column: 1,
        });
        snapshot.scopes.push(ScopeRecord::LexicalBlock {
            parent: ScopeRef(0),
            file: FileRef(0),
            line: 2,
            column: 1,
        });
        let err = ScopeTreeBuilder::new(&snapshot).build().unwrap_err();
        assert!(matches!(err, DebugInfoError::MalformedDebugInfo(_)));
    }

    #[test]
    fn test_shadowed_outer_variable_is_hidden() {
        let mut b = ModuleBuilder::new();
        let file = b.add_file("main.hlsl");
        let float = b.add_type(TypeRecord::float(32));
        let main = b.subprogram("main", file, 1);
        let inner = b.lexical_block(main, file, 3, 1);
        let outer_x = b.variable("x", float, main, file, 2);
        let inner_x = b.variable("x", float, inner, file, 4);

        b.begin_function("main", Some(main));
        let l_outer = b.location(2, 1, main);
        let l_inner = b.location(4, 1, inner);
        let a0 = b.alloca(32, Some(l_outer));
        b.dbg_declare(outer_x, a0, Some(l_outer));
        let a1 = b.alloca(32, Some(l_inner));
        b.dbg_declare(inner_x, a1, Some(l_inner));
        let snapshot = b.build();

        let tree = ScopeTreeBuilder::new(&snapshot).build().unwrap();
        let hidden = tree.variables_visible_at(a1, true);
        assert_eq!(hidden.len(), 1);
        assert_eq!(tree.variable(hidden[0]).unwrap().variable, inner_x);
        assert_eq!(tree.variables_visible_at(a1, false).len(), 2);
    }
}
