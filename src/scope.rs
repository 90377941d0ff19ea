//! Name resolution (§3, §4.2).
//!
//! `original_source/FxScript.hpp` threads scopes through `FxMPPagedArray`,
//! giving each one a pointer that out-lives reallocation. The arena here
//! plays the same role for a type that can't take pointers to itself: a
//! `ScopeId` is stable no matter how many sibling or child scopes get
//! pushed afterward (the same trade `ast::NodeId` makes for tree nodes).
//!
//! This is the parser-side scope: it exists to resolve names and report
//! "undeclared variable" / "redeclared variable" diagnostics while parsing,
//! and it survives after parsing finishes so later passes can ask "what is
//! `x` here". It is deliberately not the same bookkeeping the emitter uses
//! to track stack offsets and registers — see `bytecode::emitter::VarHandle`
//! — because a variable can be in scope for name-resolution purposes well
//! before (or after) the emitter has allocated it a stack slot.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::value::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// One name bound in a scope: a `local`/`global` declaration or a function
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub name_hash: u32,
    pub ty: ValueKind,
    pub global: bool,
    /// The `VarDecl` or `Param` node that introduced this name. Host-registered
    /// external variables (§6) have no declaration node in this script's own
    /// AST, so they carry `NodeId(u32::MAX)` as a sentinel — `external` is
    /// what callers should actually branch on (§3's "Variable-in-scope").
    pub decl: NodeId,
    /// Set for a variable the host registered before parsing (§6) rather
    /// than one the script itself declared with `local`/`global`.
    pub external: bool,
}

/// Sentinel `decl` used for host-registered external variables, which have
/// no `VarDecl`/`Param` node of their own.
pub const EXTERNAL_DECL: NodeId = NodeId(u32::MAX);

/// A function declared somewhere in the script: registered into the
/// enclosing scope before its body is parsed, so recursive and
/// forward-referencing calls resolve (§9 open question — decided in
/// `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name_hash: u32,
    pub param_types: Vec<ValueKind>,
    pub ret: Option<ValueKind>,
    pub decl: NodeId,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    parent: Option<ScopeId>,
    variables: HashMap<u32, Variable>,
    functions: HashMap<u32, FunctionRecord>,
}

/// Owns every scope opened while parsing one compilation. Scope 0 is the
/// implicit top-level (file) scope and has no parent.
#[derive(Debug, Clone)]
pub struct ScopeSet {
    scopes: Vec<Scope>,
}

impl Default for ScopeSet {
    fn default() -> Self { ScopeSet::new() }
}

impl ScopeSet {
    pub fn new() -> ScopeSet {
        ScopeSet { scopes: vec![Scope::default()] }
    }

    pub fn root(&self) -> ScopeId { ScopeId(0) }

    pub fn push_child(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope { parent: Some(parent), ..Scope::default() });
        id
    }

    /// Declares `name_hash` directly in `scope`. Returns `false` (and leaves
    /// the existing binding untouched) if the name is already declared in
    /// this exact scope — shadowing an outer scope's variable is fine,
    /// redeclaring in the same one is a semantic error (§4.2).
    pub fn declare(&mut self, scope: ScopeId, var: Variable) -> bool {
        let s = &mut self.scopes[scope.0 as usize];
        if s.variables.contains_key(&var.name_hash) {
            return false;
        }
        s.variables.insert(var.name_hash, var);
        true
    }

    pub fn declare_function(&mut self, scope: ScopeId, func: FunctionRecord) -> bool {
        let s = &mut self.scopes[scope.0 as usize];
        if s.functions.contains_key(&func.name_hash) {
            return false;
        }
        s.functions.insert(func.name_hash, func);
        true
    }

    /// Walks from `scope` up through parents looking for `name_hash`,
    /// mirroring the chain a nested block resolves names through (§4.2).
    pub fn resolve(&self, scope: ScopeId, name_hash: u32) -> Option<Variable> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0 as usize];
            if let Some(var) = s.variables.get(&name_hash) {
                return Some(*var);
            }
            current = s.parent;
        }
        None
    }

    pub fn resolve_function(&self, scope: ScopeId, name_hash: u32) -> Option<FunctionRecord> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0 as usize];
            if let Some(func) = s.functions.get(&name_hash) {
                return Some(func.clone());
            }
            current = s.parent;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn var(hash: u32) -> Variable {
        Variable { name_hash: hash, ty: ValueKind::INT, global: false, decl: NodeId(0), external: false }
    }

    #[test]
    fn child_sees_parent_bindings() {
        let mut scopes = ScopeSet::new();
        let root = scopes.root();
        assert!(scopes.declare(root, var(1)));
        let child = scopes.push_child(root);
        assert_eq!(scopes.resolve(child, 1), Some(var(1)));
    }

    #[test]
    fn redeclaration_in_same_scope_rejected() {
        let mut scopes = ScopeSet::new();
        let root = scopes.root();
        assert!(scopes.declare(root, var(1)));
        assert!(!scopes.declare(root, var(1)));
    }

    #[test]
    fn shadowing_in_child_scope_is_allowed() {
        let mut scopes = ScopeSet::new();
        let root = scopes.root();
        assert!(scopes.declare(root, var(1)));
        let child = scopes.push_child(root);
        let mut shadow = var(1);
        shadow.ty = ValueKind::FLOAT;
        assert!(scopes.declare(child, shadow));
        assert_eq!(scopes.resolve(child, 1), Some(shadow));
        assert_eq!(scopes.resolve(root, 1), Some(var(1)));
    }

    #[test]
    fn unresolved_name_is_none() {
        let scopes = ScopeSet::new();
        assert_eq!(scopes.resolve(scopes.root(), 999), None);
    }

    #[test]
    fn function_lookup_walks_scope_chain() {
        let mut scopes = ScopeSet::new();
        let root = scopes.root();
        let func = FunctionRecord { name_hash: 7, param_types: vec![ValueKind::INT], ret: None, decl: NodeId(0) };
        assert!(scopes.declare_function(root, func.clone()));
        let child = scopes.push_child(root);
        assert_eq!(scopes.resolve_function(child, 7), Some(func));
    }
}
