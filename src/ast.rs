//! The abstract syntax tree (§3, §4.2).
//!
//! Nodes live in a flat arena (`Ast`) and reference each other by `NodeId`
//! instead of owning boxed children. `original_source/FxScript.hpp` builds
//! its tree from raw `FxScriptNode*` pointers so a `Value::Reference` can
//! just keep the pointer of the node it aliases; porting that literally
//! would mean self-referential, non-movable nodes. An arena gives the same
//! "stable address for a node" property — a `NodeId` stays valid no matter
//! how the rest of the tree grows — via a plain `Copy` index instead of a
//! pointer, the same trade the parser's `ScopeId` already makes for scopes.

use crate::hash::fnv1a_str;
use crate::token::Token;
use crate::value::{Value, ValueKind};

/// Index into an [`Ast`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// `__ReturnVal__`'s name hash, shared by the parser (which declares it as a
/// synthetic variable in each function scope) and the emitter (which gives
/// it a real stack slot) so both agree on it without re-hashing the literal
/// in two places (§4.2, §4.3).
pub fn return_val_hash() -> u32 { fnv1a_str("__ReturnVal__") }

/// One arithmetic or comparison operator appearing in a `Binop` (§4.2's
/// right-associative binary expression grammar).
pub type Op = char;

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Literal(Value),

    Binop {
        op: Op,
        left: NodeId,
        right: NodeId,
    },

    /// A `{ ... }` block: a sequence of statements, each executed for
    /// effect. The last entry's value (if the block is used as an
    /// expression context) is not itself special-cased — FoxScript has no
    /// implicit block-value semantics (§4.2).
    Block(Vec<NodeId>),

    /// A reference to a variable by name. Resolution (which declaration it
    /// names, and whether it's a local or global) is recorded separately by
    /// the parser's `Scope` table, keyed by this node's `NodeId` — keeping
    /// the AST itself free of scope bookkeeping (§3's split between
    /// "variable in scope" and "variable handle").
    VarRef {
        name_hash: u32,
        token: Token,
    },

    VarDecl {
        name_hash: u32,
        token: Token,
        ty: ValueKind,
        global: bool,
        init: Option<NodeId>,
    },

    Assign {
        target: NodeId,
        value: NodeId,
    },

    Param {
        name_hash: u32,
        token: Token,
        ty: ValueKind,
    },

    FuncDecl {
        name_hash: u32,
        token: Token,
        params: Vec<NodeId>,
        ret: Option<ValueKind>,
        body: NodeId,
        docs: Vec<Token>,
    },

    /// A call by name. `resolved` distinguishes a call to a function
    /// declared in this script (emitted as a direct jump) from a call to
    /// a name with no matching `FuncDecl`, which the emitter instead lowers
    /// as a call to a host-registered external function (§4.2, §6) — unlike
    /// the variable case there's no separate side table for this, since the
    /// emitter's own function-handle lookup at emission time is sufficient.
    Call {
        name_hash: u32,
        token: Token,
        resolved: bool,
        args: Vec<NodeId>,
    },

    /// A bare `return;`. `return <expr>;` is desugared by the parser into an
    /// assignment to the implicit result slot followed by one of these
    /// (§4.2) — there is deliberately no `Return(Option<NodeId>)` variant.
    Return,

    DocComment(Token),

    /// A "command" form: `?identifier ...` at the top level, wrapping the
    /// statement it prefixes (§4.2).
    CommandWrapper(NodeId),
}

/// Owns every node produced while parsing one compilation (entry file plus
/// anything pulled in via `@include`). Mirrors `ScopeSet`'s shape.
#[derive(Debug, Default, Clone)]
pub struct Ast {
    nodes: Vec<AstNode>,
    /// The block or statement the parser treats as the program's entry
    /// point, once parsing finishes.
    pub root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Ast { Ast { nodes: Vec::new(), root: None } }

    pub fn push(&mut self, node: AstNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &AstNode { &self.nodes[id.0 as usize] }

    pub fn get_mut(&mut self, id: NodeId) -> &mut AstNode { &mut self.nodes[id.0 as usize] }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::SourceId;

    fn tok() -> Token {
        Token::new(crate::token::TokenKind::Identifier, SourceId(0), 0, 1, 1, 1, "x")
    }

    #[test]
    fn arena_round_trips_ids() {
        let mut ast = Ast::new();
        let lit = ast.push(AstNode::Literal(Value::Int(3)));
        let var = ast.push(AstNode::VarRef { name_hash: 1, token: tok() });
        let add = ast.push(AstNode::Binop { op: '+', left: lit, right: var });
        match ast.get(add) {
            AstNode::Binop { op, left, right } => {
                assert_eq!(*op, '+');
                assert_eq!(*left, lit);
                assert_eq!(*right, var);
            }
            _ => panic!("expected Binop"),
        }
    }

    #[test]
    fn reference_value_points_at_a_node() {
        let mut ast = Ast::new();
        let var = ast.push(AstNode::VarRef { name_hash: 42, token: tok() });
        let value = Value::Reference(var);
        assert_eq!(value.kind(), ValueKind::REF);
    }
}
