//! Diagnostics.
//!
//! `spec.md` §7 splits failures into lexical, syntactic, semantic and
//! runtime kinds, and says nothing is ever thrown: the parser accumulates
//! `Syntax` diagnostics and keeps going, and only the `has_errors` flag on
//! the parser decides whether emission and execution run at all. `Trace`
//! plays the same role for the VM (§4.4's "printed; interpretation
//! terminates... or continues best-effort").

use std::fmt;

use thiserror::Error;

/// Where in the source a diagnostic points to. Deliberately just a line and
/// column (no combinable byte-range `Span`, unlike the teacher's `Span`) —
/// §7 asks for nothing more than "raw line:column" with no source snippets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A single compile-time diagnostic: lexical, syntactic, or semantic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Syntax {
    #[error("{where_} lexical error: {message}")]
    Lexical { where_: Location, message: String },

    #[error("{where_} syntax error: expected {expected}, found {found}")]
    Unexpected { where_: Location, expected: String, found: String },

    #[error("{where_} semantic error: {message}")]
    Semantic { where_: Location, message: String },
}

impl Syntax {
    pub fn lexical(where_: Location, message: impl Into<String>) -> Syntax {
        Syntax::Lexical { where_, message: message.into() }
    }

    pub fn unexpected(where_: Location, expected: impl Into<String>, found: impl Into<String>) -> Syntax {
        Syntax::Unexpected { where_, expected: expected.into(), found: found.into() }
    }

    pub fn semantic(where_: Location, message: impl Into<String>) -> Syntax {
        Syntax::Semantic { where_, message: message.into() }
    }
}

/// A runtime (VM) failure. Unlike `Syntax`, a `Trace` doesn't necessarily
/// stop the VM — see `vm::Vm::run`'s handling of each variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Trace {
    #[error("stack underflow at pc={pc}")]
    StackUnderflow { pc: u32 },

    #[error("pc {pc} out of bounds (bytecode is {len} bytes)")]
    PcOutOfBounds { pc: u32, len: u32 },

    #[error("call-external: no external function registered for hash {hash:#010x}")]
    MissingExternal { hash: u32 },

    #[error("call frame stack exhausted (capacity {capacity})")]
    CallFramesExhausted { capacity: usize },
}
