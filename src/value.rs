//! The runtime `Value` union (§3) and the bitset used to describe which
//! kinds an external function accepts (§6's "accepted-argument-kinds").
//!
//! `original_source/FxScript.hpp`'s `FxScriptValue` is a tagged C union over
//! `{none, int, float, vec3, string, ref}`; the Rust port is the direct,
//! safe translation — a sum type instead of a raw union, since nothing here
//! needs the packed in-memory layout the original used for its stack slots.

use std::rc::Rc;

use bitflags::bitflags;

use crate::ast::NodeId;

bitflags! {
    /// Which [`Value`] kinds something accepts — used to declare an
    /// external function's parameter types (§6) and, internally, to check
    /// an assignment's literal against its declared type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ValueKind: u16 {
        const NONE   = 0x00;
        const INT    = 0x01;
        const FLOAT  = 0x02;
        const STRING = 0x04;
        const VEC3   = 0x08;
        const REF    = 0x10;
    }
}

/// A tagged sum over the value kinds the language can hold in a variable,
/// pass as an argument, or leave on the VM stack.
///
/// String payloads are reference-counted rather than borrowed: the VM
/// reconstructs them from bytecode-embedded bytes (§4.3's length-prefixed
/// data blocks) at the point of use, so there's no single owning buffer to
/// borrow from the way the parser borrows identifiers from `Source`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Int(i32),
    Float(f32),
    Vec3([f32; 3]),
    String(Rc<str>),
    /// Points at the variable-reference AST node this value aliases.
    Reference(NodeId),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::NONE,
            Value::Int(_) => ValueKind::INT,
            Value::Float(_) => ValueKind::FLOAT,
            Value::Vec3(_) => ValueKind::VEC3,
            Value::String(_) => ValueKind::STRING,
            Value::Reference(_) => ValueKind::REF,
        }
    }

    pub fn is_number(&self) -> bool { matches!(self, Value::Int(_) | Value::Float(_)) }

    /// Formats a value the way the default `log` external does (§6):
    /// ints as decimal, floats with Rust's default `Display`, strings as
    /// raw bytes, and `none` as the literal text `[none]`.
    pub fn log_format(&self) -> String {
        match self {
            Value::None => "[none]".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Vec3([x, y, z]) => format!("({x}, {y}, {z})"),
            Value::String(s) => s.to_string(),
            Value::Reference(id) => format!("&{}", id.0),
        }
    }
}

/// Maps a declared type keyword (§6: `int`, `float`, `string`, `playerid`)
/// to the [`ValueKind`] it accepts. `playerid` is an alias for `int`.
pub fn kind_for_type_name(type_name: &str) -> Option<ValueKind> {
    match type_name {
        "int" | "playerid" => Some(ValueKind::INT),
        "float" => Some(ValueKind::FLOAT),
        "string" => Some(ValueKind::STRING),
        "vec3" => Some(ValueKind::VEC3),
        _ => None,
    }
}
