//! Host-registered external functions (§6, §4.4's "typed-argument protocol").
//!
//! A script calls an unresolved name as `call-external hash`; the VM looks
//! the hash up here and invokes the matching closure with a reconstructed
//! `Value` argument list.

use std::collections::HashMap;
use std::rc::Rc;

use crate::hash::fnv1a_str;
use crate::value::{Value, ValueKind};

pub type ExternalFn = Box<dyn Fn(&[Value])>;

/// One host-registered external function (§3's "External function"): the
/// callback plus the declared-argument-kinds/variadic metadata the host
/// supplied at registration time. The VM's typed-argument protocol (§4.4)
/// already reconstructs each argument's kind from what was actually pushed,
/// so nothing here is consulted to marshal a call — it exists so an
/// embedder (or a future strictness pass) can inspect what a name was
/// declared to accept, matching the data model's fields 1:1.
pub struct Registration {
    pub name_hash: u32,
    pub param_kinds: Vec<ValueKind>,
    pub variadic: bool,
    callback: ExternalFn,
}

/// The set of functions a script can call by name without having declared
/// them itself. Keyed by the same FNV-1a hash the emitter bakes into
/// `call-external` (§4.3).
#[derive(Default)]
pub struct ExternalRegistry {
    functions: HashMap<u32, Registration>,
}

impl ExternalRegistry {
    pub fn new() -> ExternalRegistry { ExternalRegistry { functions: HashMap::new() } }

    /// An empty registry plus the language's one built-in: `log` (§6),
    /// variadic and untyped ("no argument-type check").
    pub fn with_builtins() -> ExternalRegistry {
        let mut registry = ExternalRegistry::new();
        registry.register_typed("log", &[], true, default_log);
        registry
    }

    /// Registers `name` with no declared argument kinds and `variadic =
    /// true` — the common case for a loosely-typed host callback.
    pub fn register(&mut self, name: &str, f: impl Fn(&[Value]) + 'static) {
        self.register_typed(name, &[], true, f);
    }

    /// Registers `name` with the declared argument-kind list and variadic
    /// flag the host-embedding surface asks for (§6).
    pub fn register_typed(
        &mut self,
        name: &str,
        param_kinds: &[ValueKind],
        variadic: bool,
        f: impl Fn(&[Value]) + 'static,
    ) {
        let name_hash = fnv1a_str(name);
        self.functions.insert(
            name_hash,
            Registration { name_hash, param_kinds: param_kinds.to_vec(), variadic, callback: Box::new(f) },
        );
    }

    pub fn get(&self, hash: u32) -> Option<&ExternalFn> { self.functions.get(&hash).map(|r| &r.callback) }

    pub fn registration(&self, hash: u32) -> Option<&Registration> { self.functions.get(&hash) }
}

/// The default `log` builtin (§6): prints a `[SCRIPT]: ` prefixed line.
///
/// Preserves a documented quirk (§9): the original prints its arguments in
/// reverse push order rather than the declared order the VM's general
/// call-external protocol hands to every external (see `Vm`'s handling of
/// `call-external`, which already restores first-declared-first before
/// invoking *any* callback) — `log` undoes that restoration itself, on
/// purpose, to keep the existing test corpus's expected output intact.
pub fn default_log(args: &[Value]) {
    let rendered = args.iter().rev().map(Value::log_format).collect::<Vec<_>>().join(" ");
    println!("[SCRIPT]: {rendered}");
}

/// Reconstructs a `Value::String` from the bytecode offset the typed-argument
/// protocol hands back for a `string`-kind argument (§4.4): a big-endian
/// `u16` length prefix followed by that many bytes, NUL-padded to an even
/// total length by the emitter (§4.3).
pub fn string_from_bytecode(image: &[u8], offset: u32) -> Value {
    let offset = offset as usize;
    let len = match image.get(offset..offset + 2) {
        Some(b) => u16::from_be_bytes([b[0], b[1]]) as usize,
        None => return Value::String(Rc::from("")),
    };
    let bytes = image.get(offset + 2..offset + 2 + len).unwrap_or(&[]);
    let text = std::str::from_utf8(bytes).unwrap_or("").trim_end_matches('\0');
    Value::String(Rc::from(text))
}
