//! # FoxScript
//! A small embeddable scripting language: tokenizer, recursive-descent
//! parser, a bespoke register-and-stack bytecode emitter, and an in-process
//! virtual machine that can call out to host-registered functions. A
//! read-only bytecode-to-x86 transcription pass is included for inspection,
//! alongside [`bytecode::ir`]: a second, independent AST walk producing a
//! parallel intermediate form with its own `marker`/`variable` instruction
//! groups, also for inspection only and with no bearing on execution.
//!
//! ## Overview of the compilation pipeline
//! A script starts life as a [`Source`] — owned text plus the path it came
//! from. [`Lexer::tokenize`] turns a `Source` into a flat `Vec<Token>`,
//! splicing in any `@include`d files along the way. [`Parser::parse`] walks
//! that token stream with one token of lookahead, producing an [`ast::Ast`]
//! arena and a [`scope::ScopeSet`] recording every `local`/`global`/
//! parameter declaration by name-hash. If parsing sets `has_errors`,
//! nothing downstream runs — that's the language's entire error-recovery
//! story (no exceptions, just a boolean and a `Vec<Syntax>`).
//!
//! [`bytecode::Emitter::emit_program`] walks the finished `Ast` and produces
//! a [`bytecode::Bytecode`] image: two-byte-headered instructions, register
//! allocation across expressions, forward-jump back-patching for function
//! bodies, and inline length-prefixed string data. [`vm::Vm::run`] then
//! interprets that image directly — a flat byte-addressable stack, six
//! registers, and a small ring of call frames, dispatching to
//! host-registered external functions through the typed-argument protocol
//! whenever the emitter couldn't resolve a call to a script-declared
//! function.
//!
//! ```
//! use foxscript::{Script, Source};
//!
//! let mut script = Script::from_source(Source::inline(
//!     "fn add(int a, int b) int { return a + b; }\nglobal int r = add(3, 4);",
//! ));
//! let report = script.execute().expect("well-formed script");
//! assert!(report.traces.is_empty());
//! ```
//!
//! ## What's out of scope
//! The command-line entry point, file I/O for loading the *entry* source
//! (an embedder is expected to read its own file and hand the bytes to
//! [`Source::new`], though [`Script::load`] is provided as a convenience),
//! and the AST/bytecode pretty-printers are all external collaborators: this
//! crate only guarantees that [`ast::Ast`], [`bytecode::Bytecode`], and
//! friends can be read without being mutated by the act of reading them.
//! `@include` is the one piece of source-relative file I/O the core does
//! own, since it happens mid-tokenization (see [`source::SourceLoader`]).

pub mod ast;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod hash;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod source;
pub mod token;
pub mod value;
pub mod vm;
pub mod x86;

use std::fmt;
use std::path::Path;
use std::rc::Rc;

pub use bytecode::{Bytecode, EmitResult, Emitter};
pub use config::Config;
pub use error::{Location, Syntax, Trace};
pub use lexer::Lexer;
pub use parser::{ParseResult, Parser};
pub use source::{FsLoader, Source, SourceLoader};
pub use value::{kind_for_type_name, Value, ValueKind};
pub use vm::external::ExternalRegistry;
pub use vm::Vm;

/// Parsing set `has_errors` (§7): emission and execution never ran. Carries
/// every diagnostic collected up to that point — lexical, syntactic, and
/// semantic alike — for the embedder to report however it likes.
#[derive(Debug)]
pub struct CompileError {
    pub diagnostics: Vec<Syntax>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) prevented compilation:", self.diagnostics.len())?;
        for diag in &self.diagnostics {
            writeln!(f, "  {diag}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// What one [`Script::execute`] produced. Compilation itself succeeded
/// (parsing didn't set `has_errors`), but that doesn't mean the run was
/// diagnostic-free: lexical diagnostics (e.g. a missing `@include`) and
/// emit-time semantic ones (e.g. a reference the emitter couldn't resolve)
/// are both non-fatal by design (§4.1, §4.3) and surface here rather than
/// aborting anything.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub diagnostics: Vec<Syntax>,
    pub traces: Vec<Trace>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool { self.diagnostics.is_empty() && self.traces.is_empty() }
}

/// Ties tokenizer, parser, emitter, and VM together behind the
/// host-embedding surface §6 describes: load a source, register external
/// variables and functions, execute for side effects.
pub struct Script {
    source: Rc<Source>,
    config: Config,
    externals: ExternalRegistry,
    external_vars: Vec<(u32, ValueKind, Value)>,
}

impl Script {
    /// Wraps an already-loaded [`Source`]. Use this directly for inline or
    /// in-memory scripts (tests, a REPL); use [`Script::load`] to read from
    /// disk. Starts with the one default external the language ships with,
    /// `log` (§6).
    pub fn from_source(source: Rc<Source>) -> Script {
        Script {
            source,
            config: Config::default(),
            externals: ExternalRegistry::with_builtins(),
            external_vars: Vec::new(),
        }
    }

    /// Reads `path` from disk and wraps it as the entry source. `@include`
    /// directives inside it are still resolved relative to the process's
    /// working directory via [`FsLoader`] — this convenience only covers
    /// loading the entry file itself, consistent with §1's "file I/O for
    /// loading source" being an external collaborator's job.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Script> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let display_path = path.as_ref().to_string_lossy().into_owned();
        Ok(Script::from_source(Source::new(display_path, contents)))
    }

    pub fn with_config(mut self, config: Config) -> Script {
        self.config = config;
        self
    }

    /// Registers an external variable at global scope (§6), to be
    /// initialized before the script body runs. `type_name` is one of the
    /// declared type keywords (`int`, `float`, `string`, `playerid`).
    /// Returns `false` without registering anything if `type_name` is
    /// unrecognized or `value`'s kind has no representation in the VM's
    /// fixed 4-byte stack slot (`Vec3` and `Reference` — see
    /// [`bytecode::Emitter::declare_external_global`]).
    pub fn register_variable(&mut self, type_name: &str, name: &str, value: Value) -> bool {
        let Some(ty) = kind_for_type_name(type_name) else { return false };
        if !matches!(value, Value::Int(_) | Value::Float(_) | Value::String(_)) {
            return false;
        }
        self.external_vars.push((hash::fnv1a_str(name), ty, value));
        true
    }

    /// Registers an external function (§6): `name`, the argument kinds it
    /// declares (for the host's own bookkeeping — the VM's typed-argument
    /// protocol reconstructs actual argument kinds from what the caller
    /// pushed regardless, per §4.4), whether it's variadic, and the
    /// callback itself.
    pub fn register_function(
        &mut self,
        name: &str,
        param_kinds: &[ValueKind],
        variadic: bool,
        f: impl Fn(&[Value]) + 'static,
    ) {
        self.externals.register_typed(name, param_kinds, variadic, f);
    }

    /// Runs the whole pipeline for side effects (§6): tokenize, parse, emit,
    /// execute. Returns [`CompileError`] if parsing set `has_errors` — per
    /// §7's propagation policy, that suppresses emission and execution
    /// entirely rather than running with a partial bytecode image.
    pub fn execute(self) -> Result<ExecutionReport, CompileError> {
        let loader = FsLoader;
        let (tokens, sources, lex_diagnostics) =
            Lexer::tokenize(Rc::clone(&self.source), &loader, self.config.max_include_depth);

        let mut parser = Parser::new(tokens, sources);
        for &(name_hash, ty, _) in &self.external_vars {
            parser.declare_external_variable(name_hash, ty);
        }
        let parsed = parser.parse();

        if parsed.has_errors {
            let mut diagnostics = lex_diagnostics;
            diagnostics.extend(parsed.diagnostics);
            return Err(CompileError { diagnostics });
        }

        let mut emitter = Emitter::new();
        for (name_hash, ty, value) in &self.external_vars {
            emitter.declare_external_global(*name_hash, *ty, value);
        }
        let root = parsed.ast.root.expect("Parser::parse always sets ast.root");
        let emit_result = emitter.emit_program(&parsed.ast, root);

        let mut diagnostics = lex_diagnostics;
        diagnostics.extend(emit_result.diagnostics);

        let mut vm = Vm::new(&self.config, self.externals);
        let traces = vm.run(&emit_result.image);

        Ok(ExecutionReport { diagnostics, traces })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn end_to_end_add_of_two_locals() {
        let script = Script::from_source(Source::inline(
            "fn add(int a, int b) int { return a + b; }\nglobal int r = add(3, 4);",
        ));
        let report = script.execute().expect("well-formed script compiles");
        assert!(report.is_clean());
    }

    #[test]
    fn has_errors_short_circuits_before_execution() {
        let script = Script::from_source(Source::inline("fn ( { ;;; garbage"));
        let err = script.execute().expect_err("malformed script should not compile");
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn registered_external_variable_is_visible_to_the_script() {
        let mut script = Script::from_source(Source::inline("log(greeting);"));
        assert!(script.register_variable("string", "greeting", Value::String(Rc::from("hi"))));
        let report = script.execute().expect("greeting resolves as a pre-declared global");
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn registered_external_function_is_invoked() {
        use std::cell::RefCell;
        use std::rc::Rc as StdRc;

        let seen = StdRc::new(RefCell::new(Vec::new()));
        let seen_clone = StdRc::clone(&seen);
        let mut script = Script::from_source(Source::inline("greet(1);"));
        script.register_function("greet", &[ValueKind::INT], false, move |args| {
            seen_clone.borrow_mut().extend_from_slice(args);
        });
        script.execute().expect("well-formed script compiles");
        assert_eq!(seen.borrow().as_slice(), &[Value::Int(1)]);
    }
}
