//! A minimal embedding of `foxscript`, wiring the published pipeline
//! together the way §1 says any host is free to: load a source, register
//! whatever external variables/functions the embedding wants, execute.
//!
//! This binary is deliberately thin — the CLI surface itself (argument
//! parsing, flags, exit codes) is an external collaborator per spec.md §1,
//! not part of the core. It exists so the crate has something runnable to
//! point at a `.fox` file, and so the data the core publishes (tokens,
//! `Ast`, `Bytecode`) has at least one real consumer outside the test
//! suite — `--transpile` below drives the x86 transcription pass, the other
//! out-of-core collaborator spec.md §1 calls out.

use std::process::ExitCode;
use std::rc::Rc;

use foxscript::bytecode::{Emitter, IrEmitter};
use foxscript::lexer::Lexer;
use foxscript::parser::Parser;
use foxscript::source::{FsLoader, Source};
use foxscript::x86::Transpiler;
use foxscript::{Script, Value, ValueKind};

fn main() -> ExitCode {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: foxscript-demo <script.fox> [--transpile | --ir]");
        return ExitCode::FAILURE;
    }
    let path = args.remove(0);
    let transpile = args.iter().any(|a| a == "--transpile");
    let dump_ir = args.iter().any(|a| a == "--ir");

    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("couldn't read '{path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    if transpile {
        return run_transpile(path, contents);
    }
    if dump_ir {
        return run_dump_ir(path, contents);
    }

    let mut script = Script::from_source(Source::new(path, contents));

    // A couple of externals any embedding tends to want: a version string
    // the script can read, and a host-callback beyond the builtin `log`.
    script.register_variable("string", "ENGINE_VERSION", Value::String(Rc::from(env!("CARGO_PKG_VERSION"))));
    script.register_function("assert", &[ValueKind::INT], false, |args| {
        if let Some(Value::Int(0)) = args.first() {
            eprintln!("[SCRIPT]: assertion failed");
        }
    });

    match script.execute() {
        Ok(report) => {
            for diag in &report.diagnostics {
                eprintln!("warning: {diag}");
            }
            for trace in &report.traces {
                eprintln!("runtime: {trace}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs only tokenize → parse → emit and prints the x86 transcription of
/// the resulting bytecode, without executing it.
fn run_transpile(path: String, contents: String) -> ExitCode {
    let loader = FsLoader;
    let (tokens, sources, lex_diagnostics) = Lexer::tokenize(Source::new(path, contents), &loader, 16);
    for diag in &lex_diagnostics {
        eprintln!("warning: {diag}");
    }

    let parsed = Parser::new(tokens, sources).parse();
    if parsed.has_errors {
        for diag in &parsed.diagnostics {
            eprintln!("error: {diag}");
        }
        return ExitCode::FAILURE;
    }

    let root = parsed.ast.root.expect("Parser::parse always sets ast.root");
    let emit_result = Emitter::new().emit_program(&parsed.ast, root);
    for diag in &emit_result.diagnostics {
        eprintln!("warning: {diag}");
    }

    print!("{}", Transpiler::transpile(&emit_result.image));
    ExitCode::SUCCESS
}

/// Runs tokenize → parse → the parallel IR pass and prints its disassembly,
/// without emitting or executing the final bytecode at all.
fn run_dump_ir(path: String, contents: String) -> ExitCode {
    let loader = FsLoader;
    let (tokens, sources, lex_diagnostics) = Lexer::tokenize(Source::new(path, contents), &loader, 16);
    for diag in &lex_diagnostics {
        eprintln!("warning: {diag}");
    }

    let parsed = Parser::new(tokens, sources).parse();
    if parsed.has_errors {
        for diag in &parsed.diagnostics {
            eprintln!("error: {diag}");
        }
        return ExitCode::FAILURE;
    }

    let root = parsed.ast.root.expect("Parser::parse always sets ast.root");
    for inst in IrEmitter::new().emit_program(&parsed.ast, root) {
        println!("{}", foxscript::bytecode::ir::render(&inst));
    }
    ExitCode::SUCCESS
}
