//! The bytecode emitter (§4.3): walks the AST and produces a [`Bytecode`]
//! image, allocating registers, tracking stack offsets, and back-patching
//! forward jumps for function bodies.
//!
//! Diagnostics here mirror the parser's policy (§4.3's "Error semantics"):
//! an unresolved reference at emit time prints a diagnostic and skips that
//! instruction site; emission otherwise keeps going.

use std::collections::HashMap;

use crate::ast::{return_val_hash, Ast, AstNode, NodeId};
use crate::bytecode::image::Bytecode;
use crate::bytecode::op::Op;
use crate::bytecode::reg::{Reg, Registers};
use crate::error::{Location, Syntax};
use crate::value::{Value, ValueKind};

/// Emitter-side record of a variable's location (§3's "Variable handle").
/// Distinct from `scope::Variable`: this one exists purely to drive
/// register/stack bookkeeping during emission and is discarded with the
/// scope that declared it, rather than surviving for later name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarHandle {
    pub name_hash: u32,
    pub ty: ValueKind,
    pub offset: u32,
    pub size: u32,
    pub scope_depth: u32,
    pub var_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncHandle {
    pub name_hash: u32,
    pub entry_offset: u32,
}

enum AddrMode {
    Relative(i16),
    Absolute(u32),
}

fn is_general_purpose(reg: Reg) -> bool {
    matches!(reg, Reg::X0 | Reg::X1 | Reg::X2 | Reg::X3)
}

pub struct Emitter {
    image: Bytecode,
    registers: Registers,
    stack_offset: u32,
    scope_depth: u32,
    handles: Vec<VarHandle>,
    var_index_stack: Vec<u32>,
    return_handle_stack: Vec<Option<VarHandle>>,
    func_handles: HashMap<u32, FuncHandle>,
    diagnostics: Vec<Syntax>,
}

pub struct EmitResult {
    pub image: Bytecode,
    pub func_handles: HashMap<u32, FuncHandle>,
    pub diagnostics: Vec<Syntax>,
}

impl Emitter {
    pub fn new() -> Emitter {
        Emitter {
            image: Bytecode::new(),
            registers: Registers::new(),
            stack_offset: 0,
            scope_depth: 0,
            handles: Vec::new(),
            var_index_stack: vec![0],
            return_handle_stack: vec![None],
            func_handles: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Reserves a global stack slot for a host-registered external variable
    /// (§6) and emits the instruction that initializes it, mirroring the
    /// `global` branch of `emit_statement`'s `VarDecl` handling but driven
    /// directly from a host [`Value`] instead of a parsed literal node.
    /// Must be called before [`Emitter::emit_program`] so the slot exists
    /// when the script body starts referencing it. Only scalar kinds that
    /// fit the VM's fixed 4-byte slot are supported (§3: "size on stack
    /// always 4") — `Vec3`/`Reference` have no script-visible storage form.
    pub fn declare_external_global(&mut self, name_hash: u32, ty: ValueKind, value: &Value) -> bool {
        let off = self.stack_offset;
        match value {
            Value::Int(v) => { self.image.emit(&Op::Push32Imm(*v)); self.stack_offset += 4; }
            Value::Float(f) => { self.image.emit(&Op::Push32Imm(f.to_bits() as i32)); self.stack_offset += 4; }
            Value::String(s) => {
                let data_offset = self.emit_string_data(s);
                self.image.emit(&Op::TypeString);
                self.image.emit(&Op::Push32Imm(data_offset as i32));
                self.stack_offset += 4;
            }
            Value::None | Value::Vec3(_) | Value::Reference(_) => return false,
        }
        self.declare_handle(name_hash, ty, off, true);
        true
    }

    pub fn emit_program(mut self, ast: &Ast, root: NodeId) -> EmitResult {
        self.emit_statement(ast, root);
        EmitResult { image: self.image, func_handles: self.func_handles, diagnostics: self.diagnostics }
    }

    fn error(&mut self, loc: Location, message: impl Into<String>) {
        self.diagnostics.push(Syntax::semantic(loc, message));
    }

    fn find_handle(&self, name_hash: u32) -> Option<VarHandle> {
        self.handles.iter().rev().find(|h| h.name_hash == name_hash).copied()
    }

    fn declare_handle(&mut self, name_hash: u32, ty: ValueKind, offset: u32, global: bool) -> VarHandle {
        let scope_depth = if global { 0 } else { self.scope_depth };
        let slot = self.var_index_stack.last_mut().unwrap();
        let var_index = *slot;
        *slot += 1;
        let handle = VarHandle { name_hash, ty, offset, size: 4, scope_depth, var_index };
        self.handles.push(handle);
        handle
    }

    fn addr_mode(&self, handle: &VarHandle) -> AddrMode {
        if handle.scope_depth < self.scope_depth {
            return AddrMode::Absolute(handle.offset);
        }
        let rel = handle.offset as i64 - self.stack_offset as i64;
        if (i16::MIN as i64..=i16::MAX as i64).contains(&rel) {
            AddrMode::Relative(rel as i16)
        } else {
            AddrMode::Absolute(handle.offset)
        }
    }

    fn load_into(&mut self, reg: Reg, handle: &VarHandle) {
        match self.addr_mode(handle) {
            AddrMode::Relative(off) => { self.image.emit(&Op::Load32Rel { off, reg }); }
            AddrMode::Absolute(addr) => { self.image.emit(&Op::Load32Abs { addr, reg }); }
        }
    }

    fn save_reg_into(&mut self, handle: &VarHandle, reg: Reg) {
        match self.addr_mode(handle) {
            AddrMode::Relative(off) => { self.image.emit(&Op::Save32Reg { off, reg }); }
            AddrMode::Absolute(addr) => { self.image.emit(&Op::Save32AbsReg { addr, reg }); }
        }
    }

    fn save_imm_into(&mut self, handle: &VarHandle, value: i32) {
        match self.addr_mode(handle) {
            AddrMode::Relative(off) => { self.image.emit(&Op::Save32Imm { off, value }); }
            AddrMode::Absolute(addr) => { self.image.emit(&Op::Save32AbsImm { addr, value }); }
        }
    }

    /// Encodes a string literal as a length-prefixed data block (one
    /// trailing NUL, padded to an even total length, §4.3) and returns the
    /// byte offset of the length-prefix — the value the typed-argument
    /// protocol and `Value::String` reconstruction treat as the string's
    /// address.
    fn emit_string_data(&mut self, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        if bytes.len() % 2 != 0 { bytes.push(0); }
        let start = self.image.len();
        self.image.emit(&Op::DataString(bytes));
        start as u32 + 2 // past the (base, specifier) header, at the length prefix
    }

    fn infer_kind(&self, ast: &Ast, node: NodeId) -> ValueKind {
        match ast.get(node) {
            AstNode::Literal(v) => v.kind(),
            AstNode::VarRef { name_hash, .. } => self.find_handle(*name_hash).map(|h| h.ty).unwrap_or(ValueKind::INT),
            _ => ValueKind::INT,
        }
    }

    // --- expression lowering (§4.3's three modes) ----------------------

    /// Mode 1: *fetch to register* — leaves the value in a returned
    /// general-purpose register (or `XR` for calls/binops, by convention).
    fn fetch_to_register(&mut self, ast: &Ast, node: NodeId) -> Reg {
        match ast.get(node).clone() {
            AstNode::Literal(Value::Int(v)) => {
                let reg = self.alloc();
                self.image.emit(&Op::Move32Imm { reg, value: v });
                reg
            }
            AstNode::Literal(Value::Float(f)) => {
                let reg = self.alloc();
                self.image.emit(&Op::Move32Imm { reg, value: f.to_bits() as i32 });
                reg
            }
            AstNode::Literal(Value::String(s)) => {
                let offset = self.emit_string_data(&s);
                let reg = self.alloc();
                self.image.emit(&Op::TypeString);
                self.image.emit(&Op::Move32Imm { reg, value: offset as i32 });
                reg
            }
            AstNode::Literal(Value::None) | AstNode::Literal(Value::Vec3(_)) | AstNode::Literal(Value::Reference(_)) => {
                self.error(Location::default(), "value kind not representable in a register-valued expression");
                let reg = self.alloc();
                self.image.emit(&Op::Move32Imm { reg, value: 0 });
                reg
            }
            AstNode::VarRef { name_hash, token } => match self.find_handle(name_hash) {
                Some(handle) => {
                    let reg = self.alloc();
                    self.load_into(reg, &handle);
                    reg
                }
                None => {
                    self.error(Location { line: token.line, col: token.col }, "reference to an unknown variable at emit time");
                    self.alloc()
                }
            },
            AstNode::Call { .. } => {
                self.emit_call(ast, node);
                Reg::Xr
            }
            AstNode::Binop { op, left, right } => self.emit_binop(ast, op, left, right),
            _ => {
                self.error(Location::default(), "node is not a valid expression");
                self.alloc()
            }
        }
    }

    fn alloc(&mut self) -> Reg { self.registers.alloc().unwrap_or(Reg::X0) }

    fn free(&mut self, reg: Reg) { if is_general_purpose(reg) { self.registers.free(reg); } }

    fn emit_binop(&mut self, ast: &Ast, op: char, left: NodeId, right: NodeId) -> Reg {
        if op == '-' && !matches!(ast.get(right), AstNode::Literal(Value::Int(_)) | AstNode::Literal(Value::Float(_))) {
            self.error(Location::default(), "subtraction of a computed value has no bytecode opcode; treating as addition");
        }
        let right_negated_literal = if op == '-' {
            match ast.get(right) {
                AstNode::Literal(Value::Int(v)) => Some(Value::Int(-v)),
                AstNode::Literal(Value::Float(f)) => Some(Value::Float(-f)),
                _ => None,
            }
        } else {
            None
        };

        let l = self.fetch_to_register(ast, left);
        let right_is_literal = matches!(ast.get(right), AstNode::Literal(Value::Int(_)) | AstNode::Literal(Value::Float(_)));

        let r = if right_is_literal {
            match right_negated_literal {
                Some(Value::Int(v)) => { let reg = self.alloc(); self.image.emit(&Op::Move32Imm { reg, value: v }); reg }
                Some(Value::Float(f)) => { let reg = self.alloc(); self.image.emit(&Op::Move32Imm { reg, value: f.to_bits() as i32 }); reg }
                _ => self.fetch_to_register(ast, right),
            }
        } else {
            // LHS is spilled across evaluation of a non-literal RHS, since
            // a nested call or binop may clobber registers (§4.3).
            self.image.emit(&Op::Push32Reg(l));
            self.stack_offset += 4;
            self.free(l);
            let r = self.fetch_to_register(ast, right);
            let restored = self.alloc();
            self.image.emit(&Op::Pop32(restored));
            self.stack_offset -= 4;
            self.image.emit(&Op::Arith32Add { lhs: restored, rhs: r });
            self.free(restored);
            self.free(r);
            return Reg::Xr;
        };

        self.image.emit(&Op::Arith32Add { lhs: l, rhs: r });
        self.free(l);
        self.free(r);
        Reg::Xr
    }

    /// Mode 2: *define in memory* — pushes the value as a fresh variable's
    /// live storage, returning the absolute stack offset it landed at.
    fn push_value(&mut self, ast: &Ast, node: NodeId) -> u32 {
        match ast.get(node).clone() {
            AstNode::Literal(Value::Int(v)) => {
                let off = self.stack_offset;
                self.image.emit(&Op::Push32Imm(v));
                self.stack_offset += 4;
                off
            }
            AstNode::Literal(Value::Float(f)) => {
                let off = self.stack_offset;
                self.image.emit(&Op::Push32Imm(f.to_bits() as i32));
                self.stack_offset += 4;
                off
            }
            AstNode::Literal(Value::String(s)) => {
                let data_offset = self.emit_string_data(&s);
                let off = self.stack_offset;
                self.image.emit(&Op::TypeString);
                self.image.emit(&Op::Push32Imm(data_offset as i32));
                self.stack_offset += 4;
                off
            }
            _ => {
                let reg = self.fetch_to_register(ast, node);
                let off = self.stack_offset;
                self.image.emit(&Op::Push32Reg(reg));
                self.stack_offset += 4;
                self.free(reg);
                off
            }
        }
    }

    /// Mode 3: *assign to handle* — writes the value back to an
    /// already-declared variable.
    fn assign_to_handle(&mut self, ast: &Ast, node: NodeId, handle: &VarHandle) {
        match ast.get(node).clone() {
            AstNode::Literal(Value::Int(v)) => self.save_imm_into(handle, v),
            AstNode::Literal(Value::Float(f)) => self.save_imm_into(handle, f.to_bits() as i32),
            AstNode::Literal(Value::String(s)) => {
                let data_offset = self.emit_string_data(&s);
                self.image.emit(&Op::TypeString);
                self.save_imm_into(handle, data_offset as i32);
            }
            _ => {
                let reg = self.fetch_to_register(ast, node);
                self.save_reg_into(handle, reg);
                self.free(reg);
            }
        }
    }

    // --- statements -----------------------------------------------------

    fn emit_statement(&mut self, ast: &Ast, node: NodeId) {
        match ast.get(node).clone() {
            AstNode::Block(stmts) => {
                for s in stmts { self.emit_statement(ast, s); }
            }
            AstNode::VarDecl { name_hash, ty, global, init, .. } => {
                let offset = match init {
                    Some(expr) => self.push_value(ast, expr),
                    None => {
                        let off = self.stack_offset;
                        self.image.emit(&Op::Push32Imm(0));
                        self.stack_offset += 4;
                        off
                    }
                };
                self.declare_handle(name_hash, ty, offset, global);
            }
            AstNode::Assign { target, value } => {
                let name_hash = match ast.get(target) { AstNode::VarRef { name_hash, .. } => *name_hash, _ => return };
                match self.find_handle(name_hash) {
                    Some(handle) => self.assign_to_handle(ast, value, &handle),
                    None => self.error(Location::default(), "reference to an unknown variable at emit time"),
                }
            }
            AstNode::FuncDecl { .. } => self.emit_func_decl(ast, node),
            AstNode::Call { .. } => { self.emit_call(ast, node); }
            AstNode::Return => self.emit_return_node(),
            AstNode::CommandWrapper(inner) => self.emit_statement(ast, inner),
            AstNode::Literal(_) | AstNode::Binop { .. } | AstNode::VarRef { .. } | AstNode::Param { .. } | AstNode::DocComment(_) => {
                self.error(Location::default(), "node is not a valid statement");
            }
        }
    }

    fn emit_return_node(&mut self) {
        if let Some(handle) = self.return_handle_stack.last().copied().flatten() {
            self.load_into(Reg::Xr, &handle);
        }
        self.image.emit(&Op::ReturnToCaller);
    }

    fn emit_func_decl(&mut self, ast: &Ast, node: NodeId) {
        let (name_hash, params, ret, body) = match ast.get(node) {
            AstNode::FuncDecl { name_hash, params, ret, body, .. } => (*name_hash, params.clone(), *ret, *body),
            _ => unreachable!(),
        };

        let s = self.image.len();
        self.image.emit(&Op::JumpRelative(0));
        let patch_site = s + 2;
        let entry = s + 4;

        // Registered before the body emits so a self-recursive call inside
        // the body resolves to an absolute call (§9 open question).
        self.func_handles.insert(name_hash, FuncHandle { name_hash, entry_offset: entry as u32 });

        self.scope_depth += 1;
        let frame_start_offset = self.stack_offset;
        self.stack_offset += 4; // the RA slot the caller will push
        self.var_index_stack.push(0);
        let handles_mark = self.handles.len();

        for &p in &params {
            if let AstNode::Param { name_hash, ty, .. } = *ast.get(p) {
                let offset = self.stack_offset;
                self.declare_handle(name_hash, ty, offset, false);
                self.stack_offset += 4;
            }
        }

        let ret_handle = ret.map(|ty| {
            let offset = self.stack_offset;
            self.image.emit(&Op::Push32Imm(0));
            self.stack_offset += 4;
            self.declare_handle(return_val_hash(), ty, offset, false)
        });
        self.return_handle_stack.push(ret_handle);

        let ends_in_return = matches!(
            ast.get(body),
            AstNode::Block(stmts) if matches!(stmts.last().map(|n| ast.get(*n)), Some(AstNode::Return))
        );
        self.emit_statement(ast, body);
        if !ends_in_return {
            self.emit_return_node();
        }

        self.return_handle_stack.pop();
        self.handles.truncate(handles_mark);
        self.var_index_stack.pop();
        self.stack_offset = frame_start_offset;
        self.scope_depth -= 1;

        let distance = (self.image.len() - entry) as u16;
        self.image.patch_u16(patch_site, distance);
    }

    fn emit_call(&mut self, ast: &Ast, node: NodeId) {
        let (name_hash, args) = match ast.get(node) {
            AstNode::Call { name_hash, args, .. } => (*name_hash, args.clone()),
            _ => unreachable!(),
        };

        // Step 1: nested-call arguments evaluate first, to avoid clobbering
        // registers once the call sequence itself starts pushing (§4.3,
        // §5's "nested calls are evaluated first").
        let saved_offsets: Vec<Option<u32>> = args
            .iter()
            .map(|&a| if matches!(ast.get(a), AstNode::Call { .. }) { Some(self.push_value(ast, a)) } else { None })
            .collect();

        self.image.emit(&Op::Push32Reg(Reg::Ra));
        self.stack_offset += 4;
        self.image.emit(&Op::ParamsStart);

        for (i, &a) in args.iter().enumerate() {
            if let Some(off) = saved_offsets[i] {
                self.image.emit(&Op::TypeInt);
                let reg = self.alloc();
                self.image.emit(&Op::Load32Abs { addr: off, reg });
                self.image.emit(&Op::Push32Reg(reg));
                self.free(reg);
                self.stack_offset += 4;
            } else {
                let is_string_literal = matches!(ast.get(a), AstNode::Literal(Value::String(_)));
                if !is_string_literal {
                    // A string-valued variable (not itself a literal) still
                    // needs its own marker here — `push_value`'s non-literal
                    // branch just pushes a register and has no way to tell
                    // the VM what kind that register holds.
                    match self.infer_kind(ast, a) {
                        ValueKind::STRING => self.image.emit(&Op::TypeString),
                        _ => self.image.emit(&Op::TypeInt),
                    };
                }
                self.push_value(ast, a);
            }
        }

        match self.func_handles.get(&name_hash).copied() {
            Some(handle) => { self.image.emit(&Op::CallAbsolute(handle.entry_offset)); }
            None => {
                self.image.emit(&Op::CallExternal(name_hash));
                // The VM pops the arguments internally on external return
                // (§4.3's "emitter decrements its tracked stack offset").
                self.stack_offset -= 4 * args.len() as u32;
            }
        }

        self.image.emit(&Op::Pop32(Reg::Ra));
        self.stack_offset -= 4;
    }
}

impl Default for Emitter {
    fn default() -> Self { Emitter::new() }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{FsLoader, Source};

    fn emit(src: &str) -> EmitResult {
        let loader = FsLoader;
        let (tokens, sources, lex_diags) = Lexer::tokenize(Source::inline(src), &loader, 16);
        assert!(lex_diags.is_empty());
        let parsed = Parser::new(tokens, sources).parse();
        assert!(!parsed.has_errors, "{:?}", parsed.diagnostics);
        Emitter::new().emit_program(&parsed.ast, parsed.ast.root.unwrap())
    }

    #[test]
    fn global_literal_decodes_as_push_imm() {
        let result = emit("global int x = 42;");
        let (op, _) = result.image.decode_at(0).unwrap();
        assert_eq!(op, Op::Push32Imm(42));
    }

    #[test]
    fn function_header_jump_gets_backpatched() {
        let result = emit("fn f(int x) int { return x; }");
        let (op, next) = result.image.decode_at(0).unwrap();
        match op {
            Op::JumpRelative(off) => {
                let end = next as i64 + off as i64;
                assert_eq!(end, result.image.len() as i64, "patched distance should land exactly at end of image");
            }
            other => panic!("expected JumpRelative, got {other:?}"),
        }
    }

    #[test]
    fn call_to_declared_function_is_call_absolute() {
        let result = emit("fn add(int a, int b) int { return a + b; }\nglobal int r = add(3, 4);");
        let mut pc = 0;
        let mut found = false;
        while let Some((op, next)) = result.image.decode_at(pc) {
            if matches!(op, Op::CallAbsolute(_)) { found = true; break; }
            pc = next;
        }
        assert!(found);
    }

    #[test]
    fn call_to_unknown_function_is_external() {
        let result = emit("log(1);");
        let mut pc = 0;
        let mut found = false;
        while let Some((op, next)) = result.image.decode_at(pc) {
            if matches!(op, Op::CallExternal(_)) { found = true; break; }
            pc = next;
        }
        assert!(found);
    }

    /// A string-typed variable passed as a call argument must get its own
    /// `TypeString` marker — `push_value`'s register-valued fallback has no
    /// way to tell the VM what kind the pushed register holds, so the call
    /// site itself has to emit it (§4.4's typed-argument protocol).
    #[test]
    fn string_variable_argument_gets_a_type_string_marker() {
        let result = emit("global string greeting = \"hi\";\nlog(greeting);");
        let mut pc = 0;
        let mut last_marker = None;
        while let Some((op, next)) = result.image.decode_at(pc) {
            match op {
                Op::TypeInt | Op::TypeString => last_marker = Some(op),
                Op::ParamsStart => last_marker = None,
                _ => {}
            }
            pc = next;
        }
        assert_eq!(last_marker, Some(Op::TypeString));
    }
}
