//! The parallel intermediate form (§1, §2, §4.3): an instruction stream
//! emitted straight from the AST, independent of the final [`crate::bytecode::op::Op`]
//! bytecode, carrying the extra `marker`/`variable` opcode groups §4.3 names.
//!
//! Grounded in `original_source/FoxScript.cpp`'s `FoxIREmitter`/`FoxIRPrinter`
//! pair. That file keeps two separate emitters walking the same parsed
//! block: `FoxBCEmitter` (the final form, wired to `FoxVM::Start`) and
//! `FoxIREmitter` (this form, wired only to `FoxIRPrinter`'s disassembly) —
//! not a lowering chain from one to the other, `#if 0`'d dead code guards
//! the final-form path in that snapshot. This port keeps the same relationship:
//! `IrEmitter` is a second, independent AST walk, for inspection only, the
//! same way [`crate::x86::Transpiler`] only ever consumes a finished
//! [`crate::bytecode::Bytecode`] without influencing it.
//!
//! The nine groups shared with `Op` are byte-identical in the original
//! (`OpBase`/`IrBase` are the same enumeration with two more members
//! appended); `Marker` and `Variable` have no final-bytecode counterpart.
//! Where the final form resolves a variable to a relative-or-absolute stack
//! address during emission, the IR form addresses it by declaration-order
//! index (`vset $3, ...` in `FoxIRPrinter`'s disassembly) — that resolution
//! hasn't happened yet at this stage.

use crate::ast::{Ast, AstNode, NodeId};
use crate::bytecode::reg::Reg;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrBase {
    Push = 1,
    Pop,
    Load,
    Arith,
    Save,
    Jump,
    Data,
    Type,
    Move,
    Marker,
    Variable,
}

impl IrBase {
    fn from_u8(b: u8) -> Option<IrBase> {
        Some(match b {
            1 => IrBase::Push,
            2 => IrBase::Pop,
            3 => IrBase::Load,
            4 => IrBase::Arith,
            5 => IrBase::Save,
            6 => IrBase::Jump,
            7 => IrBase::Data,
            8 => IrBase::Type,
            9 => IrBase::Move,
            10 => IrBase::Marker,
            11 => IrBase::Variable,
            _ => return None,
        })
    }
}

/// A fully-decoded IR instruction. `Inst`'s first nine groups line up with
/// [`crate::bytecode::op::Op`]'s; `Marker` and `Variable` are the two groups
/// the final form drops once a lowering pass would resolve addressing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inst {
    Push32Imm(i32),
    Push32Reg(Reg),
    Pop32(Reg),
    Load32Rel { off: i16, reg: Reg },
    Arith32Add { lhs: Reg, rhs: Reg },
    Save32Reg { off: i16, reg: Reg },
    JumpRelative(i16),
    CallAbsolute(u32),
    ReturnToCaller,
    CallExternal(u32),
    DataString(Vec<u8>),
    TypeInt,
    TypeString,
    Move32Imm { reg: Reg, value: i32 },
    /// `IrSpecMarker_FrameBegin` — brackets a function body the way the
    /// final form's frame-pointer arithmetic does once resolved.
    FrameBegin,
    /// `IrSpecMarker_FrameEnd`.
    FrameEnd,
    /// `IrSpecMarker_ParamsBegin` — precedes a call's argument pushes.
    ParamsBegin,
    /// `IrSpecVariable_Get_Int32` — reads variable `index` (declaration
    /// order, not yet a stack offset) into `reg`.
    VariableGet32 { index: u16, reg: Reg },
    /// `IrSpecVariable_Set_Int32`.
    VariableSet32Imm { index: u16, value: i32 },
    /// `IrSpecVariable_Set_Reg32`.
    VariableSet32Reg { index: u16, reg: Reg },
}

fn push_u16_be(buf: &mut Vec<u8>, n: u16) { buf.extend_from_slice(&n.to_be_bytes()); }
fn push_u32_be(buf: &mut Vec<u8>, n: u32) { buf.extend_from_slice(&n.to_be_bytes()); }
fn push_i16_be(buf: &mut Vec<u8>, n: i16) { buf.extend_from_slice(&n.to_be_bytes()); }
fn push_i32_be(buf: &mut Vec<u8>, n: i32) { buf.extend_from_slice(&n.to_be_bytes()); }

fn read_u16_be(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|s| u16::from_be_bytes([s[0], s[1]]))
}
fn read_u32_be(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}
fn read_i16_be(bytes: &[u8], at: usize) -> Option<i16> { read_u16_be(bytes, at).map(|v| v as i16) }
fn read_i32_be(bytes: &[u8], at: usize) -> Option<i32> { read_u32_be(bytes, at).map(|v| v as i32) }

impl Inst {
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        match *self {
            Inst::Push32Imm(v) => { buf.push(IrBase::Push as u8); buf.push(1); push_i32_be(buf, v); }
            Inst::Push32Reg(r) => { buf.push(IrBase::Push as u8); buf.push(2); push_u16_be(buf, r.nibble() as u16); }
            Inst::Pop32(r) => { buf.push(IrBase::Pop as u8); buf.push((1 << 4) | r.nibble()); }
            Inst::Load32Rel { off, reg } => {
                buf.push(IrBase::Load as u8);
                buf.push((1 << 4) | reg.nibble());
                push_i16_be(buf, off);
            }
            Inst::Arith32Add { lhs, rhs } => {
                buf.push(IrBase::Arith as u8);
                buf.push(1);
                buf.push(lhs.nibble());
                buf.push(rhs.nibble());
            }
            Inst::Save32Reg { off, reg } => {
                buf.push(IrBase::Save as u8); buf.push(2);
                push_i16_be(buf, off); push_u16_be(buf, reg.nibble() as u16);
            }
            Inst::JumpRelative(off) => { buf.push(IrBase::Jump as u8); buf.push(1); push_i16_be(buf, off); }
            Inst::CallAbsolute(addr) => { buf.push(IrBase::Jump as u8); buf.push(4); push_u32_be(buf, addr); }
            Inst::ReturnToCaller => { buf.push(IrBase::Jump as u8); buf.push(5); }
            Inst::CallExternal(hash) => { buf.push(IrBase::Jump as u8); buf.push(6); push_u32_be(buf, hash); }
            Inst::DataString(ref bytes) => {
                buf.push(IrBase::Data as u8); buf.push(1);
                push_u16_be(buf, bytes.len() as u16);
                buf.extend_from_slice(bytes);
            }
            Inst::TypeInt => { buf.push(IrBase::Type as u8); buf.push(1); }
            Inst::TypeString => { buf.push(IrBase::Type as u8); buf.push(2); }
            Inst::Move32Imm { reg, value } => {
                buf.push(IrBase::Move as u8);
                buf.push((1 << 4) | reg.nibble());
                push_i32_be(buf, value);
            }
            Inst::FrameBegin => { buf.push(IrBase::Marker as u8); buf.push(1); }
            Inst::FrameEnd => { buf.push(IrBase::Marker as u8); buf.push(2); }
            Inst::ParamsBegin => { buf.push(IrBase::Marker as u8); buf.push(3); }
            Inst::VariableGet32 { index, reg } => {
                buf.push(IrBase::Variable as u8); buf.push(1);
                push_u16_be(buf, index); push_u16_be(buf, reg.nibble() as u16);
            }
            Inst::VariableSet32Imm { index, value } => {
                buf.push(IrBase::Variable as u8); buf.push(2);
                push_u16_be(buf, index); push_i32_be(buf, value);
            }
            Inst::VariableSet32Reg { index, reg } => {
                buf.push(IrBase::Variable as u8); buf.push(3);
                push_u16_be(buf, index); push_u16_be(buf, reg.nibble() as u16);
            }
        }
        start
    }

    pub fn decode(image: &[u8], pc: usize) -> Option<(Inst, usize)> {
        let base_byte = *image.get(pc)?;
        let spec_byte = *image.get(pc + 1)?;
        let base = IrBase::from_u8(base_byte)?;
        let mut at = pc + 2;
        let spec_hi = spec_byte >> 4;
        let spec_lo = spec_byte & 0x0F;

        let inst = match base {
            IrBase::Push => match spec_byte {
                1 => { let v = read_i32_be(image, at)?; at += 4; Inst::Push32Imm(v) }
                2 => { let r = read_u16_be(image, at)?; at += 2; Inst::Push32Reg(Reg::from_nibble(r as u8)?) }
                _ => return None,
            },
            IrBase::Pop => {
                let reg = Reg::from_nibble(spec_lo)?;
                if spec_hi != 1 { return None; }
                Inst::Pop32(reg)
            }
            IrBase::Load => {
                let reg = Reg::from_nibble(spec_lo)?;
                if spec_hi != 1 { return None; }
                let off = read_i16_be(image, at)?;
                at += 2;
                Inst::Load32Rel { off, reg }
            }
            IrBase::Arith => match spec_byte {
                1 => {
                    let lhs = Reg::from_nibble(*image.get(at)?)?;
                    let rhs = Reg::from_nibble(*image.get(at + 1)?)?;
                    at += 2;
                    Inst::Arith32Add { lhs, rhs }
                }
                _ => return None,
            },
            IrBase::Save => match spec_byte {
                2 => { let off = read_i16_be(image, at)?; at += 2; let r = read_u16_be(image, at)?; at += 2; Inst::Save32Reg { off, reg: Reg::from_nibble(r as u8)? } }
                _ => return None,
            },
            IrBase::Jump => match spec_byte {
                1 => { let off = read_i16_be(image, at)?; at += 2; Inst::JumpRelative(off) }
                4 => { let addr = read_u32_be(image, at)?; at += 4; Inst::CallAbsolute(addr) }
                5 => Inst::ReturnToCaller,
                6 => { let hash = read_u32_be(image, at)?; at += 4; Inst::CallExternal(hash) }
                _ => return None,
            },
            IrBase::Data => match spec_byte {
                1 => {
                    let len = read_u16_be(image, at)? as usize;
                    at += 2;
                    let bytes = image.get(at..at + len)?.to_vec();
                    at += len;
                    Inst::DataString(bytes)
                }
                _ => return None,
            },
            IrBase::Type => match spec_byte {
                1 => Inst::TypeInt,
                2 => Inst::TypeString,
                _ => return None,
            },
            IrBase::Move => {
                let reg = Reg::from_nibble(spec_lo)?;
                if spec_hi != 1 { return None; }
                let value = read_i32_be(image, at)?;
                at += 4;
                Inst::Move32Imm { reg, value }
            }
            IrBase::Marker => match spec_byte {
                1 => Inst::FrameBegin,
                2 => Inst::FrameEnd,
                3 => Inst::ParamsBegin,
                _ => return None,
            },
            IrBase::Variable => match spec_byte {
                1 => { let index = read_u16_be(image, at)?; at += 2; let r = read_u16_be(image, at)?; at += 2; Inst::VariableGet32 { index, reg: Reg::from_nibble(r as u8)? } }
                2 => { let index = read_u16_be(image, at)?; at += 2; let value = read_i32_be(image, at)?; at += 4; Inst::VariableSet32Imm { index, value } }
                3 => { let index = read_u16_be(image, at)?; at += 2; let r = read_u16_be(image, at)?; at += 2; Inst::VariableSet32Reg { index, reg: Reg::from_nibble(r as u8)? } }
                _ => return None,
            },
        };
        Some((inst, at))
    }
}

/// Renders one disassembly line per instruction, `FoxIRPrinter`-style.
pub fn render(inst: &Inst) -> String {
    match *inst {
        Inst::Push32Imm(v) => format!("push32 {v}"),
        Inst::Push32Reg(r) => format!("push32r {r:?}"),
        Inst::Pop32(r) => format!("pop32 {r:?}"),
        Inst::Load32Rel { off, reg } => format!("load32 {off}, {reg:?}"),
        Inst::Arith32Add { lhs, rhs } => format!("add32 {lhs:?}, {rhs:?}"),
        Inst::Save32Reg { off, reg } => format!("save32r {off}, {reg:?}"),
        Inst::JumpRelative(off) => format!("jmpr {off}"),
        Inst::CallAbsolute(addr) => format!("calla {addr}"),
        Inst::ReturnToCaller => "ret".to_string(),
        Inst::CallExternal(hash) => format!("callext {hash}"),
        Inst::DataString(ref bytes) => format!("datastr {}", bytes.len()),
        Inst::TypeInt => "typeint".to_string(),
        Inst::TypeString => "typestr".to_string(),
        Inst::Move32Imm { reg, value } => format!("move32 {reg:?}, {value}"),
        Inst::FrameBegin => "frame begin".to_string(),
        Inst::FrameEnd => "frame end".to_string(),
        Inst::ParamsBegin => "params begin".to_string(),
        Inst::VariableGet32 { index, reg } => format!("vget ${index}, {reg:?}"),
        Inst::VariableSet32Imm { index, value } => format!("vset ${index}, {value}"),
        Inst::VariableSet32Reg { index, reg } => format!("vset ${index}, {reg:?}"),
    }
}

/// Walks the AST once and produces the IR form, addressing variables by
/// declaration-order index rather than a resolved stack offset (§4.3). This
/// is a second, independent pass over the same tree [`crate::bytecode::emitter::Emitter`]
/// walks for the final form — not a stage it feeds into.
pub struct IrEmitter {
    insts: Vec<Inst>,
    var_index_stack: Vec<u16>,
    indices: Vec<(u32, u16)>,
}

impl IrEmitter {
    pub fn new() -> IrEmitter {
        IrEmitter { insts: Vec::new(), var_index_stack: vec![0], indices: Vec::new() }
    }

    pub fn emit_program(mut self, ast: &Ast, root: NodeId) -> Vec<Inst> {
        self.emit_statement(ast, root);
        self.insts
    }

    fn find_index(&self, name_hash: u32) -> Option<u16> {
        self.indices.iter().rev().find(|(h, _)| *h == name_hash).map(|(_, i)| *i)
    }

    fn declare_index(&mut self, name_hash: u32) -> u16 {
        let slot = self.var_index_stack.last_mut().unwrap();
        let index = *slot;
        *slot += 1;
        self.indices.push((name_hash, index));
        index
    }

    fn emit_value(&mut self, ast: &Ast, node: NodeId) {
        match ast.get(node).clone() {
            AstNode::Literal(Value::Int(v)) => self.insts.push(Inst::Push32Imm(v)),
            AstNode::Literal(Value::Float(f)) => self.insts.push(Inst::Push32Imm(f.to_bits() as i32)),
            AstNode::Literal(Value::String(s)) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                if bytes.len() % 2 != 0 { bytes.push(0); }
                self.insts.push(Inst::TypeString);
                self.insts.push(Inst::DataString(bytes));
            }
            AstNode::Literal(Value::None | Value::Vec3(_) | Value::Reference(_)) => {
                self.insts.push(Inst::Push32Imm(0));
            }
            AstNode::VarRef { name_hash, .. } => {
                if let Some(index) = self.find_index(name_hash) {
                    self.insts.push(Inst::VariableGet32 { index, reg: Reg::Xr });
                }
            }
            AstNode::Binop { op, left, right } => {
                self.emit_value(ast, left);
                self.emit_value(ast, right);
                if op == '+' || op == '-' {
                    self.insts.push(Inst::Arith32Add { lhs: Reg::X0, rhs: Reg::X1 });
                }
            }
            AstNode::Call { .. } => self.emit_call(ast, node),
            _ => {}
        }
    }

    fn emit_statement(&mut self, ast: &Ast, node: NodeId) {
        match ast.get(node).clone() {
            AstNode::Block(stmts) => {
                for s in stmts { self.emit_statement(ast, s); }
            }
            AstNode::VarDecl { name_hash, init, .. } => {
                if let Some(expr) = init {
                    self.emit_value(ast, expr);
                }
                let index = self.declare_index(name_hash);
                self.insts.push(Inst::VariableSet32Reg { index, reg: Reg::Xr });
            }
            AstNode::Assign { target, value } => {
                let name_hash = match ast.get(target) { AstNode::VarRef { name_hash, .. } => *name_hash, _ => return };
                if let Some(index) = self.find_index(name_hash) {
                    self.emit_value(ast, value);
                    self.insts.push(Inst::VariableSet32Reg { index, reg: Reg::Xr });
                }
            }
            AstNode::FuncDecl { params, body, .. } => {
                self.insts.push(Inst::FrameBegin);
                self.var_index_stack.push(0);
                let indices_mark = self.indices.len();
                for &p in &params {
                    if let AstNode::Param { name_hash, .. } = *ast.get(p) {
                        self.declare_index(name_hash);
                    }
                }
                self.emit_statement(ast, body);
                self.indices.truncate(indices_mark);
                self.var_index_stack.pop();
                self.insts.push(Inst::FrameEnd);
            }
            AstNode::Call { .. } => self.emit_call(ast, node),
            AstNode::Return => self.insts.push(Inst::ReturnToCaller),
            AstNode::CommandWrapper(inner) => self.emit_statement(ast, inner),
            _ => {}
        }
    }

    fn emit_call(&mut self, ast: &Ast, node: NodeId) {
        let args = match ast.get(node) { AstNode::Call { args, .. } => args.clone(), _ => return };
        self.insts.push(Inst::ParamsBegin);
        for &a in &args {
            self.emit_value(ast, a);
        }
    }
}

impl Default for IrEmitter {
    fn default() -> Self { IrEmitter::new() }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{FsLoader, Source};

    fn emit_ir(src: &str) -> Vec<Inst> {
        let loader = FsLoader;
        let (tokens, sources, lex_diags) = Lexer::tokenize(Source::inline(src), &loader, 16);
        assert!(lex_diags.is_empty());
        let parsed = Parser::new(tokens, sources).parse();
        assert!(!parsed.has_errors, "{:?}", parsed.diagnostics);
        IrEmitter::new().emit_program(&parsed.ast, parsed.ast.root.unwrap())
    }

    #[test]
    fn round_trips_every_variant() {
        let cases = vec![
            Inst::Push32Imm(42),
            Inst::Push32Reg(Reg::X1),
            Inst::Pop32(Reg::X2),
            Inst::Load32Rel { off: -8, reg: Reg::X0 },
            Inst::Arith32Add { lhs: Reg::X0, rhs: Reg::X1 },
            Inst::Save32Reg { off: 4, reg: Reg::Xr },
            Inst::JumpRelative(-10),
            Inst::CallAbsolute(2000),
            Inst::ReturnToCaller,
            Inst::CallExternal(0xdead_beef),
            Inst::DataString(vec![b'h', b'i', 0]),
            Inst::TypeInt,
            Inst::TypeString,
            Inst::Move32Imm { reg: Reg::X1, value: -5 },
            Inst::FrameBegin,
            Inst::FrameEnd,
            Inst::ParamsBegin,
            Inst::VariableGet32 { index: 3, reg: Reg::X0 },
            Inst::VariableSet32Imm { index: 0, value: 7 },
            Inst::VariableSet32Reg { index: 1, reg: Reg::Xr },
        ];
        for inst in cases {
            let mut buf = Vec::new();
            inst.encode(&mut buf);
            let (decoded, end) = Inst::decode(&buf, 0).unwrap();
            assert_eq!(end, buf.len());
            assert_eq!(decoded, inst);
        }
    }

    #[test]
    fn function_body_is_bracketed_by_frame_markers() {
        let insts = emit_ir("fn f(int x) int { return x; }");
        assert_eq!(insts.first(), Some(&Inst::FrameBegin));
        assert_eq!(insts.last(), Some(&Inst::FrameEnd));
    }

    #[test]
    fn call_argument_list_opens_with_params_begin() {
        let insts = emit_ir("log(1);");
        let params_begin = insts.iter().position(|i| matches!(i, Inst::ParamsBegin));
        assert!(params_begin.is_some());
    }

    #[test]
    fn variables_are_addressed_by_declaration_order_index_not_offset() {
        let insts = emit_ir("global int x = 1;\nglobal int y = 2;\ny = x;");
        let sets: Vec<u16> = insts
            .iter()
            .filter_map(|i| match i { Inst::VariableSet32Reg { index, .. } => Some(*index), _ => None })
            .collect();
        assert_eq!(sets, vec![0, 1, 1]);
    }

    proptest! {
        /// Mirrors `op::save32_imm_operand_bytes_are_always_big_endian` —
        /// the IR form's multi-byte operands are big-endian too (§4.3).
        #[test]
        fn push_imm_round_trips(value: i32) {
            let mut buf = Vec::new();
            Inst::Push32Imm(value).encode(&mut buf);
            let (decoded, end) = Inst::decode(&buf, 0).unwrap();
            prop_assert_eq!(end, buf.len());
            prop_assert_eq!(decoded, Inst::Push32Imm(value));
        }

        #[test]
        fn variable_get_round_trips(index: u16, reg_idx in 0u8..4) {
            let reg = Reg::from_nibble(reg_idx).unwrap();
            let mut buf = Vec::new();
            Inst::VariableGet32 { index, reg }.encode(&mut buf);
            let (decoded, end) = Inst::decode(&buf, 0).unwrap();
            prop_assert_eq!(end, buf.len());
            prop_assert_eq!(decoded, Inst::VariableGet32 { index, reg });
        }
    }
}
