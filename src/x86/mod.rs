//! Bytecode-to-x86 transcription, for inspection only (§2's "x86
//! transcription" row, §9's supplement).
//!
//! Grounded in `FxScriptTranspilerX86` from
//! `original_source/FxScript.hpp`: that class walks a finished bytecode
//! buffer once, dispatching on `(base, specifier)` the same way the VM does,
//! and prints one line of assembly-ish text per instruction. This port
//! keeps the same read-only, single-pass shape but returns a `String`
//! instead of writing to a stream, and has no influence on compilation or
//! execution — it only ever consumes a finished [`Bytecode`].

use crate::bytecode::{Bytecode, Op, Reg};

fn reg_name(r: Reg) -> &'static str {
    match r {
        Reg::X0 => "%x0",
        Reg::X1 => "%x1",
        Reg::X2 => "%x2",
        Reg::X3 => "%x3",
        Reg::Ra => "%ra",
        Reg::Xr => "%xr",
        Reg::Sp => "%sp",
    }
}

/// Walks a [`Bytecode`] image once and renders it as AT&T-flavored
/// assembly-ish text, one `offset: mnemonic` line per instruction.
pub struct Transpiler;

impl Transpiler {
    pub fn transpile(image: &Bytecode) -> String {
        let mut out = String::new();
        let mut pc = 0usize;
        while let Some((op, next)) = image.decode_at(pc) {
            out.push_str(&format!("{pc:06x}: {}\n", Transpiler::render(&op)));
            pc = next;
        }
        out
    }

    fn render(op: &Op) -> String {
        match *op {
            Op::Push32Imm(v) => format!("pushl ${v}"),
            Op::Push32Reg(r) => format!("pushl {}", reg_name(r)),
            Op::Pop32(r) => format!("popl {}", reg_name(r)),
            Op::Load32Rel { off, reg } => format!("movl {off}(%sp), {}", reg_name(reg)),
            Op::Load32Abs { addr, reg } => format!("movl 0x{addr:x}, {}", reg_name(reg)),
            Op::Arith32Add { lhs, rhs } => format!("addl {}, {}, %xr", reg_name(lhs), reg_name(rhs)),
            Op::Save32Imm { off, value } => format!("movl ${value}, {off}(%sp)"),
            Op::Save32Reg { off, reg } => format!("movl {}, {off}(%sp)", reg_name(reg)),
            Op::Save32AbsImm { addr, value } => format!("movl ${value}, 0x{addr:x}"),
            Op::Save32AbsReg { addr, reg } => format!("movl {}, 0x{addr:x}", reg_name(reg)),
            Op::JumpRelative(off) => format!("jmp .{off:+}"),
            Op::JumpAbsolute(addr) => format!("jmp 0x{addr:x}"),
            Op::JumpAbsoluteReg(r) => format!("jmp *{}", reg_name(r)),
            Op::CallAbsolute(addr) => format!("call 0x{addr:x}"),
            Op::ReturnToCaller => "ret".to_string(),
            Op::CallExternal(hash) => format!("call extern[0x{hash:08x}]"),
            Op::DataString(ref bytes) => format!(".ascii ({} bytes)", bytes.len()),
            Op::ParamsStart => "paramsstart".to_string(),
            Op::TypeInt => "typeint".to_string(),
            Op::TypeString => "typestring".to_string(),
            Op::Move32Imm { reg, value } => format!("movl ${value}, {}", reg_name(reg)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::reg::Reg;

    #[test]
    fn one_line_per_instruction() {
        let mut image = Bytecode::new();
        image.emit(&Op::Push32Imm(1));
        image.emit(&Op::Push32Imm(2));
        image.emit(&Op::Arith32Add { lhs: Reg::X0, rhs: Reg::X1 });
        let text = Transpiler::transpile(&image);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn operands_appear_verbatim_in_the_rendered_line() {
        let mut image = Bytecode::new();
        image.emit(&Op::CallAbsolute(0x1234));
        let text = Transpiler::transpile(&image);
        assert!(text.contains("1234"));
    }
}
