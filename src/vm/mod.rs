//! The register-based virtual machine (§4.4).
//!
//! A flat byte-addressable stack, a small fixed register file, and a ring
//! of call frames. The dispatch loop decodes one [`Op`] at a time and
//! advances the program counter by however many bytes that instruction
//! consumed — `Op::decode` already reports that via its returned "next pc".

pub mod external;

use log::{debug, warn};

use crate::bytecode::{Bytecode, Op, Reg};
use crate::config::Config;
use crate::error::Trace;
use crate::value::{Value, ValueKind};
use crate::vm::external::{string_from_bytecode, ExternalRegistry};

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    sp: u32,
}

pub struct Vm {
    stack: Vec<u8>,
    sp: u32,
    pc: u32,
    regs: [i32; 6], // X0, X1, X2, X3, RA, XR — SP lives in `self.sp`, not here
    frames: Vec<CallFrame>,
    frame_capacity: usize,
    pushed_types: Vec<ValueKind>,
    in_params: bool,
    latched_type: Option<ValueKind>,
    externals: ExternalRegistry,
    halted: bool,
    traces: Vec<Trace>,
}

impl Vm {
    pub fn new(config: &Config, externals: ExternalRegistry) -> Vm {
        Vm {
            stack: vec![0u8; config.stack_size],
            sp: 0,
            pc: 0,
            regs: [0; 6],
            frames: Vec::with_capacity(config.call_frame_capacity),
            frame_capacity: config.call_frame_capacity,
            pushed_types: Vec::new(),
            in_params: false,
            latched_type: None,
            externals,
            halted: false,
            traces: Vec::new(),
        }
    }

    fn get_reg(&self, r: Reg) -> i32 {
        if r == Reg::Sp { self.sp as i32 } else { self.regs[r.nibble() as usize] }
    }

    fn set_reg(&mut self, r: Reg, v: i32) {
        if r == Reg::Sp { self.sp = v as u32; } else { self.regs[r.nibble() as usize] = v; }
    }

    fn read_mem(&self, addr: u32) -> i32 {
        let addr = addr as usize;
        match self.stack.get(addr..addr + 4) {
            Some(bytes) => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            None => {
                warn!("read out of bounds at {addr}, treating as zero");
                0
            }
        }
    }

    fn write_mem(&mut self, addr: u32, value: i32) {
        let addr = addr as usize;
        match self.stack.get_mut(addr..addr + 4) {
            Some(slot) => slot.copy_from_slice(&value.to_ne_bytes()),
            None => warn!("write out of bounds at {addr}, dropped"),
        }
    }

    fn effective_addr(&self, off: i16) -> u32 { (self.sp as i64 + off as i64) as u32 }

    /// Runs from `pc` 0 until the top-level script returns or the PC runs
    /// off the end of the image (§4.4's "failure model"). Returns whatever
    /// non-fatal `Trace`s were reported along the way.
    pub fn run(&mut self, image: &Bytecode) -> Vec<Trace> {
        self.pc = 0;
        self.halted = false;
        while !self.halted {
            let Some((op, next)) = image.decode_at(self.pc as usize) else {
                let trace = Trace::PcOutOfBounds { pc: self.pc, len: image.len() as u32 };
                warn!("{trace}");
                self.traces.push(trace);
                break;
            };
            self.pc = next as u32;
            self.step(image, op);
        }
        std::mem::take(&mut self.traces)
    }

    fn push_bytes(&mut self, value: i32, kind: ValueKind) {
        self.write_mem(self.sp, value);
        self.sp += 4;
        if self.in_params {
            let k = self.latched_type.take().unwrap_or(kind);
            self.pushed_types.push(k);
        }
    }

    fn pop_bytes(&mut self) -> Option<i32> {
        if self.sp < 4 {
            let trace = Trace::StackUnderflow { pc: self.pc };
            warn!("{trace}");
            self.traces.push(trace);
            return None;
        }
        self.sp -= 4;
        Some(self.read_mem(self.sp))
    }

    fn step(&mut self, image: &Bytecode, op: Op) {
        match op {
            Op::Push32Imm(v) => self.push_bytes(v, ValueKind::INT),
            Op::Push32Reg(r) => { let v = self.get_reg(r); self.push_bytes(v, ValueKind::INT); }
            Op::Pop32(r) => { if let Some(v) = self.pop_bytes() { self.set_reg(r, v); } }
            Op::Load32Rel { off, reg } => {
                let addr = self.effective_addr(off);
                let v = self.read_mem(addr);
                self.set_reg(reg, v);
            }
            Op::Load32Abs { addr, reg } => {
                let v = self.read_mem(addr);
                self.set_reg(reg, v);
            }
            Op::Arith32Add { lhs, rhs } => {
                let result = self.get_reg(lhs).wrapping_add(self.get_reg(rhs));
                self.set_reg(Reg::Xr, result);
            }
            Op::Save32Imm { off, value } => { let addr = self.effective_addr(off); self.write_mem(addr, value); }
            Op::Save32Reg { off, reg } => { let addr = self.effective_addr(off); let v = self.get_reg(reg); self.write_mem(addr, v); }
            Op::Save32AbsImm { addr, value } => self.write_mem(addr, value),
            Op::Save32AbsReg { addr, reg } => { let v = self.get_reg(reg); self.write_mem(addr, v); }
            Op::JumpRelative(off) => self.pc = (self.pc as i64 + off as i64) as u32,
            Op::JumpAbsolute(addr) => self.pc = addr,
            Op::JumpAbsoluteReg(reg) => self.pc = self.get_reg(reg) as u32,
            Op::CallAbsolute(target) => self.do_call_absolute(target),
            Op::ReturnToCaller => self.do_return(),
            Op::CallExternal(hash) => self.do_call_external(image, hash),
            Op::DataString(_) => {} // no-op at dispatch; PC already walked past it
            Op::ParamsStart => self.in_params = true,
            Op::TypeInt => self.latched_type = Some(ValueKind::INT),
            Op::TypeString => self.latched_type = Some(ValueKind::STRING),
            Op::Move32Imm { reg, value } => self.set_reg(reg, value),
        }
    }

    fn do_call_absolute(&mut self, target: u32) {
        if self.frames.len() >= self.frame_capacity {
            let trace = Trace::CallFramesExhausted { capacity: self.frame_capacity };
            warn!("{trace}");
            self.traces.push(trace);
            self.halted = true;
            return;
        }
        self.set_reg(Reg::Ra, self.pc as i32);
        self.frames.push(CallFrame { sp: self.sp });
        self.pushed_types.clear();
        self.in_params = false;
        self.pc = target;
    }

    fn do_return(&mut self) {
        self.pushed_types.clear();
        self.in_params = false;
        match self.frames.pop() {
            Some(frame) => {
                self.sp = frame.sp;
                self.pc = self.get_reg(Reg::Ra) as u32;
            }
            None => {
                debug!("return-to-caller with an empty frame stack; treating as program end");
                self.halted = true;
            }
        }
    }

    fn do_call_external(&mut self, image: &Bytecode, hash: u32) {
        // Popped in reverse push order, then reversed again so the callback
        // sees first-declared-first (§4.4).
        let kinds: Vec<ValueKind> = self.pushed_types.drain(..).collect();
        let mut args = Vec::with_capacity(kinds.len());
        for kind in kinds.iter().rev() {
            let raw = match self.pop_bytes() {
                Some(v) => v,
                None => break,
            };
            let value = match *kind {
                ValueKind::STRING => string_from_bytecode(image.as_bytes(), raw as u32),
                _ => Value::Int(raw),
            };
            args.push(value);
        }
        args.reverse();
        self.in_params = false;

        match self.externals.get(hash) {
            Some(f) => f(&args),
            None => {
                let trace = Trace::MissingExternal { hash };
                warn!("{trace}");
                self.traces.push(trace);
                // The emitter already decrements its tracked offset for a
                // missing external (§4.3); popping here keeps the VM's SP
                // in sync instead of leaving arguments stranded (§9's
                // suggested correction to the original's known hazard).
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::Emitter;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{FsLoader, Source};

    fn compile(src: &str) -> Bytecode {
        let loader = FsLoader;
        let (tokens, sources, _) = Lexer::tokenize(Source::inline(src), &loader, 16);
        let parsed = Parser::new(tokens, sources).parse();
        assert!(!parsed.has_errors, "{:?}", parsed.diagnostics);
        Emitter::new().emit_program(&parsed.ast, parsed.ast.root.unwrap()).image
    }

    fn run(src: &str) -> Vm {
        let image = compile(src);
        let mut vm = Vm::new(&Config::default(), ExternalRegistry::with_builtins());
        vm.run(&image);
        vm
    }

    #[test]
    fn global_literal_lands_on_the_stack() {
        let vm = run("global int x = 42;");
        assert_eq!(vm.read_mem(0), 42);
    }

    #[test]
    fn addition_of_two_locals() {
        // local a = 2, local b = 3, global r = a + b
        let vm = run("local int a = 2;\nlocal int b = 3;\nglobal int r = a + b;");
        // r is the third declared variable, at stack offset 8
        assert_eq!(vm.read_mem(8), 5);
    }

    #[test]
    fn forward_call_across_functions_computes_expected_result() {
        let vm = run(
            "fn dbl(int x) int { return x + x; }\nfn q(int x) int { return dbl(x) + 1; }\nglobal int r = q(5);",
        );
        // `r`'s one push lands at offset 4: the call to `q(5)` pushes RA
        // (offset 0) and the argument (offset 4) before `r`'s own push.
        assert_eq!(vm.read_mem(4), 11);
    }

    #[test]
    fn missing_external_does_not_leave_the_stack_unbalanced() {
        let image = compile("log(1, 2);");
        let mut vm = Vm::new(&Config::default(), ExternalRegistry::new());
        let sp_before_call_sequence = vm.sp;
        vm.run(&image);
        // RA push/pop cancel out, and both arguments are popped despite the
        // missing callback (§9's suggested correction), so SP nets to zero.
        assert_eq!(vm.sp, sp_before_call_sequence);
    }
}
