//! The bytecode pipeline stage (§3, §4.3, §6): turns a parsed [`crate::ast::Ast`]
//! into a [`Bytecode`] image the VM or x86 transcriber can run.

pub mod emitter;
pub mod image;
pub mod ir;
pub mod op;
pub mod reg;

pub use emitter::{EmitResult, Emitter, FuncHandle, VarHandle};
pub use image::Bytecode;
pub use ir::{Inst, IrBase, IrEmitter};
pub use op::{Op, OpBase};
pub use reg::{Reg, RegSet, Registers};
