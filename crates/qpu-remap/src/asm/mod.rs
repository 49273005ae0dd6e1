//! QPU assembler: instruction IR, structured builder, encoder and listing.
//!
//! The kernel generator emits instructions through [`Assembler`], which
//! provides labels, the structured control-flow helpers the kernel needs
//! (coordinator-only blocks and countdown loops) and produces a resolved,
//! encoded [`Program`].

pub mod builder;
pub mod encode;
pub mod isa;
pub mod program;

pub use builder::{Assembler, Label};
pub use encode::{Fields, NOP_WORD};
pub use isa::{
    AddOp, Alu, Bank, BranchCond, Cond, Dst, Immediate, Instr, LoadImm, MulOp, Pack, Rotation,
    SemaOp, Signal, SmallImm, Src, Unpack, LANES,
};
pub use program::{Program, ProgramStats};
