//! Structured instruction-sequence builder.
//!
//! # Control Flow Helpers
//!
//! Two patterns recur throughout the kernel and are provided here so the
//! kernel phases read as structured code:
//!
//! - [`Assembler::coordinator_only`]: a block executed only by the thread
//!   whose index is zero. Implemented as a flag-setting move of the thread
//!   index, a branch past the block when every lane is non-zero, and the
//!   three branch delay slots filled with no-ops.
//! - [`Assembler::countdown`]: a loop running its body `count` times. The
//!   decrement sets flags, the branch tests them, and the counter write-back
//!   rides in the first delay slot so it happens on both paths.

use std::collections::BTreeMap;

use tracing::debug;

use super::encode::encode;
use super::isa::{
    AddOp, Alu, BranchCond, Dst, Immediate, Instr, LoadImm, SemaOp, Signal, SmallImm, Src, LANES,
};
use super::program::Program;
use crate::error::AsmError;

/// Branch delay slots on the QPU.
pub const BRANCH_DELAY_SLOTS: usize = 3;

/// Instructions that still execute after a thread-end signal.
pub const THREAD_END_DELAY_SLOTS: usize = 2;

/// Forward or backward branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    /// Numeric identity.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

/// Instruction-sequence builder.
///
/// Collects instructions with symbolic branch targets; [`Assembler::finish`]
/// binds them and encodes the program.
#[derive(Debug, Default)]
pub struct Assembler {
    instrs: Vec<Instr<Label>>,
    names: Vec<String>,
    bound: Vec<Option<usize>>,
    deferred: Option<AsmError>,
}

impl Assembler {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// True when nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Appends one instruction.
    pub fn emit(&mut self, instr: impl Into<Instr<Label>>) {
        self.instrs.push(instr.into());
    }

    /// Appends a no-op.
    pub fn nop(&mut self) {
        self.emit(Alu::nop());
    }

    /// Appends `count` no-ops.
    pub fn nops(&mut self, count: usize) {
        for _ in 0..count {
            self.nop();
        }
    }

    /// Appends a no-op carrying a signal.
    pub fn signal(&mut self, sig: Signal) {
        self.emit(Alu::nop().signal(sig));
    }

    /// Appends an add-unit move.
    pub fn mov(&mut self, dst: Dst, src: Src) {
        self.emit(Alu::mov(dst, src));
    }

    /// Appends a flag-setting move into the null register.
    pub fn test(&mut self, src: Src) {
        self.emit(Alu::mov(Dst::Null, src).set_flags());
    }

    /// Appends a 32-bit load immediate.
    pub fn ldi(&mut self, dst: Dst, value: u32) {
        self.emit(LoadImm {
            dst,
            value: Immediate::Word(value),
            set_flags: false,
        });
    }

    /// Appends a per-lane load immediate, optionally setting flags.
    pub fn ldi_lanes(&mut self, dst: Dst, lanes: [u8; LANES], set_flags: bool) {
        self.emit(LoadImm {
            dst,
            value: Immediate::Lanes(lanes),
            set_flags,
        });
    }

    /// Appends a semaphore increment.
    pub fn sema_up(&mut self, id: u8) {
        self.emit(Instr::Sema { id, op: SemaOp::Up });
    }

    /// Appends a semaphore decrement.
    pub fn sema_down(&mut self, id: u8) {
        self.emit(Instr::Sema {
            id,
            op: SemaOp::Down,
        });
    }

    /// Blocks until the store engine has finished its transfer.
    pub fn wait_store(&mut self) {
        self.mov(Dst::Null, Src::VpmStoreWait);
    }

    /// Appends a branch. The caller fills the delay slots.
    pub fn branch(&mut self, cond: BranchCond, target: Label) {
        self.emit(Instr::Branch { cond, target });
    }

    /// Creates an unbound label.
    pub fn label(&mut self, name: impl Into<String>) -> Label {
        let id = self.bound.len() as u32;
        self.names.push(name.into());
        self.bound.push(None);
        Label(id)
    }

    /// Binds `label` to the next instruction.
    ///
    /// Binding twice is reported by [`Assembler::finish`].
    pub fn bind(&mut self, label: Label) {
        let here = self.instrs.len();
        match self.bound.get_mut(label.0 as usize) {
            Some(slot @ None) => *slot = Some(here),
            Some(Some(_)) => {
                self.deferred.get_or_insert(AsmError::ReboundLabel(label));
            }
            None => {
                self.deferred.get_or_insert(AsmError::UnboundLabel(label));
            }
        }
    }

    /// Emits `body` so that only thread 0 executes it.
    pub fn coordinator_only(&mut self, thread_index: Src, body: impl FnOnce(&mut Self)) {
        let skip = self.label("coordinator_end");
        self.test(thread_index);
        self.branch(BranchCond::AllZeroClear, skip);
        self.nops(BRANCH_DELAY_SLOTS);
        body(self);
        self.bind(skip);
    }

    /// Emits `body` inside a loop that runs `count` times (`count >= 1`).
    ///
    /// `counter` must be a register readable and writable by the add unit;
    /// r0 is clobbered at the bottom of each iteration.
    pub fn countdown(
        &mut self,
        name: &str,
        counter: (Dst, Src),
        count: Src,
        body: impl FnOnce(&mut Self),
    ) {
        let (counter_dst, counter_src) = counter;
        let top = self.label(name);
        self.mov(counter_dst, count);
        self.bind(top);
        body(self);
        self.emit(
            Alu::add(AddOp::Sub, Dst::Acc(0), counter_src, Src::Imm(ONE_INT)).set_flags(),
        );
        self.branch(BranchCond::AllZeroClear, top);
        self.mov(counter_dst, Src::Acc(0));
        self.nops(BRANCH_DELAY_SLOTS - 1);
    }

    /// Ends the thread: thread-end signal plus its delay slots.
    pub fn thread_end(&mut self) {
        self.signal(Signal::ThreadEnd);
        self.nops(THREAD_END_DELAY_SLOTS);
    }

    /// Resolves labels and encodes the program.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unbound or rebound labels and for any
    /// instruction that cannot be encoded.
    pub fn finish(self) -> Result<Program, AsmError> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        let bound = &self.bound;
        let resolved = self
            .instrs
            .into_iter()
            .map(|instr| {
                instr.map_target(|label| {
                    bound
                        .get(label.0 as usize)
                        .copied()
                        .flatten()
                        .ok_or(AsmError::UnboundLabel(label))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let words = resolved
            .iter()
            .enumerate()
            .map(|(index, instr)| encode(index, instr))
            .collect::<Result<Vec<_>, _>>()?;

        let mut labels: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (name, pos) in self.names.into_iter().zip(self.bound) {
            if let Some(pos) = pos {
                labels.entry(pos).or_default().push(name);
            }
        }
        debug!(
            instructions = words.len(),
            labels = labels.len(),
            "assembled program"
        );
        Ok(Program::new(resolved, words, labels))
    }
}

const ONE_INT: SmallImm = SmallImm::int_const(1);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::isa::Bank;

    #[test]
    fn unbound_label_is_reported() {
        let mut asm = Assembler::new();
        let missing = asm.label("missing");
        asm.branch(BranchCond::Always, missing);
        asm.nops(3);
        assert_eq!(asm.finish().err(), Some(AsmError::UnboundLabel(missing)));
    }

    #[test]
    fn rebinding_is_reported() {
        let mut asm = Assembler::new();
        let l = asm.label("twice");
        asm.bind(l);
        asm.nop();
        asm.bind(l);
        assert_eq!(asm.finish().err(), Some(AsmError::ReboundLabel(l)));
    }

    #[test]
    fn coordinator_block_skips_to_end() {
        let mut asm = Assembler::new();
        asm.coordinator_only(Src::Reg(Bank::A, 1), |asm| {
            asm.mov(Dst::HostInt, Src::Imm(ONE_INT));
        });
        asm.thread_end();
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        // test, branch, 3 delay slots, body, then the label
        match program.instructions()[1] {
            Instr::Branch { cond, target } => {
                assert_eq!(cond, BranchCond::AllZeroClear);
                assert_eq!(target, 6);
            }
            other => panic!("expected branch, got {other:?}"),
        }
        assert_eq!(program.len(), 9);
    }

    #[test]
    fn countdown_branches_back_to_body() {
        let mut asm = Assembler::new();
        let counter = (Dst::Reg(Bank::A, 7), Src::Reg(Bank::A, 7));
        asm.countdown("loop", counter, Src::Reg(Bank::B, 7), |asm| asm.nop());
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(program.len(), 7);
        assert!(matches!(
            program.instructions()[3],
            Instr::Branch { target: 1, .. }
        ));
        assert_eq!(program.labels_at(1), &["loop".to_string()]);
    }
}
