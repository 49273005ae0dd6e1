//! Remap kernel generator.
//!
//! Builds the QPU program every thread runs. The program has three phases:
//!
//! 1. **Init**: consume the launch stream, derive addresses, increments and
//!    strides, prime the store engine (coordinator only), issue the first
//!    coordinate and colour fetches and run one priming half-tile.
//! 2. **Main loop**: tile rows outer, tile columns inner, two half-tiles per
//!    tile (see [`schedule`]).
//! 3. **Finalize**: drain the last fetch and store, join all threads on the
//!    completion semaphore, raise the host interrupt (coordinator), end.
//!
//! # Preconditions
//!
//! The kernel validates nothing at run time. The frame width must be a
//! multiple of [`schedule::TILE_COLUMNS`], the height a multiple of the thread
//! count, and the launch stream must match [`crate::launch`]. Violations
//! produce misplaced output, not an error.

pub mod barrier;
pub mod coord;
pub mod gather;
pub mod plan;
pub mod schedule;
pub mod scratch;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::asm::{AddOp, Alu, Assembler, Dst, MulOp, Program, Signal, SmallImm, Src};
use crate::error::KernelError;
use barrier::Join;
use plan::{RegisterPlan, Role};
use schedule::{HalfTile, Plane, Scheduler};
use scratch::{ScratchLayout, STRIDE_SETUP_ID};

/// Default thread count: every QPU of the chip.
pub const DEFAULT_THREADS: usize = 12;

/// Largest supported thread count.
pub const MAX_THREADS: usize = 12;

/// Bytes of one map row segment (16 entries) per thread.
pub const MAP_ROW_BYTES: u32 = 64;

/// Kernel build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Threads running the program, even and at most [`MAX_THREADS`].
    pub threads: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
        }
    }
}

impl KernelConfig {
    /// Config for `threads` threads.
    #[must_use]
    pub const fn with_threads(threads: usize) -> Self {
        Self { threads }
    }

    /// Checks the thread count.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Threads`] for odd, zero or oversized counts.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.threads == 0 || self.threads % 2 != 0 || self.threads > MAX_THREADS {
            return Err(KernelError::Threads(self.threads));
        }
        Ok(())
    }

    /// Scratch layout for this thread count.
    #[must_use]
    pub const fn layout(&self) -> ScratchLayout {
        ScratchLayout::new(self.threads)
    }
}

/// Builds the remap kernel.
///
/// # Errors
///
/// Returns [`KernelError`] for an invalid configuration or if the generated
/// sequence cannot be encoded.
pub fn build_kernel(config: &KernelConfig) -> Result<Program, KernelError> {
    config.validate()?;
    RegisterPlan::standard().validate()?;

    let mut asm = Assembler::new();
    let scheduler = Scheduler::new(config.threads);

    emit_init(&mut asm, config, &scheduler);
    let init_len = asm.len();
    scheduler.emit_main_loop(&mut asm);
    let loop_len = asm.len() - init_len;
    emit_finalize(&mut asm, config);
    debug!(init = init_len, main_loop = loop_len, "kernel phases emitted");

    let program = asm.finish()?;
    info!(
        threads = config.threads,
        instructions = program.len(),
        "built remap kernel"
    );
    Ok(program)
}

const INT_1: Src = Src::Imm(SmallImm::int_const(1));
const INT_2: Src = Src::Imm(SmallImm::int_const(2));
const INT_4: Src = Src::Imm(SmallImm::int_const(4));

/// Init phase.
fn emit_init(asm: &mut Assembler, config: &KernelConfig, scheduler: &Scheduler) {
    let n = config.threads as u32;
    let (r0, r1, r2, r3) = (Src::Acc(0), Src::Acc(1), Src::Acc(2), Src::Acc(3));

    // unit 0 fetches map entries, unit 1 colour samples
    asm.mov(Dst::TmuNoSwap, INT_1);

    // stream address, then skip the texture words
    asm.emit(Alu::add(
        AddOp::Add,
        Role::TextureConfigAddr.dst(),
        Src::Uniform,
        INT_4,
    ));
    for _ in 0..4 {
        asm.mov(Dst::Null, Src::Uniform);
    }
    asm.mov(Role::ThreadIndex.dst(), Src::Uniform);

    // map address: base + thread * 64 + lane * 4
    asm.ldi(Dst::Acc(0), MAP_ROW_BYTES);
    asm.emit(Alu::mul(
        MulOp::Mul24,
        Dst::Acc(0),
        r0,
        Role::ThreadIndex.src(),
    ));
    asm.emit(Alu::add(AddOp::Add, Role::MapAddr.dst(), Src::Uniform, r0));
    asm.emit(Alu::add(AddOp::Shl, Dst::Acc(1), Src::ElementNumber, INT_2));
    asm.emit(Alu::add(
        AddOp::Add,
        Role::MapAddr.dst(),
        Role::MapAddr.src(),
        r1,
    ));

    for role in [
        Role::YAddr,
        Role::LumaWriteSetup,
        Role::ChromaWriteSetup,
        Role::TileColCount,
        Role::TileRowCount,
    ] {
        asm.mov(role.dst(), Src::Uniform);
    }
    asm.mov(Dst::Acc(0), Src::Uniform); // width
    asm.mov(Dst::Acc(1), Src::Uniform); // height

    // plane bases
    asm.emit(Alu::mul(MulOp::Mul24, Dst::Acc(2), r0, r1));
    asm.emit(Alu::add(AddOp::Add, Role::UAddr.dst(), Role::YAddr.src(), r2));
    asm.emit(Alu::add(AddOp::Shr, Dst::Acc(2), r2, INT_2));
    asm.emit(Alu::add(AddOp::Add, Role::VAddr.dst(), Role::UAddr.src(), r2));

    // row increments
    asm.ldi(Dst::Acc(3), n - 1);
    asm.emit(Alu::mul(MulOp::Mul24, Role::LumaRowIncrement.dst(), r0, r3));
    asm.emit(Alu::add(AddOp::Shr, Dst::Acc(2), r0, INT_1));
    asm.ldi(Dst::Acc(3), n / 2 - 1);
    asm.emit(Alu::mul(MulOp::Mul24, Role::ChromaRowIncrement.dst(), r2, r3));

    // store strides
    asm.ldi(Dst::Acc(2), schedule::HALF_TILE_COLUMNS as u32);
    asm.emit(Alu::add(AddOp::Sub, Dst::Acc(2), r0, r2));
    asm.mov(Role::LumaStoreStride.dst(), r2);
    asm.emit(Alu::add(AddOp::Shr, Role::ChromaStoreStride.dst(), r2, INT_1));

    asm.ldi(Role::Reciprocal.dst(), coord::RECIPROCAL_BITS);
    asm.ldi(Role::MapIncrement.dst(), MAP_ROW_BYTES * n);
    asm.ldi(Role::LumaColIncrement.dst(), schedule::HALF_TILE_COLUMNS as u32);
    asm.ldi(
        Role::ChromaColIncrement.dst(),
        schedule::HALF_TILE_COLUMNS as u32 / 2,
    );

    // warm the store engine with a harmless V store from slot 1
    let dummy = Plane::ChromaV.store(config.layout(), 1);
    asm.coordinator_only(Role::ThreadIndex.src(), |asm| {
        asm.ldi(Dst::Acc(0), STRIDE_SETUP_ID);
        asm.emit(Alu::add(
            AddOp::Or,
            Dst::VpmSetup,
            r0,
            Role::ChromaStoreStride.src(),
        ));
        asm.ldi(Dst::VpmSetup, dummy.word());
        asm.mov(Dst::VpmStoreAddr, Role::VAddr.src());
    });

    // first coordinate, first colour request
    asm.mov(Dst::Tmu0S, Role::MapAddr.src());
    asm.emit(Alu::add(
        AddOp::Add,
        Role::MapAddr.dst(),
        Role::MapAddr.src(),
        Role::MapIncrement.src(),
    ));
    asm.signal(Signal::LoadTmu0);
    coord::emit_receive(asm);
    coord::emit_issue(asm, None);

    scheduler.emit_half_tile(
        asm,
        HalfTile {
            store_index: 1,
            advance: false,
        },
    );
}

/// Finalize phase.
fn emit_finalize(asm: &mut Assembler, config: &KernelConfig) {
    asm.signal(Signal::LoadTmu1);
    asm.wait_store();
    Join::completion(config.threads).emit(asm);
    asm.thread_end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Instr, SemaOp};

    #[test]
    fn default_config_builds() {
        let program = build_kernel(&KernelConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        assert!(program.len() > 500);
        assert_eq!(program.words().last(), Some(&crate::asm::NOP_WORD));
    }

    #[test]
    fn odd_thread_count_is_rejected() {
        assert!(matches!(
            build_kernel(&KernelConfig::with_threads(5)),
            Err(KernelError::Threads(5))
        ));
        assert!(KernelConfig::with_threads(0).validate().is_err());
        assert!(KernelConfig::with_threads(14).validate().is_err());
    }

    #[test]
    fn semaphore_instruction_counts_scale_with_threads() {
        for n in [2usize, 4, 8, 12] {
            let program = build_kernel(&KernelConfig::with_threads(n)).unwrap_or_else(|e| panic!("{e}"));
            let count = |id: u8, op: SemaOp| {
                program
                    .instructions()
                    .iter()
                    .filter(|i| matches!(i, Instr::Sema { id: i2, op: o } if *i2 == id && *o == op))
                    .count()
            };
            // three half-tile barriers are emitted: priming and the two in a tile
            assert_eq!(count(1, SemaOp::Up), 3);
            assert_eq!(count(1, SemaOp::Down), 3 * n);
            assert_eq!(count(2, SemaOp::Up), 3 * n);
            assert_eq!(count(0, SemaOp::Up), 1);
            assert_eq!(count(0, SemaOp::Down), n);
        }
    }

    #[test]
    fn shift_and_flag_operands_are_integers() {
        let value = |src: Src| match src {
            Src::Imm(imm) => SmallImm::value_of(imm.code()),
            _ => None,
        };
        assert_eq!(value(INT_1), Some(1));
        assert_eq!(value(INT_2), Some(2));
        assert_eq!(value(INT_4), Some(4));
    }

    #[test]
    fn one_thread_end() {
        let program = build_kernel(&KernelConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        let ends = program
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instr::Alu(a) if a.sig == Signal::ThreadEnd))
            .count();
        assert_eq!(ends, 1);
    }
}
