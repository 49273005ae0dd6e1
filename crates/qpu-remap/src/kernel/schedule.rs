//! Tile and half-tile scheduling.
//!
//! A tile is 128 output columns by N rows (one row per thread). It is
//! produced as two half-tiles of 64 columns, each in four sub-steps of 16
//! columns. The texture fetches are software-pipelined one sub-step ahead:
//! a sub-step consumes the colour sample requested by the previous one and
//! requests the next, so a half-tile with store index `s` writes scratch slot
//! `1 - s` while the coordinator stores slot `s`, filled one half-tile
//! earlier.
//!
//! ```text
//! sub-step t   wait colour -> fetch coord -> unpack/gather -> scratch write
//!              -> convert coord -> fetch colour -> (coordinator) arm store
//! t = 0,1,2    arm Y, U, V store of slot s
//! t = 3        half-tile rendezvous
//! ```

use tracing::debug;

use crate::asm::{AddOp, Alu, Assembler, Dst, MulOp, Pack, Signal, SmallImm, Src, Unpack};
use crate::kernel::barrier::Rendezvous;
use crate::kernel::coord;
use crate::kernel::gather;
use crate::kernel::plan::Role;
use crate::kernel::scratch::{ScratchLayout, StoreSetup, STRIDE_SETUP_ID};

/// Output columns per sub-step.
pub const STEP_COLUMNS: usize = 16;

/// Sub-steps per half-tile.
pub const STEPS_PER_HALF: usize = 4;

/// Output columns per half-tile.
pub const HALF_TILE_COLUMNS: usize = STEP_COLUMNS * STEPS_PER_HALF;

/// Output columns per tile.
pub const TILE_COLUMNS: usize = 2 * HALF_TILE_COLUMNS;

/// Output plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Y.
    Luma,
    /// U.
    ChromaU,
    /// V.
    ChromaV,
}

impl Plane {
    const fn addr(self) -> Role {
        match self {
            Self::Luma => Role::YAddr,
            Self::ChromaU => Role::UAddr,
            Self::ChromaV => Role::VAddr,
        }
    }

    const fn stride(self) -> Role {
        match self {
            Self::Luma => Role::LumaStoreStride,
            Self::ChromaU | Self::ChromaV => Role::ChromaStoreStride,
        }
    }

    const fn column_increment(self) -> Role {
        match self {
            Self::Luma => Role::LumaColIncrement,
            Self::ChromaU | Self::ChromaV => Role::ChromaColIncrement,
        }
    }

    /// Store setup reading slot `slot` of this plane.
    #[must_use]
    pub const fn store(self, layout: ScratchLayout, slot: u32) -> StoreSetup {
        match self {
            Self::Luma => layout.luma_store(slot),
            Self::ChromaU => layout.chroma_u_store(slot),
            Self::ChromaV => layout.chroma_v_store(slot),
        }
    }

    /// Plane whose store is armed at sub-step `t`, if any.
    #[must_use]
    pub const fn armed_at(t: usize) -> Option<Self> {
        match t {
            0 => Some(Self::Luma),
            1 => Some(Self::ChromaU),
            2 => Some(Self::ChromaV),
            _ => None,
        }
    }
}

/// One half-tile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfTile {
    /// Slot stored during this pass; the other slot is written.
    pub store_index: u32,
    /// Advance the output addresses after arming each store.
    pub advance: bool,
}

impl HalfTile {
    /// Slot written during this pass.
    #[must_use]
    pub const fn write_slot(self) -> u32 {
        1 - self.store_index
    }
}

/// Emission context shared by the scheduler functions.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    threads: usize,
    layout: ScratchLayout,
}

impl Scheduler {
    /// Scheduler for `threads` threads.
    #[must_use]
    pub const fn new(threads: usize) -> Self {
        Self {
            threads,
            layout: ScratchLayout::new(threads),
        }
    }

    /// Coordinator-only store arming: wait, stride, block setup, start.
    pub fn emit_store(&self, asm: &mut Assembler, plane: Plane, slot: u32, advance: bool) {
        let store = plane.store(self.layout, slot);
        asm.coordinator_only(Role::ThreadIndex.src(), |asm| {
            asm.wait_store();
            asm.ldi(Dst::Acc(0), STRIDE_SETUP_ID);
            asm.emit(Alu::add(
                AddOp::Or,
                Dst::VpmSetup,
                Src::Acc(0),
                plane.stride().src(),
            ));
            asm.ldi(Dst::VpmSetup, store.word());
            asm.mov(Dst::VpmStoreAddr, plane.addr().src());
            if advance {
                asm.emit(Alu::add(
                    AddOp::Add,
                    plane.addr().dst(),
                    plane.addr().src(),
                    plane.column_increment().src(),
                ));
            }
        });
    }

    /// Emits one sub-step.
    fn emit_step(&self, asm: &mut Assembler, half: HalfTile, t: usize) {
        let one = Src::Imm(SmallImm::ONE);
        let sample = Role::Sample.src();
        let w = half.write_slot();

        // colour sample of the previous sub-step; next coordinate request
        asm.signal(Signal::LoadTmu1);
        asm.mov(Role::Sample.dst(), Src::Acc(4));
        asm.mov(Dst::Tmu0S, Role::MapAddr.src());

        // unpack Y, U, V as floats
        asm.emit(Alu::mul(MulOp::FMul, Dst::Acc(0), sample, one).unpack(Unpack::A8));
        asm.emit(
            Alu::mov(Role::Luma.dst(), Src::Acc(0))
                .with_mul(MulOp::FMul, Dst::Acc(0), sample, one)
                .unpack(Unpack::B8),
        );
        asm.emit(
            Alu::mov(Dst::Acc(2), Src::Acc(0))
                .with_mul(MulOp::FMul, Dst::Acc(0), sample, one)
                .unpack(Unpack::C8),
        );
        asm.emit(
            Alu::add(
                AddOp::Add,
                Role::MapAddr.dst(),
                Role::MapAddr.src(),
                Role::MapIncrement.src(),
            )
            .with_mul_mov(Dst::Acc(3), Src::Acc(0)),
        );

        asm.mov(Dst::Acc(0), Role::ChromaU.src());
        asm.mov(Dst::Acc(1), Role::ChromaV.src());
        gather::emit_chroma_gather(asm, t);

        asm.emit(
            Alu::nop()
                .with_mul_mov(Role::ChromaU.dst(), Src::Acc(0))
                .signal(Signal::LoadTmu0),
        );
        coord::emit_receive(asm);

        asm.ldi(Dst::Acc(0), self.layout.luma_write_offset(w, t as u32));
        asm.emit(Alu::add(
            AddOp::Add,
            Dst::VpmSetup,
            Role::LumaWriteSetup.src(),
            Src::Acc(0),
        ));
        coord::emit_issue(asm, Some((Role::ChromaV.dst(), Src::Acc(1))));

        asm.emit(Alu::mul(MulOp::FMul, Dst::Vpm, Role::Luma.src(), one).pack(Pack::Color8a));
        if t % 2 == 1 {
            asm.ldi(Dst::Acc(2), self.layout.chroma_write_offset(w, t as u32));
            asm.emit(Alu::add(
                AddOp::Add,
                Dst::VpmSetup,
                Role::ChromaWriteSetup.src(),
                Src::Acc(2),
            ));
            for chroma in [Role::ChromaU, Role::ChromaV] {
                asm.emit(Alu::mul(MulOp::FMul, Dst::Vpm, chroma.src(), one).pack(Pack::Color8a));
            }
        }

        match Plane::armed_at(t) {
            Some(plane) => self.emit_store(asm, plane, half.store_index, half.advance),
            None => Rendezvous::half_tile(self.threads).emit(asm),
        }
    }

    /// Emits one half-tile pass.
    pub fn emit_half_tile(&self, asm: &mut Assembler, half: HalfTile) {
        let start = asm.len();
        for t in 0..STEPS_PER_HALF {
            self.emit_step(asm, half, t);
        }
        debug!(
            store_index = half.store_index,
            advance = half.advance,
            instructions = asm.len() - start,
            "emitted half-tile"
        );
    }

    /// Emits one tile: both half-tiles.
    pub fn emit_tile(&self, asm: &mut Assembler) {
        for store_index in 0..2 {
            self.emit_half_tile(
                asm,
                HalfTile {
                    store_index,
                    advance: true,
                },
            );
        }
    }

    /// Emits the tile-row and tile-column loops.
    pub fn emit_main_loop(&self, asm: &mut Assembler) {
        asm.countdown(
            "tile_row",
            Role::TileRowCounter.rw(),
            Role::TileRowCount.src(),
            |asm| {
                asm.countdown(
                    "tile_col",
                    Role::TileColCounter.rw(),
                    Role::TileColCount.src(),
                    |asm| self.emit_tile(asm),
                );
                for (addr, inc) in [
                    (Role::YAddr, Role::LumaRowIncrement),
                    (Role::UAddr, Role::ChromaRowIncrement),
                    (Role::VAddr, Role::ChromaRowIncrement),
                ] {
                    asm.emit(Alu::add(AddOp::Add, addr.dst(), addr.src(), inc.src()));
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Instr, Program};

    fn half_tile_program(threads: usize, half: HalfTile) -> Program {
        let mut asm = Assembler::new();
        Scheduler::new(threads).emit_half_tile(&mut asm, half);
        asm.thread_end();
        asm.finish().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn half_tile_arms_three_stores_and_one_barrier() {
        let program = half_tile_program(
            12,
            HalfTile {
                store_index: 0,
                advance: true,
            },
        );
        let stats = program.stats();
        assert_eq!(stats.store_starts, 3);
        assert_eq!(stats.tmu_loads, 8);
        assert_eq!(stats.vpm_writes, 4 + 2 * 2);
        assert_eq!(stats.semaphore_ups, 1 + 12);
        assert_eq!(stats.semaphore_downs, 12 + 1);
    }

    #[test]
    fn priming_pass_does_not_advance() {
        let advancing = half_tile_program(
            4,
            HalfTile {
                store_index: 1,
                advance: true,
            },
        );
        let priming = half_tile_program(
            4,
            HalfTile {
                store_index: 1,
                advance: false,
            },
        );
        assert_eq!(advancing.len(), priming.len() + 3);
    }

    #[test]
    fn stores_read_the_slot_not_being_written() {
        let layout = ScratchLayout::new(12);
        let program = half_tile_program(
            12,
            HalfTile {
                store_index: 1,
                advance: true,
            },
        );
        let expected: Vec<u32> = [Plane::Luma, Plane::ChromaU, Plane::ChromaV]
            .iter()
            .map(|p| p.store(layout, 1).word())
            .collect();
        let setups: Vec<u32> = program
            .instructions()
            .iter()
            .filter_map(|i| match i {
                Instr::LoadImm(ldi) if ldi.dst == Dst::VpmSetup => match ldi.value {
                    crate::asm::Immediate::Word(w) => Some(w),
                    crate::asm::Immediate::Lanes(_) => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(setups, expected);
    }

    #[test]
    fn geometry_constants() {
        assert_eq!(HALF_TILE_COLUMNS, 64);
        assert_eq!(TILE_COLUMNS, 128);
        assert_eq!(Plane::armed_at(3), None);
    }
}
