//! One emulated QPU thread.
//!
//! Executes raw instruction words, so the encoder is exercised end to end.
//!
//! # Timing Model
//!
//! Every instruction completes before the next one starts: register-file
//! writes are visible to the very next read, texture results are ready at the
//! next load signal and stores finish at the next wait. Branches take effect
//! after three delay slots, thread end after two.
//!
//! A thread advances by at most one instruction per [`Qpu::tick`]. A semaphore
//! operation that cannot complete leaves the program counter where it is and
//! is retried on the next tick.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asm::builder::{BRANCH_DELAY_SLOTS, THREAD_END_DELAY_SLOTS};
use crate::asm::encode::{lane_immediate, Fields, INSTR_BYTES, LDI_MODE_SEMA, MUX_A};
use crate::asm::isa::{raddr, sig, waddr, REGFILE_SIZE};
use crate::asm::{AddOp, Bank, BranchCond, Cond, MulOp, Pack, SemaOp, Signal, SmallImm, Unpack, LANES};
use crate::emu::memory::Memory;
use crate::emu::scratch::Scratch;
use crate::emu::sync::Semaphores;
use crate::emu::texture::Texture;
use crate::emu::trace::{EventKind, Trace};
use crate::emu::EmulatorOptions;
use crate::error::EmulatorError;
use crate::kernel::gather::rotate_lanes;
use crate::kernel::scratch::WriteSetupFields;

type Vector = [u32; LANES];

/// State every thread of one run shares.
#[derive(Debug)]
pub(crate) struct System<'p> {
    pub(crate) program: &'p [u64],
    pub(crate) memory: Memory,
    pub(crate) scratch: Scratch,
    pub(crate) semaphores: Semaphores,
    pub(crate) trace: Trace,
    pub(crate) options: EmulatorOptions,
}

/// Semaphore operation a thread is waiting to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stall {
    pub(crate) semaphore: u8,
    pub(crate) op: SemaOp,
}

/// What one tick did for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// One instruction retired.
    Ran,
    /// The current instruction is a semaphore operation that must wait.
    Blocked(Stall),
    /// The last thread-end delay slot retired.
    Ended(ThreadSummary),
}

/// Per-thread outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Thread index.
    pub thread: usize,
    /// Instructions executed.
    pub steps: u64,
    /// Ticks spent waiting on a semaphore.
    pub stalls: u64,
    /// Half-tile barriers passed.
    pub epochs: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    zero: bool,
    neg: bool,
    carry: bool,
}

/// ALU result with what the flags need.
struct Output {
    value: Vector,
    carry: [bool; LANES],
    float: bool,
}

impl Output {
    fn plain(value: Vector) -> Self {
        Self {
            value,
            carry: [false; LANES],
            float: false,
        }
    }
}

/// Values on the two read ports of one instruction.
struct Ports {
    a: Option<Vector>,
    b: Option<Vector>,
    unpack: Unpack,
}

/// Thread state.
pub(crate) struct Qpu {
    id: usize,
    regs: [[Vector; REGFILE_SIZE as usize]; 2],
    acc: [Vector; 6],
    flags: [Flags; LANES],
    pc: usize,
    uniform_addr: u32,
    fetched: [Option<Vector>; 2],
    coord_t: [Option<Vector>; 2],
    noswap: bool,
    write_setup: Option<WriteSetupFields>,
    branch: Option<(usize, usize)>,
    ending: Option<usize>,
    epoch: u32,
    steps: u64,
    stalls: u64,
}

impl Qpu {
    /// Thread `id` starting at instruction 0 with its uniforms at `uniforms`.
    pub(crate) fn new(id: usize, uniforms: u32) -> Self {
        Self {
            id,
            regs: [[[0; LANES]; REGFILE_SIZE as usize]; 2],
            acc: [[0; LANES]; 6],
            flags: [Flags::default(); LANES],
            pc: 0,
            uniform_addr: uniforms,
            fetched: [None; 2],
            coord_t: [None; 2],
            noswap: false,
            write_setup: None,
            branch: None,
            ending: None,
            epoch: 0,
            steps: 0,
            stalls: 0,
        }
    }

    pub(crate) const fn id(&self) -> usize {
        self.id
    }

    /// Retires at most one instruction.
    pub(crate) fn tick(&mut self, sys: &mut System<'_>) -> Result<Progress, EmulatorError> {
        let limit = sys.options.step_limit;
        if self.steps >= limit {
            return Err(EmulatorError::StepLimit {
                thread: self.id,
                limit,
            });
        }
        if let Some(stall) = self.step(sys)? {
            self.stalls += 1;
            return Ok(Progress::Blocked(stall));
        }
        self.steps += 1;

        self.pc += 1;
        if let Some((at, target)) = self.branch {
            if self.pc == at {
                self.pc = target;
                self.branch = None;
            }
        }
        match self.ending {
            Some(0) => return Ok(Progress::Ended(self.finish(sys))),
            Some(n) => self.ending = Some(n - 1),
            None => {}
        }
        Ok(Progress::Ran)
    }

    fn finish(&self, sys: &mut System<'_>) -> ThreadSummary {
        self.record(sys, EventKind::ThreadEnd);
        debug!(
            thread = self.id,
            steps = self.steps,
            stalls = self.stalls,
            epochs = self.epoch,
            "thread ended"
        );
        ThreadSummary {
            thread: self.id,
            steps: self.steps,
            stalls: self.stalls,
            epochs: self.epoch,
        }
    }

    fn record(&self, sys: &mut System<'_>, kind: EventKind) {
        sys.trace.record(self.id, self.epoch, kind);
    }

    fn unsupported(&self, what: impl Into<String>) -> EmulatorError {
        EmulatorError::Unsupported {
            thread: self.id,
            what: what.into(),
        }
    }

    fn step(&mut self, sys: &mut System<'_>) -> Result<Option<Stall>, EmulatorError> {
        let word = *sys.program.get(self.pc).ok_or(EmulatorError::PcOutOfRange {
            thread: self.id,
            pc: self.pc,
        })?;
        let f = Fields::decode(word);
        match f.sig {
            sig::BRANCH => self.branch(&f).map(|()| None),
            sig::LOAD_IMM if f.unpack == LDI_MODE_SEMA => Ok(self.semaphore(sys, f.imm)),
            sig::LOAD_IMM => self.load_immediate(sys, &f).map(|()| None),
            _ => self.alu(sys, &f).map(|()| None),
        }
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn branch(&mut self, f: &Fields) -> Result<(), EmulatorError> {
        let relative = f.cond_add & 0b100 != 0;
        let via_register = f.cond_add & 0b010 != 0;
        if !relative || via_register {
            return Err(self.unsupported("absolute or register-relative branch"));
        }
        let cond = BranchCond::from_code(f.pack)
            .ok_or_else(|| self.unsupported(format!("branch condition {}", f.pack)))?;
        if !self.branch_taken(cond) {
            return Ok(());
        }
        let after = self.pc + 1 + BRANCH_DELAY_SLOTS;
        let offset = i64::from(f.imm as i32) / INSTR_BYTES as i64;
        let target = usize::try_from(after as i64 + offset).map_err(|_| {
            EmulatorError::PcOutOfRange {
                thread: self.id,
                pc: self.pc,
            }
        })?;
        self.branch = Some((after, target));
        Ok(())
    }

    fn branch_taken(&self, cond: BranchCond) -> bool {
        let lanes = &self.flags;
        match cond {
            BranchCond::AllZeroSet => lanes.iter().all(|f| f.zero),
            BranchCond::AllZeroClear => lanes.iter().all(|f| !f.zero),
            BranchCond::AnyZeroSet => lanes.iter().any(|f| f.zero),
            BranchCond::AnyZeroClear => lanes.iter().any(|f| !f.zero),
            BranchCond::AllNegSet => lanes.iter().all(|f| f.neg),
            BranchCond::AllNegClear => lanes.iter().all(|f| !f.neg),
            BranchCond::AnyNegSet => lanes.iter().any(|f| f.neg),
            BranchCond::AnyNegClear => lanes.iter().any(|f| !f.neg),
            BranchCond::Always => true,
        }
    }

    // =========================================================================
    // Load immediate and semaphores
    // =========================================================================

    fn load_immediate(&mut self, sys: &mut System<'_>, f: &Fields) -> Result<(), EmulatorError> {
        let value = match f.unpack {
            0 => [f.imm; LANES],
            mode @ (1 | 3) => lane_immediate(mode, f.imm),
            mode => return Err(self.unsupported(format!("load-immediate mode {mode}"))),
        };
        let (add_bank, mul_bank) = write_banks(f.ws);
        self.write(sys, f.waddr_add, add_bank, cond_of(f.cond_add), &value)?;
        self.write(sys, f.waddr_mul, mul_bank, cond_of(f.cond_mul), &value)?;
        if f.sf {
            self.set_flags(&Output::plain(value));
        }
        Ok(())
    }

    /// Applies a semaphore operation, or reports the stall without side effects.
    fn semaphore(&mut self, sys: &mut System<'_>, imm: u32) -> Option<Stall> {
        let id = (imm & 0xF) as u8;
        let (op, kind) = if imm & 0x10 != 0 {
            (SemaOp::Down, EventKind::SemaDown { id })
        } else {
            (SemaOp::Up, EventKind::SemaUp { id })
        };
        if !sys.semaphores.try_apply(id, op) {
            return Some(Stall { semaphore: id, op });
        }
        self.record(sys, kind);
        if op == SemaOp::Down && id == sys.options.epoch_semaphore {
            self.epoch += 1;
        }
        None
    }

    // =========================================================================
    // ALU
    // =========================================================================

    fn alu(&mut self, sys: &mut System<'_>, f: &Fields) -> Result<(), EmulatorError> {
        let small_imm = f.sig == sig::SMALL_IMM;
        let signal = if small_imm {
            Signal::None
        } else {
            Signal::from_code(f.sig).ok_or_else(|| self.unsupported(format!("signal {}", f.sig)))?
        };
        let add_op = AddOp::from_code(f.op_add)
            .ok_or_else(|| self.unsupported(format!("add opcode {}", f.op_add)))?;
        let mul_op = MulOp::from_code(f.op_mul)
            .ok_or_else(|| self.unsupported(format!("mul opcode {}", f.op_mul)))?;
        let (unpack, pack) = self.pack_modes(f)?;
        let rotation = match (small_imm, f.raddr_b) {
            (true, 48) => return Err(self.unsupported("rotation by r5")),
            (true, code @ 49..=63) => Some(usize::from(code - 48)),
            _ => None,
        };

        let a = self.read_port(sys, Bank::A, f.raddr_a)?;
        let b = if small_imm {
            SmallImm::value_of(f.raddr_b).map(|v| [v; LANES])
        } else {
            self.read_port(sys, Bank::B, f.raddr_b)?
        };
        let ports = Ports { a, b, unpack };

        let add = if add_op == AddOp::Nop {
            None
        } else {
            let float = add_op.is_float_input();
            let a = self.operand(&ports, f.add_a, float)?;
            let b = self.operand(&ports, f.add_b, float)?;
            Some(add_lanes(add_op, &a, &b))
        };
        let mul = if mul_op == MulOp::Nop {
            None
        } else {
            let float = mul_op.is_float_input();
            let mut a = self.operand(&ports, f.mul_a, float)?;
            let mut b = self.operand(&ports, f.mul_b, float)?;
            if let Some(n) = rotation {
                a = rotate_lanes(&a, n);
                b = rotate_lanes(&b, n);
            }
            let mut out = mul_lanes(mul_op, &a, &b);
            if pack != Pack::None {
                out.value = out.value.map(|v| pack_colour(pack, v));
            }
            Some(out)
        };

        let (add_bank, mul_bank) = write_banks(f.ws);
        if let Some(out) = &add {
            self.write(sys, f.waddr_add, add_bank, cond_of(f.cond_add), &out.value)?;
        }
        if let Some(out) = &mul {
            self.write(sys, f.waddr_mul, mul_bank, cond_of(f.cond_mul), &out.value)?;
        }
        if f.sf {
            if let Some(out) = add.as_ref().or(mul.as_ref()) {
                self.set_flags(out);
            }
        }

        match signal {
            Signal::None => {}
            Signal::ThreadEnd => self.ending = Some(THREAD_END_DELAY_SLOTS),
            Signal::LoadTmu0 => self.load_fetch(0)?,
            Signal::LoadTmu1 => self.load_fetch(1)?,
        }
        Ok(())
    }

    fn pack_modes(&self, f: &Fields) -> Result<(Unpack, Pack), EmulatorError> {
        if f.pm {
            if f.unpack != 0 {
                return Err(self.unsupported(format!("r4 unpack {}", f.unpack)));
            }
            let pack = Pack::from_code(f.pack)
                .ok_or_else(|| self.unsupported(format!("mul pack {}", f.pack)))?;
            Ok((Unpack::None, pack))
        } else {
            if f.pack != 0 {
                return Err(self.unsupported(format!("register-file pack {}", f.pack)));
            }
            let unpack = Unpack::from_code(f.unpack)
                .ok_or_else(|| self.unsupported(format!("unpack {}", f.unpack)))?;
            Ok((unpack, Pack::None))
        }
    }

    fn read_port(
        &mut self,
        sys: &mut System<'_>,
        bank: Bank,
        code: u8,
    ) -> Result<Option<Vector>, EmulatorError> {
        match code {
            0..=31 => Ok(Some(self.regs[bank_index(bank)][usize::from(code)])),
            raddr::UNIFORM => {
                let value = sys.memory.read_u32(self.uniform_addr);
                self.uniform_addr = self.uniform_addr.wrapping_add(4);
                Ok(Some([value; LANES]))
            }
            raddr::ELEMENT_OR_QPU => Ok(Some(match bank {
                Bank::A => std::array::from_fn(|i| i as u32),
                Bank::B => [self.id as u32; LANES],
            })),
            raddr::NOP => Ok(None),
            raddr::VPM_ST_WAIT if bank == Bank::B => {
                sys.scratch.wait_store();
                self.record(sys, EventKind::StoreWaited);
                Ok(Some([0; LANES]))
            }
            _ => Err(self.unsupported(format!(
                "read address {code} on port {}",
                bank.letter()
            ))),
        }
    }

    fn operand(&self, ports: &Ports, mux: u8, float: bool) -> Result<Vector, EmulatorError> {
        match mux {
            0..=5 => Ok(self.acc[usize::from(mux)]),
            MUX_A => ports
                .a
                .map(|v| v.map(|x| unpack(ports.unpack, x, float)))
                .ok_or_else(|| self.unsupported("input mux reads an idle port A")),
            _ => ports
                .b
                .ok_or_else(|| self.unsupported("input mux reads an idle port B")),
        }
    }

    fn set_flags(&mut self, out: &Output) {
        for (lane, flags) in self.flags.iter_mut().enumerate() {
            let v = out.value[lane];
            *flags = Flags {
                zero: if out.float { v & 0x7FFF_FFFF == 0 } else { v == 0 },
                neg: v >> 31 == 1,
                carry: out.carry[lane],
            };
        }
    }

    fn passes(&self, cond: Cond, lane: usize) -> bool {
        let f = self.flags[lane];
        match cond {
            Cond::Never => false,
            Cond::Always => true,
            Cond::ZeroSet => f.zero,
            Cond::ZeroClear => !f.zero,
            Cond::NegSet => f.neg,
            Cond::NegClear => !f.neg,
            Cond::CarrySet => f.carry,
            Cond::CarryClear => !f.carry,
        }
    }

    // =========================================================================
    // Writes and peripherals
    // =========================================================================

    fn write(
        &mut self,
        sys: &mut System<'_>,
        addr: u8,
        bank: Bank,
        cond: Cond,
        value: &Vector,
    ) -> Result<(), EmulatorError> {
        let mask: [bool; LANES] = std::array::from_fn(|lane| self.passes(cond, lane));
        if !mask.contains(&true) {
            return Ok(());
        }
        let merge = |dst: &mut Vector| {
            for ((d, v), m) in dst.iter_mut().zip(value).zip(mask) {
                if m {
                    *d = *v;
                }
            }
        };
        match addr {
            0..=31 => merge(&mut self.regs[bank_index(bank)][usize::from(addr)]),
            32..=35 => merge(&mut self.acc[usize::from(addr - waddr::ACC0)]),
            waddr::TMU_NOSWAP => self.noswap = value[0] != 0,
            waddr::HOST_INT => self.record(sys, EventKind::HostInterrupt),
            waddr::NOP => {}
            waddr::UNIFORMS_ADDRESS => self.uniform_addr = value[0],
            waddr::VPM => self.scratch_write(sys, value)?,
            waddr::VPM_SETUP if bank == Bank::B => self.scratch_setup(sys, value[0])?,
            waddr::VPM_ST_ADDR if bank == Bank::B => self.start_store(sys, value[0])?,
            waddr::TMU0_S..=63 => self.fetch_write(sys, addr - waddr::TMU0_S, value)?,
            _ => {
                return Err(self.unsupported(format!(
                    "write address {addr} in space {}",
                    bank.letter()
                )))
            }
        }
        Ok(())
    }

    fn scratch_write(&mut self, sys: &mut System<'_>, value: &Vector) -> Result<(), EmulatorError> {
        let mut setup = self
            .write_setup
            .ok_or_else(|| self.unsupported("scratch write before any write setup"))?;
        let span = sys.scratch.write_packed(self.id, &mut setup, value)?;
        self.record(
            sys,
            EventKind::ScratchWrite {
                row: span.row,
                byte: span.byte,
                len: LANES,
            },
        );
        self.write_setup = Some(setup);
        Ok(())
    }

    fn scratch_setup(&mut self, sys: &mut System<'_>, word: u32) -> Result<(), EmulatorError> {
        if let Some(fields) = sys.scratch.setup(self.id, word)? {
            self.write_setup = Some(fields);
        }
        Ok(())
    }

    fn start_store(&mut self, sys: &mut System<'_>, addr: u32) -> Result<(), EmulatorError> {
        let store = sys.scratch.start_store(self.id, addr, &mut sys.memory)?;
        let pitch = store.row_bytes() as u32 + sys.scratch.stride();
        self.record(
            sys,
            EventKind::StoreArmed {
                vpm_y: store.y as usize,
                x: store.x as usize,
                rows: store.rows as usize,
                words: store.words as usize,
                addr,
                pitch,
            },
        );
        Ok(())
    }

    fn fetch_write(
        &mut self,
        sys: &System<'_>,
        offset: u8,
        value: &Vector,
    ) -> Result<(), EmulatorError> {
        let (unit, register) = (usize::from(offset / 4), offset % 4);
        if !self.noswap {
            return Err(EmulatorError::TmuAliasing { thread: self.id });
        }
        match register {
            1 => {
                self.coord_t[unit] = Some(*value);
                Ok(())
            }
            0 => {
                if self.fetched[unit].is_some() {
                    return Err(EmulatorError::FetchOverrun {
                        thread: self.id,
                        unit: unit as u8,
                    });
                }
                let result = match self.coord_t[unit].take() {
                    Some(t) => self.texture_lookup(&sys.memory, value, &t)?,
                    None => value.map(|addr| sys.memory.read_u32(addr)),
                };
                self.fetched[unit] = Some(result);
                Ok(())
            }
            _ => Err(self.unsupported(format!("texture unit {unit} register {register}"))),
        }
    }

    fn texture_lookup(
        &mut self,
        memory: &Memory,
        s: &Vector,
        t: &Vector,
    ) -> Result<Vector, EmulatorError> {
        let mut words = [0u32; 4];
        for w in &mut words {
            *w = memory.read_u32(self.uniform_addr);
            self.uniform_addr = self.uniform_addr.wrapping_add(4);
        }
        let texture = Texture::from_words(words)
            .ok_or_else(|| self.unsupported(format!("texture config {:#010x}", words[0])))?;
        Ok(std::array::from_fn(|lane| {
            texture.sample(memory, f32::from_bits(s[lane]), f32::from_bits(t[lane]))
        }))
    }

    fn load_fetch(&mut self, unit: usize) -> Result<(), EmulatorError> {
        let result = self.fetched[unit]
            .take()
            .ok_or(EmulatorError::FetchUnderflow {
                thread: self.id,
                unit: unit as u8,
            })?;
        self.acc[4] = result;
        Ok(())
    }
}


// =============================================================================
// Lane arithmetic
// =============================================================================

const fn bank_index(bank: Bank) -> usize {
    match bank {
        Bank::A => 0,
        Bank::B => 1,
    }
}

/// Write spaces of the add and mul results.
const fn write_banks(ws: bool) -> (Bank, Bank) {
    if ws {
        (Bank::B, Bank::A)
    } else {
        (Bank::A, Bank::B)
    }
}

fn cond_of(code: u8) -> Cond {
    Cond::from_code(code).unwrap_or(Cond::Never)
}

/// IEEE half to single precision.
fn f16_to_f32(h: u16) -> f32 {
    let sign = if h & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((h >> 10) & 0x1F);
    let mant = f32::from(h & 0x3FF);
    sign * match exp {
        0 => mant * 2f32.powi(-24),
        0x1F if mant == 0.0 => f32::INFINITY,
        0x1F => f32::NAN,
        e => (1.0 + mant / 1024.0) * 2f32.powi(e - 15),
    }
}

/// Applies a register-file A unpack for a consumer that reads floats or ints.
fn unpack(mode: Unpack, v: u32, float: bool) -> u32 {
    match mode {
        Unpack::None => v,
        Unpack::A16 | Unpack::B16 => {
            let half = if mode == Unpack::A16 {
                v as u16
            } else {
                (v >> 16) as u16
            };
            if float {
                f16_to_f32(half).to_bits()
            } else {
                half as i16 as u32
            }
        }
        Unpack::A8 | Unpack::B8 | Unpack::C8 | Unpack::D8 => {
            let shift = 8 * u32::from(mode.code() - Unpack::A8.code());
            let byte = (v >> shift) & 0xFF;
            if float {
                (byte as f32 / 255.0).to_bits()
            } else {
                byte
            }
        }
    }
}

/// Mul-unit colour pack: clamp to 0..1, scale to a byte, place it.
fn pack_colour(pack: Pack, v: u32) -> u32 {
    let shift = 8 * u32::from(pack.code() - Pack::Color8a.code());
    let f = f32::from_bits(v);
    let byte = if f.is_nan() {
        0
    } else {
        (f.clamp(0.0, 1.0) * 255.0).round() as u32
    };
    byte << shift
}

fn add_lane(op: AddOp, a: u32, b: u32) -> (u32, bool) {
    let (fa, fb) = (f32::from_bits(a), f32::from_bits(b));
    let sh = b & 31;
    match op {
        AddOp::Nop => (0, false),
        AddOp::FAdd => ((fa + fb).to_bits(), false),
        AddOp::FSub => ((fa - fb).to_bits(), false),
        AddOp::FMin => (fa.min(fb).to_bits(), false),
        AddOp::FMax => (fa.max(fb).to_bits(), false),
        AddOp::FtoI => (fa as i32 as u32, false),
        AddOp::ItoF => ((a as i32 as f32).to_bits(), false),
        AddOp::Add => a.overflowing_add(b),
        AddOp::Sub => a.overflowing_sub(b),
        AddOp::Shr => (a >> sh, false),
        AddOp::Asr => (((a as i32) >> sh) as u32, false),
        AddOp::Ror => (a.rotate_right(sh), false),
        AddOp::Shl => (a << sh, false),
        AddOp::Min => ((a as i32).min(b as i32) as u32, false),
        AddOp::Max => ((a as i32).max(b as i32) as u32, false),
        AddOp::And => (a & b, false),
        AddOp::Or => (a | b, false),
        AddOp::Xor => (a ^ b, false),
        AddOp::Not => (!a, false),
        AddOp::Clz => (a.leading_zeros(), false),
    }
}

fn add_lanes(op: AddOp, a: &Vector, b: &Vector) -> Output {
    let mut out = Output::plain([0; LANES]);
    out.float = matches!(
        op,
        AddOp::FAdd | AddOp::FSub | AddOp::FMin | AddOp::FMax | AddOp::ItoF
    );
    for lane in 0..LANES {
        let (v, c) = add_lane(op, a[lane], b[lane]);
        out.value[lane] = v;
        out.carry[lane] = c;
    }
    out
}

fn bytewise(a: u32, b: u32, f: impl Fn(u8, u8) -> u8) -> u32 {
    let (a, b) = (a.to_le_bytes(), b.to_le_bytes());
    u32::from_le_bytes(std::array::from_fn(|i| f(a[i], b[i])))
}

fn mul_lanes(op: MulOp, a: &Vector, b: &Vector) -> Output {
    let value = std::array::from_fn(|lane| {
        let (x, y) = (a[lane], b[lane]);
        match op {
            MulOp::Nop => 0,
            MulOp::FMul => (f32::from_bits(x) * f32::from_bits(y)).to_bits(),
            MulOp::Mul24 => (x & 0xFF_FFFF).wrapping_mul(y & 0xFF_FFFF),
            MulOp::V8Min => bytewise(x, y, u8::min),
            MulOp::V8Max => bytewise(x, y, u8::max),
        }
    });
    let mut out = Output::plain(value);
    out.float = op == MulOp::FMul;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_values() {
        assert_eq!(f16_to_f32(0x3C00), 1.0);
        assert_eq!(f16_to_f32(0xC000), -2.0);
        assert_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
        assert!(f16_to_f32(0x7C00).is_infinite());
    }

    #[test]
    fn unpack_depends_on_consumer() {
        let v = 0x80FF_FFFE;
        assert_eq!(unpack(Unpack::A16, v, false), (-2i32) as u32);
        assert_eq!(unpack(Unpack::B16, v, false), 0xFFFF_80FF);
        assert_eq!(unpack(Unpack::B8, v, false), 0xFF);
        assert_eq!(unpack(Unpack::D8, v, true), (128.0f32 / 255.0).to_bits());
        assert_eq!(unpack(Unpack::A8, 255, true), 1.0f32.to_bits());
    }

    #[test]
    fn colour_pack_rounds_and_clamps() {
        assert_eq!(pack_colour(Pack::Color8a, (200.0f32 / 255.0).to_bits()), 200);
        assert_eq!(pack_colour(Pack::Color8b, 2.0f32.to_bits()), 0xFF00);
        assert_eq!(pack_colour(Pack::Color8a, (-1.0f32).to_bits()), 0);
        assert_eq!(pack_colour(Pack::Color8a, f32::NAN.to_bits()), 0);
    }

    #[test]
    fn integer_ops() {
        assert_eq!(add_lane(AddOp::Sub, 0, 1), (u32::MAX, true));
        assert_eq!(add_lane(AddOp::Asr, 0x8000_0000, 4).0, 0xF800_0000);
        assert_eq!(add_lane(AddOp::ItoF, (-3i32) as u32, 0).0, (-3.0f32).to_bits());
        assert_eq!(add_lane(AddOp::FtoI, 2.7f32.to_bits(), 0).0, 2);
        assert_eq!(add_lane(AddOp::Clz, 1, 0).0, 31);
    }

    #[test]
    fn mul_ops() {
        let a = [0x0102_0304; LANES];
        let b = [0x0401_0203; LANES];
        assert_eq!(mul_lanes(MulOp::V8Min, &a, &b).value[0], 0x0101_0203);
        assert_eq!(mul_lanes(MulOp::V8Max, &a, &b).value[0], 0x0402_0304);
        assert_eq!(mul_lanes(MulOp::V8Min, &a, &a).value[0], 0x0102_0304);
        let big = [0x0100_0003; LANES];
        assert_eq!(mul_lanes(MulOp::Mul24, &big, &[5; LANES]).value[0], 15);
    }

    #[test]
    fn write_space_selection() {
        assert_eq!(write_banks(false), (Bank::A, Bank::B));
        assert_eq!(write_banks(true), (Bank::B, Bank::A));
    }
}
