//! QPU instruction set subset.
//!
//! Typed operands and instruction forms for the VideoCore IV QPU features the
//! remap kernel uses. Every instruction is one of four shapes:
//!
//! ```text
//! Alu      add slot + mul slot, optional signal, pack/unpack, rotation
//! LoadImm  32-bit or per-lane immediate into one destination
//! Sema     acquire/release of one of 16 hardware semaphores
//! Branch   relative, conditional on the lane flags, three delay slots
//! ```
//!
//! # Register Spaces
//!
//! The two register files are addressed by `A`/`B` spaces. Reads go through
//! two read ports (one per file); writes go through the add and mul write
//! ports, which target space A and B respectively unless the write-swap bit
//! flips them. [`Dst::space`] and [`Src`] read classification let the encoder
//! pick port assignments and the write-swap bit per instruction.

use serde::{Deserialize, Serialize};

/// SIMD width of every QPU vector operation.
pub const LANES: usize = 16;

/// Number of general registers in each register file.
pub const REGFILE_SIZE: u8 = 32;

/// Register file selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bank {
    /// Register file A (supports unpack on read).
    A,
    /// Register file B (shares its read port with small immediates).
    B,
}

impl Bank {
    /// Single-letter name.
    #[inline]
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::A => 'a',
            Self::B => 'b',
        }
    }
}

// =============================================================================
// Operands
// =============================================================================

/// Small immediate carried in the B read-address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmallImm(u8);

impl SmallImm {
    /// Float 1.0.
    pub const ONE: Self = Self(32);
    /// Float 0.5.
    pub const HALF: Self = Self(47);

    /// Integer immediate in `-16..=15`.
    #[must_use]
    pub const fn int(value: i8) -> Option<Self> {
        match value {
            0..=15 => Some(Self(value as u8)),
            -16..=-1 => Some(Self((value + 32) as u8)),
            _ => None,
        }
    }

    /// Integer immediate for constant initialisers.
    ///
    /// Evaluated in a `const` item, a value outside `-16..=15` fails the build.
    #[must_use]
    pub const fn int_const(value: i8) -> Self {
        match Self::int(value) {
            Some(imm) => imm,
            None => panic!("small integer immediate outside -16..=15"),
        }
    }

    /// Raw 6-bit code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// 32-bit value a read of `code` yields, or `None` for rotation codes.
    #[must_use]
    pub fn value_of(code: u8) -> Option<u32> {
        match code {
            0..=15 => Some(u32::from(code)),
            16..=31 => Some((i32::from(code) - 32) as u32),
            32..=39 => Some((2.0f32).powi(i32::from(code) - 32).to_bits()),
            40..=47 => Some((2.0f32).powi(i32::from(code) - 48).to_bits()),
            _ => None,
        }
    }
}

/// Read operand of an ALU slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Src {
    /// Accumulator `r0..=r5` (read through the input mux, no port).
    Acc(u8),
    /// General register read through the bank's port.
    Reg(Bank, u8),
    /// Next word of the uniform stream (either port).
    Uniform,
    /// Lane index 0..15 (port A).
    ElementNumber,
    /// QPU number (port B).
    QpuNumber,
    /// Blocks until the store engine is idle (port B).
    VpmStoreWait,
    /// Small immediate (port B).
    Imm(SmallImm),
}

/// Raw read-address codes of the special read registers.
pub mod raddr {
    /// Uniform read.
    pub const UNIFORM: u8 = 32;
    /// Element number (A) / QPU number (B).
    pub const ELEMENT_OR_QPU: u8 = 38;
    /// No read.
    pub const NOP: u8 = 39;
    /// Store-engine wait (B).
    pub const VPM_ST_WAIT: u8 = 50;
}

/// Write destination of an ALU slot or load-immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dst {
    /// Accumulator `r0..=r3`.
    Acc(u8),
    /// General register in the given file.
    Reg(Bank, u8),
    /// Discard.
    Null,
    /// Disables texture-unit swapping when written non-zero.
    TmuNoSwap,
    /// Raises the host interrupt.
    HostInt,
    /// Rewinds the uniform stream pointer.
    UniformsAddress,
    /// Scratch-memory generic write.
    Vpm,
    /// Scratch-memory write setup and store-engine setup (space B).
    VpmSetup,
    /// Starts a store-engine transfer to main memory (space B).
    VpmStoreAddr,
    /// Texture unit 0 `s` coordinate / direct address.
    Tmu0S,
    /// Texture unit 1 `s` coordinate.
    Tmu1S,
    /// Texture unit 1 `t` coordinate.
    Tmu1T,
}

/// Raw write-address codes of the special write registers.
pub mod waddr {
    /// First accumulator (r0); r1..r3 follow.
    pub const ACC0: u8 = 32;
    /// Texture unit swap control.
    pub const TMU_NOSWAP: u8 = 36;
    /// Host interrupt.
    pub const HOST_INT: u8 = 38;
    /// Discard.
    pub const NOP: u8 = 39;
    /// Uniform pointer.
    pub const UNIFORMS_ADDRESS: u8 = 40;
    /// Scratch write.
    pub const VPM: u8 = 48;
    /// Scratch/store setup (B space).
    pub const VPM_SETUP: u8 = 49;
    /// Store address (B space).
    pub const VPM_ST_ADDR: u8 = 50;
    /// Texture unit 0 `s`.
    pub const TMU0_S: u8 = 56;
    /// Texture unit 1 `s`.
    pub const TMU1_S: u8 = 60;
    /// Texture unit 1 `t`.
    pub const TMU1_T: u8 = 61;
}

impl Dst {
    /// Write-address code.
    #[must_use]
    pub const fn waddr(self) -> u8 {
        match self {
            Self::Acc(n) => waddr::ACC0 + n,
            Self::Reg(_, n) => n,
            Self::Null => waddr::NOP,
            Self::TmuNoSwap => waddr::TMU_NOSWAP,
            Self::HostInt => waddr::HOST_INT,
            Self::UniformsAddress => waddr::UNIFORMS_ADDRESS,
            Self::Vpm => waddr::VPM,
            Self::VpmSetup => waddr::VPM_SETUP,
            Self::VpmStoreAddr => waddr::VPM_ST_ADDR,
            Self::Tmu0S => waddr::TMU0_S,
            Self::Tmu1S => waddr::TMU1_S,
            Self::Tmu1T => waddr::TMU1_T,
        }
    }

    /// Register space the write must land in, `None` when either works.
    #[must_use]
    pub const fn space(self) -> Option<Bank> {
        match self {
            Self::Reg(bank, _) => Some(bank),
            Self::VpmSetup | Self::VpmStoreAddr => Some(Bank::B),
            _ => None,
        }
    }
}

// =============================================================================
// Opcodes
// =============================================================================

macro_rules! opcode_enum {
    ($(#[$doc:meta])* $name:ident { $($(#[$vdoc:meta])* $variant:ident = $code:literal, $mnemonic:literal;)* }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vdoc])* $variant,)*
        }

        impl $name {
            /// Encoded field value.
            #[must_use]
            pub const fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code,)*
                }
            }

            /// Decodes a field value.
            #[must_use]
            pub const fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Assembler mnemonic.
            #[must_use]
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcode_enum! {
    /// Add-unit operation.
    AddOp {
        /// No operation.
        Nop = 0, "nop";
        /// Float add.
        FAdd = 1, "fadd";
        /// Float subtract.
        FSub = 2, "fsub";
        /// Float minimum.
        FMin = 3, "fmin";
        /// Float maximum.
        FMax = 4, "fmax";
        /// Float to signed integer.
        FtoI = 7, "ftoi";
        /// Signed integer to float.
        ItoF = 8, "itof";
        /// Integer add.
        Add = 12, "iadd";
        /// Integer subtract.
        Sub = 13, "isub";
        /// Logical shift right.
        Shr = 14, "shr";
        /// Arithmetic shift right.
        Asr = 15, "asr";
        /// Rotate right.
        Ror = 16, "ror";
        /// Shift left.
        Shl = 17, "shl";
        /// Signed minimum.
        Min = 18, "min";
        /// Signed maximum.
        Max = 19, "max";
        /// Bitwise and.
        And = 20, "and";
        /// Bitwise or.
        Or = 21, "or";
        /// Bitwise xor.
        Xor = 22, "xor";
        /// Bitwise not.
        Not = 23, "not";
        /// Count leading zeros.
        Clz = 24, "clz";
    }
}

impl AddOp {
    /// True when the operation interprets its inputs as floats.
    #[must_use]
    pub const fn is_float_input(self) -> bool {
        matches!(
            self,
            Self::FAdd | Self::FSub | Self::FMin | Self::FMax | Self::FtoI
        )
    }
}

opcode_enum! {
    /// Mul-unit operation.
    MulOp {
        /// No operation.
        Nop = 0, "nop";
        /// Float multiply.
        FMul = 1, "fmul";
        /// 24-bit integer multiply.
        Mul24 = 2, "mul24";
        /// Per-byte minimum (a move when both inputs are equal).
        V8Min = 4, "v8min";
        /// Per-byte maximum.
        V8Max = 5, "v8max";
    }
}

impl MulOp {
    /// True when the operation interprets its inputs as floats.
    #[must_use]
    pub const fn is_float_input(self) -> bool {
        matches!(self, Self::FMul)
    }
}

opcode_enum! {
    /// Per-lane write condition.
    Cond {
        /// Never write.
        Never = 0, "never";
        /// Always write.
        Always = 1, "";
        /// Write where Z is set.
        ZeroSet = 2, ".ifz";
        /// Write where Z is clear.
        ZeroClear = 3, ".ifnz";
        /// Write where N is set.
        NegSet = 4, ".ifn";
        /// Write where N is clear.
        NegClear = 5, ".ifnn";
        /// Write where C is set.
        CarrySet = 6, ".ifc";
        /// Write where C is clear.
        CarryClear = 7, ".ifnc";
    }
}

opcode_enum! {
    /// Branch condition over the flags of all 16 lanes.
    BranchCond {
        /// Z set in every lane.
        AllZeroSet = 0, "b.allz";
        /// Z clear in every lane.
        AllZeroClear = 1, "b.allnz";
        /// Z set in some lane.
        AnyZeroSet = 2, "b.anyz";
        /// Z clear in some lane.
        AnyZeroClear = 3, "b.anynz";
        /// N set in every lane.
        AllNegSet = 4, "b.alln";
        /// N clear in every lane.
        AllNegClear = 5, "b.allnn";
        /// N set in some lane.
        AnyNegSet = 6, "b.anyn";
        /// N clear in some lane.
        AnyNegClear = 7, "b.anynn";
        /// Unconditional.
        Always = 15, "b";
    }
}

opcode_enum! {
    /// Signal carried by an ALU instruction.
    Signal {
        /// No signal.
        None = 1, "";
        /// Program end; two delay slots follow.
        ThreadEnd = 3, "thrend";
        /// Pop texture unit 0's result into r4.
        LoadTmu0 = 10, "ldtmu0";
        /// Pop texture unit 1's result into r4.
        LoadTmu1 = 11, "ldtmu1";
    }
}

/// Raw signal codes with no [`Signal`] variant.
pub mod sig {
    /// ALU instruction with a small immediate in the B read field.
    pub const SMALL_IMM: u8 = 13;
    /// Load immediate or semaphore.
    pub const LOAD_IMM: u8 = 14;
    /// Branch.
    pub const BRANCH: u8 = 15;
}

opcode_enum! {
    /// Unpack applied to register-file A reads.
    Unpack {
        /// Plain 32-bit read.
        None = 0, "";
        /// Low 16 bits.
        A16 = 1, ".16a";
        /// High 16 bits.
        B16 = 2, ".16b";
        /// Byte 0.
        A8 = 4, ".8a";
        /// Byte 1.
        B8 = 5, ".8b";
        /// Byte 2.
        C8 = 6, ".8c";
        /// Byte 3.
        D8 = 7, ".8d";
    }
}

opcode_enum! {
    /// Mul-unit colour pack (float 0..1 → byte).
    Pack {
        /// No pack.
        None = 0, "";
        /// Byte 0.
        Color8a = 4, ".8a";
        /// Byte 1.
        Color8b = 5, ".8b";
        /// Byte 2.
        Color8c = 6, ".8c";
        /// Byte 3.
        Color8d = 7, ".8d";
    }
}

/// Mul-unit full-vector rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// Rotate by a constant 1..=15 lanes: output lane `i` takes input lane `i - n`.
    By(u8),
    /// Rotate by the amount held in r5.
    R5,
}

impl Rotation {
    /// Constant rotation, `None` when `n` is a multiple of the lane count.
    #[must_use]
    pub const fn by(n: usize) -> Option<Self> {
        match n % LANES {
            0 => None,
            k => Some(Self::By(k as u8)),
        }
    }

    /// Small-immediate code selecting this rotation.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::By(n) => 48 + n,
            Self::R5 => 48,
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// One ALU operation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot<Op> {
    /// Operation.
    pub op: Op,
    /// Destination.
    pub dst: Dst,
    /// First input.
    pub a: Src,
    /// Second input.
    pub b: Src,
    /// Write condition.
    pub cond: Cond,
}

/// Dual-issue ALU instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alu {
    /// Add-unit slot.
    pub add: Option<Slot<AddOp>>,
    /// Mul-unit slot.
    pub mul: Option<Slot<MulOp>>,
    /// Signal.
    pub sig: Signal,
    /// Update the lane flags from the add result (mul result if no add).
    pub set_flags: bool,
    /// Unpack of register-file A reads.
    pub unpack: Unpack,
    /// Colour pack of the mul result.
    pub pack: Pack,
    /// Rotation of the mul inputs.
    pub rotate: Option<Rotation>,
}

impl Default for Alu {
    fn default() -> Self {
        Self::nop()
    }
}

impl Alu {
    /// Instruction that does nothing.
    #[must_use]
    pub const fn nop() -> Self {
        Self {
            add: None,
            mul: None,
            sig: Signal::None,
            set_flags: false,
            unpack: Unpack::None,
            pack: Pack::None,
            rotate: None,
        }
    }

    /// Add-unit operation.
    #[must_use]
    pub const fn add(op: AddOp, dst: Dst, a: Src, b: Src) -> Self {
        Self::nop().with_add(op, dst, a, b)
    }

    /// Mul-unit operation.
    #[must_use]
    pub const fn mul(op: MulOp, dst: Dst, a: Src, b: Src) -> Self {
        Self::nop().with_mul(op, dst, a, b)
    }

    /// Move through the add unit (`or dst, src, src`).
    #[must_use]
    pub const fn mov(dst: Dst, src: Src) -> Self {
        Self::add(AddOp::Or, dst, src, src)
    }

    /// Sets the add slot.
    #[must_use]
    pub const fn with_add(mut self, op: AddOp, dst: Dst, a: Src, b: Src) -> Self {
        self.add = Some(Slot {
            op,
            dst,
            a,
            b,
            cond: Cond::Always,
        });
        self
    }

    /// Sets the mul slot.
    #[must_use]
    pub const fn with_mul(mut self, op: MulOp, dst: Dst, a: Src, b: Src) -> Self {
        self.mul = Some(Slot {
            op,
            dst,
            a,
            b,
            cond: Cond::Always,
        });
        self
    }

    /// Sets the mul slot to a move (`v8min dst, src, src`).
    #[must_use]
    pub const fn with_mul_mov(self, dst: Dst, src: Src) -> Self {
        self.with_mul(MulOp::V8Min, dst, src, src)
    }

    /// Sets the signal.
    #[must_use]
    pub const fn signal(mut self, sig: Signal) -> Self {
        self.sig = sig;
        self
    }

    /// Requests a flag update.
    #[must_use]
    pub const fn set_flags(mut self) -> Self {
        self.set_flags = true;
        self
    }

    /// Sets the unpack mode.
    #[must_use]
    pub const fn unpack(mut self, unpack: Unpack) -> Self {
        self.unpack = unpack;
        self
    }

    /// Sets the mul pack mode.
    #[must_use]
    pub const fn pack(mut self, pack: Pack) -> Self {
        self.pack = pack;
        self
    }

    /// Rotates the mul inputs.
    #[must_use]
    pub const fn rotate(mut self, rotation: Rotation) -> Self {
        self.rotate = Some(rotation);
        self
    }

    /// Sets the write condition of both present slots.
    #[must_use]
    pub fn cond(mut self, cond: Cond) -> Self {
        if let Some(slot) = &mut self.add {
            slot.cond = cond;
        }
        if let Some(slot) = &mut self.mul {
            slot.cond = cond;
        }
        self
    }
}

/// Load-immediate payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    /// The same 32-bit word in every lane.
    Word(u32),
    /// Per-lane unsigned 2-bit values.
    Lanes([u8; LANES]),
}

impl Immediate {
    /// Mode field (bits 59:57) and 32-bit payload.
    #[must_use]
    pub fn encode(&self) -> (u8, u32) {
        match self {
            Self::Word(w) => (0, *w),
            Self::Lanes(values) => {
                let mut bits = 0u32;
                for (lane, v) in values.iter().enumerate() {
                    bits |= u32::from(v & 1) << lane;
                    bits |= u32::from((v >> 1) & 1) << (16 + lane);
                }
                (3, bits)
            }
        }
    }
}

/// Load-immediate instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadImm {
    /// Destination.
    pub dst: Dst,
    /// Value.
    pub value: Immediate,
    /// Update the lane flags from the value.
    pub set_flags: bool,
}

/// Semaphore direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemaOp {
    /// Increment (blocks at 15).
    Up,
    /// Decrement (blocks at 0).
    Down,
}

/// Instruction with branch targets of type `L`.
///
/// Builders hold [`Label`](super::Label) targets; resolved programs hold
/// instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instr<L> {
    /// Dual-issue ALU instruction.
    Alu(Alu),
    /// Load immediate.
    LoadImm(LoadImm),
    /// Semaphore acquire/release.
    Sema {
        /// Semaphore number 0..=15.
        id: u8,
        /// Direction.
        op: SemaOp,
    },
    /// Relative conditional branch.
    Branch {
        /// Condition.
        cond: BranchCond,
        /// Target.
        target: L,
    },
}

impl<L> From<Alu> for Instr<L> {
    fn from(alu: Alu) -> Self {
        Self::Alu(alu)
    }
}

impl<L> From<LoadImm> for Instr<L> {
    fn from(ldi: LoadImm) -> Self {
        Self::LoadImm(ldi)
    }
}

impl<L> Instr<L> {
    /// Replaces the branch target.
    pub fn map_target<M, E>(self, f: impl FnOnce(L) -> Result<M, E>) -> Result<Instr<M>, E> {
        Ok(match self {
            Self::Alu(alu) => Instr::Alu(alu),
            Self::LoadImm(ldi) => Instr::LoadImm(ldi),
            Self::Sema { id, op } => Instr::Sema { id, op },
            Self::Branch { cond, target } => Instr::Branch {
                cond,
                target: f(target)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_imm_float_codes() {
        assert_eq!(SmallImm::value_of(SmallImm::ONE.code()), Some(1.0f32.to_bits()));
        assert_eq!(SmallImm::value_of(SmallImm::HALF.code()), Some(0.5f32.to_bits()));
        assert_eq!(SmallImm::value_of(39), Some(128.0f32.to_bits()));
        assert_eq!(SmallImm::value_of(40), Some((1.0f32 / 256.0).to_bits()));
    }

    #[test]
    fn small_imm_int_codes() {
        assert_eq!(SmallImm::int(4).map(SmallImm::code), Some(4));
        assert_eq!(SmallImm::int(-1).map(SmallImm::code), Some(31));
        assert_eq!(SmallImm::value_of(31), Some(u32::MAX));
        assert_eq!(SmallImm::int(16), None);
        assert_eq!(SmallImm::value_of(50), None);
    }

    #[test]
    fn constant_int_immediates_are_integers() {
        const MINUS_SIXTEEN: SmallImm = SmallImm::int_const(-16);
        const ONE: SmallImm = SmallImm::int_const(1);
        assert_eq!(SmallImm::value_of(MINUS_SIXTEEN.code()), Some(-16i32 as u32));
        assert_eq!(SmallImm::value_of(ONE.code()), Some(1));
        assert_ne!(ONE, SmallImm::ONE);
    }

    #[test]
    #[should_panic(expected = "outside -16..=15")]
    fn out_of_range_int_immediate_is_rejected() {
        let _ = SmallImm::int_const(16);
    }

    #[test]
    fn full_turn_rotation_is_identity() {
        assert_eq!(Rotation::by(16), None);
        assert_eq!(Rotation::by(0), None);
        assert_eq!(Rotation::by(17), Some(Rotation::By(1)));
        assert_eq!(Rotation::By(15).code(), 63);
    }

    #[test]
    fn lane_immediate_splits_bits() {
        let mut lanes = [1u8; LANES];
        lanes[3] = 0;
        lanes[5] = 3;
        let (mode, bits) = Immediate::Lanes(lanes).encode();
        assert_eq!(mode, 3);
        assert_eq!(bits & 0xFFFF, !(1u32 << 3) & 0xFFFF);
        assert_eq!(bits >> 16, 1 << 5);
    }

    #[test]
    fn opcode_round_trip_table() {
        for code in 0..32 {
            if let Some(op) = AddOp::from_code(code) {
                assert_eq!(op.code(), code);
            }
        }
        assert_eq!(MulOp::from_code(3), None);
        assert_eq!(Signal::from_code(13), None);
    }

    #[test]
    fn special_destinations_fix_space() {
        assert_eq!(Dst::VpmSetup.space(), Some(Bank::B));
        assert_eq!(Dst::VpmStoreAddr.space(), Some(Bank::B));
        assert_eq!(Dst::Tmu1S.space(), None);
        assert_eq!(Dst::Acc(2).waddr(), 34);
    }
}
