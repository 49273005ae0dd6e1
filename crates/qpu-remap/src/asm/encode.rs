//! 64-bit instruction encoding and field decoding.
//!
//! # Layout
//!
//! ```text
//! 63:60 sig   59:57 unpack   56 pm   55:52 pack
//! 51:49 cond_add   48:46 cond_mul   45 sf   44 ws
//! 43:38 waddr_add  37:32 waddr_mul
//! 31:29 op_mul  28:24 op_add  23:18 raddr_a  17:12 raddr_b
//! 11:9 add_a  8:6 add_b  5:3 mul_a  2:0 mul_b
//! ```
//!
//! Load-immediate and semaphore instructions replace bits 31:0 with the
//! immediate; branches keep the write fields and carry the condition in 55:52.

use super::isa::{
    raddr, sig, waddr, Alu, Bank, Cond, Instr, SemaOp, Signal, Src, LANES,
};
use crate::error::AsmError;

/// Input-mux code selecting register file A.
pub const MUX_A: u8 = 6;
/// Input-mux code selecting register file B.
pub const MUX_B: u8 = 7;

/// Canonical no-op word.
pub const NOP_WORD: u64 = 0x1000_09E7_009E_7000;

/// Bytes per encoded instruction.
pub const INSTR_BYTES: usize = 8;

/// Load-immediate mode selecting a semaphore operation.
pub const LDI_MODE_SEMA: u8 = 4;

/// Raw fields of one instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields {
    /// Signal (63:60).
    pub sig: u8,
    /// Unpack or load-immediate mode (59:57).
    pub unpack: u8,
    /// Pack mode select (56).
    pub pm: bool,
    /// Pack, or branch condition (55:52).
    pub pack: u8,
    /// Add write condition (51:49).
    pub cond_add: u8,
    /// Mul write condition (48:46).
    pub cond_mul: u8,
    /// Set flags (45).
    pub sf: bool,
    /// Write swap (44).
    pub ws: bool,
    /// Add write address (43:38).
    pub waddr_add: u8,
    /// Mul write address (37:32).
    pub waddr_mul: u8,
    /// Mul opcode (31:29).
    pub op_mul: u8,
    /// Add opcode (28:24).
    pub op_add: u8,
    /// Read address A (23:18).
    pub raddr_a: u8,
    /// Read address B or small immediate (17:12).
    pub raddr_b: u8,
    /// Add input A mux (11:9).
    pub add_a: u8,
    /// Add input B mux (8:6).
    pub add_b: u8,
    /// Mul input A mux (5:3).
    pub mul_a: u8,
    /// Mul input B mux (2:0).
    pub mul_b: u8,
    /// Low 32 bits, the immediate of load/branch forms.
    pub imm: u32,
}

impl Fields {
    /// Splits an instruction word into its fields.
    #[must_use]
    pub const fn decode(word: u64) -> Self {
        Self {
            sig: bits(word, 60, 4),
            unpack: bits(word, 57, 3),
            pm: bits(word, 56, 1) == 1,
            pack: bits(word, 52, 4),
            cond_add: bits(word, 49, 3),
            cond_mul: bits(word, 46, 3),
            sf: bits(word, 45, 1) == 1,
            ws: bits(word, 44, 1) == 1,
            waddr_add: bits(word, 38, 6),
            waddr_mul: bits(word, 32, 6),
            op_mul: bits(word, 29, 3),
            op_add: bits(word, 24, 5),
            raddr_a: bits(word, 18, 6),
            raddr_b: bits(word, 12, 6),
            add_a: bits(word, 9, 3),
            add_b: bits(word, 6, 3),
            mul_a: bits(word, 3, 3),
            mul_b: bits(word, 0, 3),
            imm: word as u32,
        }
    }
}

const fn bits(word: u64, shift: u32, width: u32) -> u8 {
    ((word >> shift) & ((1 << width) - 1)) as u8
}

// =============================================================================
// Read-port allocation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortUse {
    Read(u8),
    Imm(u8),
}

impl PortUse {
    const fn code(self) -> u8 {
        match self {
            Self::Read(c) | Self::Imm(c) => c,
        }
    }
}

#[derive(Debug, Default)]
struct Ports {
    a: Option<PortUse>,
    b: Option<PortUse>,
}

impl Ports {
    fn claim(&mut self, index: usize, bank: Bank, want: PortUse) -> Result<u8, AsmError> {
        let (slot, port, mux) = match bank {
            Bank::A => (&mut self.a, 'A', MUX_A),
            Bank::B => (&mut self.b, 'B', MUX_B),
        };
        match *slot {
            None => {
                *slot = Some(want);
                Ok(mux)
            }
            Some(have) if have == want => Ok(mux),
            Some(have) => Err(AsmError::ReadPortConflict {
                index,
                port,
                first: have.code(),
                second: want.code(),
            }),
        }
    }

    fn mux(&mut self, index: usize, src: Src) -> Result<u8, AsmError> {
        match src {
            Src::Acc(n) if n < 6 => Ok(n),
            Src::Acc(n) => Err(AsmError::Unencodable {
                index,
                reason: format!("accumulator r{n} does not exist"),
            }),
            Src::Reg(bank, n) => self.claim(index, bank, PortUse::Read(n)),
            Src::ElementNumber => {
                self.claim(index, Bank::A, PortUse::Read(raddr::ELEMENT_OR_QPU))
            }
            Src::QpuNumber => self.claim(index, Bank::B, PortUse::Read(raddr::ELEMENT_OR_QPU)),
            Src::VpmStoreWait => self.claim(index, Bank::B, PortUse::Read(raddr::VPM_ST_WAIT)),
            Src::Imm(imm) => self.claim(index, Bank::B, PortUse::Imm(imm.code())),
            Src::Uniform => {
                let want = PortUse::Read(raddr::UNIFORM);
                match self.a {
                    None => self.claim(index, Bank::A, want),
                    Some(have) if have == want => Ok(MUX_A),
                    Some(_) => self.claim(index, Bank::B, want),
                }
            }
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

const fn place(value: u64, shift: u32) -> u64 {
    value << shift
}

/// Picks the write-swap bit for the given add/mul destination spaces.
fn write_swap(
    index: usize,
    add: Option<Bank>,
    mul: Option<Bank>,
) -> Result<bool, AsmError> {
    let plain = add != Some(Bank::B) && mul != Some(Bank::A);
    let swapped = add != Some(Bank::A) && mul != Some(Bank::B);
    match (plain, swapped) {
        (true, _) => Ok(false),
        (false, true) => Ok(true),
        (false, false) => Err(AsmError::WriteSpaceConflict {
            index,
            space: match add {
                Some(b) => b.letter().to_ascii_uppercase(),
                None => 'A',
            },
        }),
    }
}

fn encode_alu(index: usize, alu: &Alu) -> Result<u64, AsmError> {
    let mut ports = Ports::default();
    let (mut add_a, mut add_b, mut mul_a, mut mul_b) = (0u8, 0u8, 0u8, 0u8);

    if let Some(slot) = &alu.add {
        add_a = ports.mux(index, slot.a)?;
        add_b = ports.mux(index, slot.b)?;
    }
    if let Some(slot) = &alu.mul {
        mul_a = ports.mux(index, slot.a)?;
        mul_b = ports.mux(index, slot.b)?;
    }

    if let Some(rotation) = alu.rotate {
        if ports.b.is_some() {
            return Err(AsmError::Unencodable {
                index,
                reason: "rotation needs the B read field".into(),
            });
        }
        if mul_a > 3 || mul_b > 3 {
            return Err(AsmError::Unencodable {
                index,
                reason: "rotated mul inputs must come from r0..r3".into(),
            });
        }
        ports.b = Some(PortUse::Imm(rotation.code()));
    }

    let small_imm = matches!(ports.b, Some(PortUse::Imm(_)));
    let sig_code = if small_imm {
        if alu.sig != Signal::None {
            return Err(AsmError::SignalConflict {
                index,
                existing: "small immediate",
                requested: alu.sig.mnemonic(),
            });
        }
        sig::SMALL_IMM
    } else {
        alu.sig.code()
    };

    if alu.unpack.code() != 0 && alu.pack.code() != 0 {
        return Err(AsmError::Unencodable {
            index,
            reason: "unpack and mul pack cannot share an instruction".into(),
        });
    }

    let add_dst = alu.add.map(|s| s.dst);
    let mul_dst = alu.mul.map(|s| s.dst);
    let ws = write_swap(
        index,
        add_dst.and_then(|d| d.space()),
        mul_dst.and_then(|d| d.space()),
    )?;

    let cond_of = |cond: Option<Cond>| cond.unwrap_or(Cond::Never).code();
    let pm = alu.pack.code() != 0;

    let mut word = 0u64;
    word |= place(u64::from(sig_code), 60);
    word |= place(u64::from(alu.unpack.code()), 57);
    word |= place(u64::from(pm), 56);
    word |= place(u64::from(alu.pack.code()), 52);
    word |= place(u64::from(cond_of(alu.add.map(|s| s.cond))), 49);
    word |= place(u64::from(cond_of(alu.mul.map(|s| s.cond))), 46);
    word |= place(u64::from(alu.set_flags), 45);
    word |= place(u64::from(ws), 44);
    word |= place(u64::from(add_dst.map_or(waddr::NOP, |d| d.waddr())), 38);
    word |= place(u64::from(mul_dst.map_or(waddr::NOP, |d| d.waddr())), 32);
    word |= place(u64::from(alu.mul.map_or(0, |s| s.op.code())), 29);
    word |= place(u64::from(alu.add.map_or(0, |s| s.op.code())), 24);
    word |= place(u64::from(ports.a.map_or(raddr::NOP, PortUse::code)), 18);
    word |= place(u64::from(ports.b.map_or(raddr::NOP, PortUse::code)), 12);
    word |= place(u64::from(add_a), 9);
    word |= place(u64::from(add_b), 6);
    word |= place(u64::from(mul_a), 3);
    word |= u64::from(mul_b);
    Ok(word)
}

fn load_word(mode: u8, cond_add: Cond, sf: bool, ws: bool, waddr_add: u8, imm: u32) -> u64 {
    place(u64::from(sig::LOAD_IMM), 60)
        | place(u64::from(mode), 57)
        | place(u64::from(cond_add.code()), 49)
        | place(u64::from(sf), 45)
        | place(u64::from(ws), 44)
        | place(u64::from(waddr_add), 38)
        | place(u64::from(waddr::NOP), 32)
        | u64::from(imm)
}

/// Encodes the instruction at position `index`.
///
/// # Errors
///
/// Returns [`AsmError`] when operands conflict over a read port, write
/// space, or the signal field, or when a value has no encoding.
pub fn encode(index: usize, instr: &Instr<usize>) -> Result<u64, AsmError> {
    match instr {
        Instr::Alu(alu) => encode_alu(index, alu),
        Instr::LoadImm(ldi) => {
            let (mode, imm) = ldi.value.encode();
            let ws = ldi.dst.space() == Some(Bank::B);
            Ok(load_word(mode, Cond::Always, ldi.set_flags, ws, ldi.dst.waddr(), imm))
        }
        Instr::Sema { id, op } => {
            if *id > 15 {
                return Err(AsmError::Unencodable {
                    index,
                    reason: format!("semaphore {id} out of range"),
                });
            }
            let down = u32::from(*op == SemaOp::Down) << 4;
            Ok(load_word(
                LDI_MODE_SEMA,
                Cond::Never,
                false,
                false,
                waddr::NOP,
                down | u32::from(*id),
            ))
        }
        Instr::Branch { cond, target } => {
            let offset = (*target as i64 - (index as i64 + 4)) * INSTR_BYTES as i64;
            let imm = i32::try_from(offset).map_err(|_| AsmError::Unencodable {
                index,
                reason: format!("branch offset {offset} out of range"),
            })?;
            Ok(place(u64::from(sig::BRANCH), 60)
                | place(u64::from(cond.code()), 52)
                | place(1, 51)
                | place(u64::from(waddr::NOP), 38)
                | place(u64::from(waddr::NOP), 32)
                | u64::from(imm as u32))
        }
    }
}

/// Decodes a per-lane immediate (mode 1 signed or 3 unsigned) into lane values.
#[must_use]
pub fn lane_immediate(mode: u8, imm: u32) -> [u32; LANES] {
    let mut out = [0u32; LANES];
    for (lane, v) in out.iter_mut().enumerate() {
        let ls = (imm >> lane) & 1;
        let ms = (imm >> (16 + lane)) & 1;
        *v = if mode == 1 {
            // two-bit signed: ms is the sign
            ((ms << 1 | ls) as i32 - ((ms as i32) << 2)) as u32
        } else {
            ms << 1 | ls
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::isa::{
        AddOp, Dst, Immediate, LoadImm, MulOp, Pack, Rotation, SmallImm, Unpack,
    };

    #[test]
    fn nop_matches_canonical_word() {
        assert_eq!(encode(0, &Instr::Alu(Alu::nop())).ok(), Some(NOP_WORD));
    }

    #[test]
    fn thread_end_word() {
        let word = encode(0, &Instr::Alu(Alu::nop().signal(Signal::ThreadEnd))).ok();
        assert_eq!(word, Some(0x3000_09E7_009E_7000));
    }

    #[test]
    fn branch_offset_counts_from_after_delay_slots() {
        let back = Instr::Branch {
            cond: crate::asm::isa::BranchCond::AllZeroClear,
            target: 2,
        };
        let word = encode(10, &back).unwrap_or_default();
        let f = Fields::decode(word);
        assert_eq!(f.sig, sig::BRANCH);
        assert_eq!(f.pack, 1);
        assert_eq!(f.imm as i32, (2 - 14) * 8);
    }

    #[test]
    fn move_from_b_to_a_uses_plain_write_space() {
        let word = encode(0, &Instr::Alu(Alu::mov(Dst::Reg(Bank::A, 8), Src::Reg(Bank::B, 8))))
            .unwrap_or_default();
        let f = Fields::decode(word);
        assert!(!f.ws);
        assert_eq!(f.waddr_add, 8);
        assert_eq!(f.raddr_b, 8);
        assert_eq!((f.add_a, f.add_b), (MUX_B, MUX_B));
    }

    #[test]
    fn add_to_bank_b_swaps_write_ports() {
        let alu = Alu::add(AddOp::Add, Dst::Reg(Bank::B, 9), Src::Uniform, Src::Acc(0));
        let f = Fields::decode(encode(0, &Instr::Alu(alu)).unwrap_or_default());
        assert!(f.ws);
        assert_eq!(f.raddr_a, raddr::UNIFORM);
    }

    #[test]
    fn two_bank_a_registers_conflict() {
        let alu = Alu::add(
            AddOp::Add,
            Dst::Acc(0),
            Src::Reg(Bank::A, 1),
            Src::Reg(Bank::A, 2),
        );
        assert!(matches!(
            encode(3, &Instr::Alu(alu)),
            Err(AsmError::ReadPortConflict { index: 3, port: 'A', .. })
        ));
    }

    #[test]
    fn small_immediate_sets_signal() {
        let alu = Alu::mul(MulOp::FMul, Dst::Vpm, Src::Reg(Bank::A, 10), Src::Imm(SmallImm::ONE))
            .pack(Pack::Color8a);
        let f = Fields::decode(encode(0, &Instr::Alu(alu)).unwrap_or_default());
        assert_eq!(f.sig, sig::SMALL_IMM);
        assert!(f.pm);
        assert_eq!(f.pack, 4);
        assert_eq!(f.raddr_b, 32);
    }

    #[test]
    fn small_immediate_and_load_signal_conflict() {
        let alu = Alu::add(AddOp::FAdd, Dst::Acc(0), Src::Acc(1), Src::Imm(SmallImm::HALF))
            .signal(Signal::LoadTmu0);
        assert!(matches!(
            encode(0, &Instr::Alu(alu)),
            Err(AsmError::SignalConflict { .. })
        ));
    }

    #[test]
    fn rotation_rejects_regfile_inputs() {
        let alu = Alu::nop()
            .with_mul_mov(Dst::Acc(0), Src::Reg(Bank::A, 1))
            .rotate(Rotation::By(3));
        assert!(encode(0, &Instr::Alu(alu)).is_err());
        let ok = Alu::nop()
            .with_mul_mov(Dst::Acc(0), Src::Acc(2))
            .rotate(Rotation::By(3));
        let f = Fields::decode(encode(0, &Instr::Alu(ok)).unwrap_or_default());
        assert_eq!(f.raddr_b, 51);
    }

    #[test]
    fn unpack_and_pack_are_exclusive() {
        let alu = Alu::mul(MulOp::FMul, Dst::Vpm, Src::Reg(Bank::A, 15), Src::Imm(SmallImm::ONE))
            .unpack(Unpack::A8)
            .pack(Pack::Color8a);
        assert!(encode(0, &Instr::Alu(alu)).is_err());
    }

    #[test]
    fn load_immediate_layout() {
        let ldi = LoadImm {
            dst: Dst::Reg(Bank::A, 18),
            value: Immediate::Word(0x3780_0080),
            set_flags: false,
        };
        let f = Fields::decode(encode(0, &Instr::LoadImm(ldi)).unwrap_or_default());
        assert_eq!(f.sig, sig::LOAD_IMM);
        assert_eq!(f.unpack, 0);
        assert_eq!(f.cond_add, Cond::Always.code());
        assert_eq!(f.waddr_add, 18);
        assert_eq!(f.waddr_mul, waddr::NOP);
        assert_eq!(f.imm, 0x3780_0080);
    }

    #[test]
    fn semaphore_layout() {
        let f = Fields::decode(
            encode(0, &Instr::Sema { id: 2, op: SemaOp::Down }).unwrap_or_default(),
        );
        assert_eq!(f.sig, sig::LOAD_IMM);
        assert_eq!(f.unpack, LDI_MODE_SEMA);
        assert_eq!(f.imm & 0x1F, 0x12);
    }

    #[test]
    fn lane_immediate_decodes_both_modes() {
        let lanes = lane_immediate(3, 0x0001_0003);
        assert_eq!(&lanes[..3], &[3, 1, 0]);
        let signed = lane_immediate(1, 0x0001_0000);
        assert_eq!(signed[0], (-2i32) as u32);
    }
}
