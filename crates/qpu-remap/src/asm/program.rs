//! Assembled programs: encoded words, listing and statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use super::encode::INSTR_BYTES;
use super::isa::{Alu, Cond, Dst, Immediate, Instr, SemaOp, Signal, Slot, Src};

/// A resolved and encoded QPU program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instrs: Vec<Instr<usize>>,
    words: Vec<u64>,
    labels: BTreeMap<usize, Vec<String>>,
}

/// Instruction-mix summary of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramStats {
    /// Total instructions.
    pub instructions: usize,
    /// Size of the raw blob in bytes.
    pub bytes: usize,
    /// ALU instructions that do nothing.
    pub nops: usize,
    /// Load-immediate instructions.
    pub load_immediates: usize,
    /// Branch instructions.
    pub branches: usize,
    /// Semaphore increments.
    pub semaphore_ups: usize,
    /// Semaphore decrements.
    pub semaphore_downs: usize,
    /// Texture-unit result loads.
    pub tmu_loads: usize,
    /// Scratch-memory writes.
    pub vpm_writes: usize,
    /// Store-engine starts.
    pub store_starts: usize,
}

impl Program {
    pub(crate) fn new(
        instrs: Vec<Instr<usize>>,
        words: Vec<u64>,
        labels: BTreeMap<usize, Vec<String>>,
    ) -> Self {
        Self {
            instrs,
            words,
            labels,
        }
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True for an empty program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Encoded instruction words.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Resolved instructions.
    #[must_use]
    pub fn instructions(&self) -> &[Instr<usize>] {
        &self.instrs
    }

    /// Label names bound at `index`.
    #[must_use]
    pub fn labels_at(&self, index: usize) -> &[String] {
        self.labels.get(&index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Raw little-endian program blob.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * INSTR_BYTES);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Writes the raw blob.
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_to(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    /// Human-readable listing, one instruction per line.
    #[must_use]
    pub fn listing(&self) -> Listing<'_> {
        Listing(self)
    }

    /// Counts instruction kinds.
    #[must_use]
    pub fn stats(&self) -> ProgramStats {
        let mut s = ProgramStats {
            instructions: self.len(),
            bytes: self.len() * INSTR_BYTES,
            ..ProgramStats::default()
        };
        for instr in &self.instrs {
            match instr {
                Instr::Alu(alu) => {
                    if *alu == Alu::nop() {
                        s.nops += 1;
                    }
                    if matches!(alu.sig, Signal::LoadTmu0 | Signal::LoadTmu1) {
                        s.tmu_loads += 1;
                    }
                    let dsts = [alu.add.map(|x| x.dst), alu.mul.map(|x| x.dst)];
                    for dst in dsts.into_iter().flatten() {
                        match dst {
                            Dst::Vpm => s.vpm_writes += 1,
                            Dst::VpmStoreAddr => s.store_starts += 1,
                            _ => {}
                        }
                    }
                }
                Instr::LoadImm(_) => s.load_immediates += 1,
                Instr::Branch { .. } => s.branches += 1,
                Instr::Sema { op: SemaOp::Up, .. } => s.semaphore_ups += 1,
                Instr::Sema { op: SemaOp::Down, .. } => s.semaphore_downs += 1,
            }
        }
        s
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Display adapter produced by [`Program::listing`].
#[derive(Debug)]
pub struct Listing<'a>(&'a Program);

struct SrcFmt(Src);
struct DstFmt(Dst);

impl fmt::Display for SrcFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Src::Acc(n) => write!(f, "r{n}"),
            Src::Reg(bank, n) => write!(f, "r{}{n}", bank.letter()),
            Src::Uniform => f.write_str("unif"),
            Src::ElementNumber => f.write_str("elem_num"),
            Src::QpuNumber => f.write_str("qpu_num"),
            Src::VpmStoreWait => f.write_str("vw_wait"),
            Src::Imm(imm) => write!(f, "#{}", imm.code()),
        }
    }
}

impl fmt::Display for DstFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Dst::Acc(n) => write!(f, "r{n}"),
            Dst::Reg(bank, n) => write!(f, "r{}{n}", bank.letter()),
            Dst::Null => f.write_str("-"),
            Dst::TmuNoSwap => f.write_str("tmu_noswap"),
            Dst::HostInt => f.write_str("host_int"),
            Dst::UniformsAddress => f.write_str("unif_addr"),
            Dst::Vpm => f.write_str("vpm"),
            Dst::VpmSetup => f.write_str("vw_setup"),
            Dst::VpmStoreAddr => f.write_str("vw_addr"),
            Dst::Tmu0S => f.write_str("tmu0s"),
            Dst::Tmu1S => f.write_str("tmu1s"),
            Dst::Tmu1T => f.write_str("tmu1t"),
        }
    }
}

fn write_slot<Op>(
    f: &mut fmt::Formatter<'_>,
    mnemonic: &str,
    slot: &Slot<Op>,
    suffix: &str,
) -> fmt::Result {
    let cond = if slot.cond == Cond::Always {
        ""
    } else {
        slot.cond.mnemonic()
    };
    write!(
        f,
        "{mnemonic}{cond} {}{suffix}, {}, {}",
        DstFmt(slot.dst),
        SrcFmt(slot.a),
        SrcFmt(slot.b)
    )
}

fn write_alu(f: &mut fmt::Formatter<'_>, alu: &Alu) -> fmt::Result {
    let mut parts = 0;
    if let Some(slot) = &alu.add {
        write_slot(f, slot.op.mnemonic(), slot, "")?;
        parts += 1;
    }
    if let Some(slot) = &alu.mul {
        if parts > 0 {
            f.write_str(" ; ")?;
        }
        write_slot(f, slot.op.mnemonic(), slot, alu.pack.mnemonic())?;
        parts += 1;
    }
    if parts == 0 {
        f.write_str("nop")?;
    }
    if alu.unpack.code() != 0 {
        write!(f, " [unpack{}]", alu.unpack.mnemonic())?;
    }
    if let Some(rot) = alu.rotate {
        write!(f, " [rot {}]", rot.code() - 48)?;
    }
    if alu.set_flags {
        f.write_str(" [sf]")?;
    }
    if alu.sig != Signal::None {
        write!(f, " ; {}", alu.sig.mnemonic())?;
    }
    Ok(())
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.0;
        for (index, (instr, word)) in program.instrs.iter().zip(&program.words).enumerate() {
            for name in program.labels_at(index) {
                writeln!(f, "{name}:")?;
            }
            write!(f, "{index:5}  {word:016x}  ")?;
            match instr {
                Instr::Alu(alu) => write_alu(f, alu)?,
                Instr::LoadImm(ldi) => {
                    write!(f, "ldi {}, ", DstFmt(ldi.dst))?;
                    match ldi.value {
                        Immediate::Word(w) => write!(f, "{w:#x}")?,
                        Immediate::Lanes(lanes) => write!(f, "{lanes:?}")?,
                    }
                    if ldi.set_flags {
                        f.write_str(" [sf]")?;
                    }
                }
                Instr::Sema { id, op } => {
                    let dir = match op {
                        SemaOp::Up => "srel",
                        SemaOp::Down => "sacq",
                    };
                    write!(f, "{dir} {id}")?;
                }
                Instr::Branch { cond, target } => write!(f, "{} {target}", cond.mnemonic())?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::{Assembler, BranchCond, Dst, Src};

    fn tiny() -> crate::asm::Program {
        let mut asm = Assembler::new();
        let top = asm.label("top");
        asm.bind(top);
        asm.mov(Dst::Vpm, Src::Acc(0));
        asm.sema_up(1);
        asm.sema_down(1);
        asm.branch(BranchCond::Always, top);
        asm.nops(3);
        asm.thread_end();
        asm.finish().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn bytes_are_little_endian_words() {
        let program = tiny();
        let bytes = program.to_bytes();
        assert_eq!(bytes.len(), program.len() * 8);
        let first = u64::from_le_bytes(bytes[..8].try_into().unwrap_or_default());
        assert_eq!(first, program.words()[0]);
    }

    #[test]
    fn stats_count_instruction_kinds() {
        let stats = tiny().stats();
        assert_eq!(stats.instructions, 10);
        assert_eq!(stats.semaphore_ups, 1);
        assert_eq!(stats.semaphore_downs, 1);
        assert_eq!(stats.branches, 1);
        assert_eq!(stats.vpm_writes, 1);
        assert_eq!(stats.nops, 5);
    }

    #[test]
    fn listing_names_labels() {
        let text = tiny().listing().to_string();
        assert!(text.starts_with("top:\n"));
        assert!(text.contains("thrend"));
        assert_eq!(text.lines().count(), 11);
    }
}
