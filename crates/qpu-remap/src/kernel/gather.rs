//! Lane gather for chroma subsampling.
//!
//! Each sub-step samples 16 consecutive output pixels, one per lane. Chroma
//! is kept for even pixels only, so the eight even lanes of a sub-step are
//! compacted into one half of the chroma accumulators: lanes 0..8 on even
//! sub-steps and lanes 8..16 on odd ones. After every second sub-step the
//! accumulators hold 16 chroma samples ready for one scratch write.
//!
//! Destination lane `L = f + 8 * (t % 2)` takes source lane `2f`. The QPU has
//! no lane-indexed move, so each placement is a full-vector rotation by
//! `(16 - L) mod 16` written only where a single-lane flag mask is set.

use crate::asm::{Alu, Assembler, Cond, Dst, Rotation, Src, LANES};

/// Chroma samples gathered per sub-step.
pub const SAMPLES_PER_STEP: usize = LANES / 2;

/// Accumulator lane receiving sample `f` of sub-step `t`.
#[inline]
#[must_use]
pub const fn destination_lane(f: usize, t: usize) -> usize {
    f + SAMPLES_PER_STEP * (t % 2)
}

/// Source lane of sample `f`.
#[inline]
#[must_use]
pub const fn source_lane(f: usize) -> usize {
    2 * f
}

/// Rotation that moves source lane `2f` onto its destination lane.
#[inline]
#[must_use]
pub const fn rotation(f: usize, t: usize) -> usize {
    (LANES - destination_lane(f, t)) % LANES
}

/// Per-lane immediate that is zero at `lane` and one elsewhere.
#[must_use]
pub fn lane_mask(lane: usize) -> [u8; LANES] {
    let mut mask = [1u8; LANES];
    mask[lane % LANES] = 0;
    mask
}

/// Rotates `v` so output lane `i` takes input lane `i - n`.
#[must_use]
pub fn rotate_lanes(v: &[u32; LANES], n: usize) -> [u32; LANES] {
    std::array::from_fn(|i| v[(i + LANES - n % LANES) % LANES])
}

/// Host model of one sub-step's gather into accumulator `acc`.
#[must_use]
pub fn gather(acc: [u32; LANES], samples: &[u32; LANES], t: usize) -> [u32; LANES] {
    let mut out = acc;
    for f in 0..SAMPLES_PER_STEP {
        let rotated = rotate_lanes(samples, rotation(f, t));
        let lane = destination_lane(f, t);
        out[lane] = rotated[lane];
    }
    out
}

/// Emits the gather of r2 into r0 and r3 into r1 for sub-step `t`.
pub fn emit_chroma_gather(asm: &mut Assembler, t: usize) {
    for f in 0..SAMPLES_PER_STEP {
        let lane = destination_lane(f, t);
        asm.ldi_lanes(Dst::Null, lane_mask(lane), true);
        for (dst, src) in [(Dst::Acc(0), Src::Acc(2)), (Dst::Acc(1), Src::Acc(3))] {
            let mov = Alu::nop().with_mul_mov(dst, src).cond(Cond::ZeroSet);
            asm.emit(match Rotation::by(rotation(f, t)) {
                Some(r) => mov.rotate(r),
                None => mov,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_lands_even_lane_on_destination() {
        let lanes: [u32; LANES] = std::array::from_fn(|i| i as u32);
        for t in 0..4 {
            for f in 0..SAMPLES_PER_STEP {
                let rotated = rotate_lanes(&lanes, rotation(f, t));
                assert_eq!(rotated[destination_lane(f, t)], source_lane(f) as u32);
            }
        }
    }

    #[test]
    fn two_substeps_fill_the_accumulator() {
        let first: [u32; LANES] = std::array::from_fn(|i| 100 + i as u32);
        let second: [u32; LANES] = std::array::from_fn(|i| 200 + i as u32);
        let acc = gather([0; LANES], &first, 0);
        let acc = gather(acc, &second, 1);
        let expected: [u32; LANES] = std::array::from_fn(|i| {
            if i < 8 {
                100 + 2 * i as u32
            } else {
                200 + 2 * (i as u32 - 8)
            }
        });
        assert_eq!(acc, expected);
    }

    #[test]
    fn mask_selects_single_lane() {
        let m = lane_mask(9);
        assert_eq!(m.iter().filter(|&&v| v == 0).count(), 1);
        assert_eq!(m[9], 0);
    }

    #[test]
    fn lane_zero_uses_unrotated_move() {
        let mut asm = Assembler::new();
        emit_chroma_gather(&mut asm, 0);
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(program.len(), 3 * SAMPLES_PER_STEP);
        match program.instructions()[1] {
            crate::asm::Instr::Alu(alu) => assert_eq!(alu.rotate, None),
            other => panic!("unexpected {other:?}"),
        }
    }
}
