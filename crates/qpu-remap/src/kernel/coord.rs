//! Fixed-point coordinate pipeline.
//!
//! A map entry packs two signed 16-bit offsets: horizontal in the low half
//! (`s`), vertical in the high half (`t`). The kernel turns each into a
//! normalized texture coordinate with `c * (1/65535) + 0.5` in f32, so `0`
//! lands on the texture centre and the i16 extremes land within one
//! quantization step of the edges.
//!
//! The converter side ([`from_pixel`]) is the inverse used when building
//! maps: it aims at texel centres so nearest filtering reproduces the exact
//! source pixel.

use crate::asm::{AddOp, Alu, Assembler, Dst, MulOp, SmallImm, Src, Unpack};
use crate::kernel::plan::Role;

/// Bit pattern of the f32 scale constant, 1/65535 rounded to nearest.
pub const RECIPROCAL_BITS: u32 = 0x3780_0080;

/// The scale constant as f32.
#[inline]
#[must_use]
pub fn reciprocal() -> f32 {
    f32::from_bits(RECIPROCAL_BITS)
}

/// Texture coordinate the kernel computes for fixed-point component `c`.
///
/// Mirrors the emitted `itof`, `fmul`, `fadd` sequence, one rounding per step.
#[inline]
#[must_use]
pub fn to_texture(c: i16) -> f32 {
    let scaled = f32::from(c) * reciprocal();
    scaled + 0.5
}

/// Splits a map entry into its `(s, t)` components.
#[inline]
#[must_use]
pub const fn split(entry: u32) -> (i16, i16) {
    (entry as u16 as i16, (entry >> 16) as u16 as i16)
}

/// Packs `(s, t)` components into a map entry.
#[inline]
#[must_use]
pub const fn pack(s: i16, t: i16) -> u32 {
    (t as u16 as u32) << 16 | s as u16 as u32
}

/// Fixed-point component addressing source pixel position `p` along an axis
/// of `extent` texels, aimed at the texel centre.
#[must_use]
pub fn from_pixel(p: f32, extent: u32) -> i16 {
    let normalized = (p + 0.5) / extent as f32 - 0.5;
    let c = (normalized * 65535.0).round();
    c.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

// =============================================================================
// Emission
// =============================================================================

/// Receives the coordinate pair from r4 and converts both halves to float.
///
/// Leaves `t` in r3 and `s` in r2, and rewinds the uniform pointer to the
/// texture configuration words read by the next texture fetch.
pub fn emit_receive(asm: &mut Assembler) {
    let coord = Role::Coord.src();
    asm.mov(Role::Coord.dst(), Src::Acc(4));
    asm.mov(Dst::UniformsAddress, Role::TextureConfigAddr.src());
    asm.emit(Alu::add(AddOp::ItoF, Dst::Acc(3), coord, coord).unpack(Unpack::B16));
    asm.emit(Alu::add(AddOp::ItoF, Dst::Acc(2), coord, coord).unpack(Unpack::A16));
}

/// Scales r2/r3, offsets by one half and issues the colour fetch.
///
/// `carry` is an add-unit move co-issued with the first scale.
pub fn emit_issue(asm: &mut Assembler, carry: Option<(Dst, Src)>) {
    let recip = Role::Reciprocal.src();
    let half = Src::Imm(SmallImm::HALF);
    let scale_t = match carry {
        Some((dst, src)) => Alu::mov(dst, src),
        None => Alu::nop(),
    }
    .with_mul(MulOp::FMul, Dst::Acc(3), Src::Acc(3), recip);
    asm.emit(scale_t);
    asm.emit(
        Alu::add(AddOp::FAdd, Dst::Tmu1T, Src::Acc(3), half).with_mul(
            MulOp::FMul,
            Dst::Acc(2),
            Src::Acc(2),
            recip,
        ),
    );
    asm.emit(Alu::add(AddOp::FAdd, Dst::Tmu1S, Src::Acc(2), half));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_is_close_to_one_over_65535() {
        assert!((f64::from(reciprocal()) - 1.0 / 65535.0).abs() < 1e-12);
    }

    #[test]
    fn zero_maps_to_centre() {
        assert_eq!(to_texture(0), 0.5);
    }

    #[test]
    fn extremes_reach_the_edges() {
        let step = 1.0 / 65535.0;
        assert!((to_texture(i16::MAX) - 1.0).abs() <= step);
        assert!(to_texture(i16::MIN).abs() <= step);
    }

    #[test]
    fn entry_halves() {
        let e = pack(-3, 7);
        assert_eq!(e, 0x0007_FFFD);
        assert_eq!(split(e), (-3, 7));
    }

    #[test]
    fn pixel_centres_land_inside_their_texel() {
        for extent in [16u32, 256, 1024, 1080] {
            for p in [0u32, 1, extent / 2, extent - 1] {
                let coord = to_texture(from_pixel(p as f32, extent));
                let texel = (coord * extent as f32).floor() as u32;
                assert_eq!(texel, p, "extent {extent} pixel {p}");
            }
        }
    }

    #[test]
    fn issue_sequence_writes_t_before_s() {
        let mut asm = Assembler::new();
        emit_issue(&mut asm, None);
        asm.thread_end();
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        let dsts: Vec<Dst> = program
            .instructions()
            .iter()
            .filter_map(|i| match i {
                crate::asm::Instr::Alu(alu) => alu.add.map(|s| s.dst),
                _ => None,
            })
            .collect();
        assert_eq!(dsts, vec![Dst::Tmu1T, Dst::Tmu1S]);
    }
}
