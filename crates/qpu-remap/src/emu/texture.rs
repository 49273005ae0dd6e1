//! Texture-unit model for YUYV 4:2:2 raster textures.
//!
//! A lookup returns one word per lane packed as `Y | U << 8 | V << 16 | A << 24`
//! with full alpha. Texel `(i, j)` lives in the 4-byte pixel pair at
//! `j * width * 2 + (i / 2) * 4`, luma at byte `(i & 1) * 2`, U at byte 1 and
//! V at byte 3.

use crate::emu::memory::Memory;
use crate::launch::{Filter, TextureConfig, Wrap, TEXTURE_TYPE_YUYV422R};

/// Decoded texture ready for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    config: TextureConfig,
}

impl Texture {
    /// Texture from its four configuration words; `None` for unmodelled types.
    #[must_use]
    pub fn from_words(words: [u32; 4]) -> Option<Self> {
        let config = TextureConfig::decode(words);
        (config.texture_type == TEXTURE_TYPE_YUYV422R).then_some(Self { config })
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> TextureConfig {
        self.config
    }

    /// Texel `(i, j)` as `[Y, U, V]`, `None` outside the texture in border mode.
    fn texel(&self, memory: &Memory, i: i64, j: i64) -> Option<[u8; 3]> {
        let (w, h) = (i64::from(self.config.width), i64::from(self.config.height));
        let i = wrap(i, w, self.config.wrap_s)?;
        let mut j = wrap(j, h, self.config.wrap_t)?;
        if self.config.flip_y {
            j = h - 1 - j;
        }
        let pair = self.config.base + (j * w * 2 + (i / 2) * 4) as u32;
        Some([
            memory.read_u8(pair + (i as u32 & 1) * 2),
            memory.read_u8(pair + 1),
            memory.read_u8(pair + 3),
        ])
    }

    /// Samples at normalized coordinates `(s, t)`.
    #[must_use]
    pub fn sample(&self, memory: &Memory, s: f32, t: f32) -> u32 {
        let (w, h) = (self.config.width as f32, self.config.height as f32);
        let yuv = match self.config.filter {
            Filter::Nearest => {
                let i = (s * w).floor() as i64;
                let j = (t * h).floor() as i64;
                self.texel(memory, i, j).unwrap_or([0; 3])
            }
            Filter::Bilinear => {
                let x = s * w - 0.5;
                let y = t * h - 0.5;
                let (i0, j0) = (x.floor(), y.floor());
                let (fx, fy) = (x - i0, y - j0);
                let (i0, j0) = (i0 as i64, j0 as i64);
                let taps = [
                    (i0, j0, (1.0 - fx) * (1.0 - fy)),
                    (i0 + 1, j0, fx * (1.0 - fy)),
                    (i0, j0 + 1, (1.0 - fx) * fy),
                    (i0 + 1, j0 + 1, fx * fy),
                ];
                let mut acc = [0.0f32; 3];
                for (i, j, weight) in taps {
                    let texel = self.texel(memory, i, j).unwrap_or([0; 3]);
                    for (a, c) in acc.iter_mut().zip(texel) {
                        *a += weight * f32::from(c);
                    }
                }
                acc.map(|c| c.round().clamp(0.0, 255.0) as u8)
            }
        };
        let [y, u, v] = yuv;
        u32::from(y) | u32::from(u) << 8 | u32::from(v) << 16 | 0xFF << 24
    }
}

fn wrap(c: i64, extent: i64, mode: Wrap) -> Option<i64> {
    match mode {
        Wrap::Clamp => Some(c.clamp(0, extent - 1)),
        Wrap::Repeat => Some(c.rem_euclid(extent)),
        Wrap::Mirror => {
            let m = c.rem_euclid(2 * extent);
            Some(if m < extent { m } else { 2 * extent - 1 - m })
        }
        Wrap::Border => (0..extent).contains(&c).then_some(c),
    }
}
