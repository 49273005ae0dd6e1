//! Launch ABI: per-thread uniform streams and texture configuration words.
//!
//! # Uniform stream (14 words per thread)
//!
//! ```text
//!  0  address of this stream
//!  1  texture config P0
//!  2  texture config P1
//!  3  texture config P2
//!  4  texture config P3
//!  5  thread index
//!  6  displacement-map base
//!  7  output frame (Y plane) base
//!  8  luma scratch write setup
//!  9  chroma scratch write setup
//! 10  tile-column count
//! 11  tile-row count
//! 12  frame width
//! 13  frame height
//! ```
//!
//! Word 0 lets the kernel point the uniform reader back at word 1 before
//! every colour fetch, since the texture unit consumes its configuration
//! from the uniform stream.

use serde::{Deserialize, Serialize};

use crate::kernel::schedule::TILE_COLUMNS;
use crate::kernel::scratch::ScratchLayout;

/// Words in one thread's uniform stream.
pub const UNIFORMS_PER_THREAD: usize = 14;

/// Texture type of the camera's YUYV 4:2:2 raster buffers.
pub const TEXTURE_TYPE_YUYV422R: u32 = 17;

/// Largest texture dimension; encoded as zero.
pub const MAX_TEXTURE_DIM: u32 = 2048;

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Filter {
    /// Bilinear interpolation of the four nearest texels.
    #[default]
    Bilinear,
    /// Nearest texel.
    Nearest,
}

/// Texture wrap mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Wrap {
    /// Repeat.
    Repeat,
    /// Clamp to edge.
    #[default]
    Clamp,
    /// Mirrored repeat.
    Mirror,
    /// Border colour.
    Border,
}

impl Wrap {
    const fn code(self) -> u32 {
        match self {
            Self::Repeat => 0,
            Self::Clamp => 1,
            Self::Mirror => 2,
            Self::Border => 3,
        }
    }

    const fn from_code(code: u32) -> Self {
        match code & 3 {
            0 => Self::Repeat,
            1 => Self::Clamp,
            2 => Self::Mirror,
            _ => Self::Border,
        }
    }
}

/// Source texture description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureConfig {
    /// Base address, 4 KiB aligned.
    pub base: u32,
    /// Width in texels (buffer pitch in pixels).
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texture type.
    pub texture_type: u32,
    /// Magnification and minification filter.
    pub filter: Filter,
    /// Horizontal wrap.
    pub wrap_s: Wrap,
    /// Vertical wrap.
    pub wrap_t: Wrap,
    /// Flip vertically.
    pub flip_y: bool,
}

impl TextureConfig {
    /// YUYV 4:2:2 raster texture with bilinear filtering and clamped edges.
    #[must_use]
    pub const fn yuyv(base: u32, width: u32, height: u32) -> Self {
        Self {
            base,
            width,
            height,
            texture_type: TEXTURE_TYPE_YUYV422R,
            filter: Filter::Bilinear,
            wrap_s: Wrap::Clamp,
            wrap_t: Wrap::Clamp,
            flip_y: false,
        }
    }

    /// Same texture with another filter.
    #[must_use]
    pub const fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Configuration words P0..P3.
    #[must_use]
    pub const fn words(&self) -> [u32; 4] {
        let ttype = self.texture_type;
        let p0 = (self.base & 0xFFFF_F000) | (self.flip_y as u32) << 8 | (ttype & 0xF) << 4;
        let (magfilt, minfilt) = match self.filter {
            Filter::Bilinear => (0, 0),
            Filter::Nearest => (1, 1),
        };
        let p1 = (ttype >> 4 & 1) << 31
            | (self.height & 0x7FF) << 20
            | (self.width & 0x7FF) << 8
            | magfilt << 7
            | minfilt << 4
            | self.wrap_t.code() << 2
            | self.wrap_s.code();
        [p0, p1, 0, 0]
    }

    /// Decodes configuration words as the texture unit does.
    #[must_use]
    pub const fn decode(words: [u32; 4]) -> Self {
        let [p0, p1, _, _] = words;
        Self {
            base: p0 & 0xFFFF_F000,
            width: texture_dim((p1 >> 8) & 0x7FF),
            height: texture_dim((p1 >> 20) & 0x7FF),
            texture_type: (p1 >> 31) << 4 | (p0 >> 4) & 0xF,
            filter: if p1 & (1 << 7) != 0 {
                Filter::Nearest
            } else {
                Filter::Bilinear
            },
            wrap_s: Wrap::from_code(p1),
            wrap_t: Wrap::from_code(p1 >> 2),
            flip_y: p0 & (1 << 8) != 0,
        }
    }
}

/// An 11-bit dimension field, where 0 stands for the maximum.
const fn texture_dim(field: u32) -> u32 {
    if field == 0 {
        MAX_TEXTURE_DIM
    } else {
        field
    }
}

/// Everything needed to build the uniform streams for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Threads running the kernel.
    pub threads: usize,
    /// Source texture.
    pub texture: TextureConfig,
    /// Displacement-map base address.
    pub map_base: u32,
    /// Output frame base address.
    pub frame_base: u32,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl LaunchConfig {
    /// Tile columns.
    #[must_use]
    pub const fn tile_cols(&self) -> u32 {
        self.width / TILE_COLUMNS as u32
    }

    /// Tile rows.
    #[must_use]
    pub const fn tile_rows(&self) -> u32 {
        self.height / self.threads as u32
    }

    /// Output frame size in bytes (planar 4:2:0).
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        let luma = self.width as usize * self.height as usize;
        luma + luma / 2
    }

    /// Uniform stream of `thread`, placed at `stream_addr`.
    #[must_use]
    pub fn uniforms(&self, thread: usize, stream_addr: u32) -> [u32; UNIFORMS_PER_THREAD] {
        let layout = ScratchLayout::new(self.threads);
        let [p0, p1, p2, p3] = self.texture.words();
        [
            stream_addr,
            p0,
            p1,
            p2,
            p3,
            thread as u32,
            self.map_base,
            self.frame_base,
            layout.luma_write_setup(thread).word(),
            layout.chroma_write_setup(thread).word(),
            self.tile_cols(),
            self.tile_rows(),
            self.width,
            self.height,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_texture_words() {
        let tex = TextureConfig::yuyv(0x1234_5000, 2048, 1088);
        let [p0, p1, p2, p3] = tex.words();
        assert_eq!(p0, 0x1234_5000 | 1 << 4);
        assert_eq!(p1, 1 << 31 | 1088 << 20 | 1 << 2 | 1);
        assert_eq!((p2, p3), (0, 0));
    }

    #[test]
    fn texture_words_decode_back() {
        let tex = TextureConfig::yuyv(0x0040_0000, 256, 48).with_filter(Filter::Nearest);
        assert_eq!(TextureConfig::decode(tex.words()), tex);
    }

    #[test]
    fn maximum_dimensions_decode_from_zero_fields() {
        const CAMERA: TextureConfig =
            TextureConfig::decode(TextureConfig::yuyv(0x1234_5000, 2048, 2048).words());
        assert_eq!(CAMERA.width, MAX_TEXTURE_DIM);
        assert_eq!(CAMERA.height, MAX_TEXTURE_DIM);
        assert_eq!(CAMERA, TextureConfig::yuyv(0x1234_5000, 2048, 2048));
    }

    #[test]
    fn uniform_stream_order() {
        let cfg = LaunchConfig {
            threads: 12,
            texture: TextureConfig::yuyv(0x10_0000, 2048, 1088),
            map_base: 0x20_0000,
            frame_base: 0x30_0000,
            width: 1920,
            height: 1080,
        };
        let u = cfg.uniforms(3, 0x4000);
        assert_eq!(u[0], 0x4000);
        assert_eq!(u[5], 3);
        assert_eq!(u[6], 0x20_0000);
        assert_eq!(u[7], 0x30_0000);
        assert_eq!(u[8], ScratchLayout::new(12).luma_write_setup(3).word());
        assert_eq!((u[10], u[11]), (15, 90));
        assert_eq!((u[12], u[13]), (1920, 1080));
        assert_eq!(cfg.frame_bytes(), 1920 * 1080 * 3 / 2);
    }
}
