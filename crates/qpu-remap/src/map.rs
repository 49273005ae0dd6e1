//! Displacement-map file format and conversion.
//!
//! A map holds one 32-bit entry per output pixel: the vertical fixed-point
//! component in the high half, the horizontal one in the low half (see
//! [`crate::kernel::coord`]).
//!
//! # File Layout
//!
//! ```text
//! i32 LE  map_width
//! i32 LE  map_height
//! i32 LE  image_width
//! i32 LE  image_height
//! u32 LE  entries[map_width * map_height]   (interleaved)
//! ```
//!
//! Entries are stored in the order the kernel fetches them: for each tile row,
//! for each 16-column block, for each thread, the 16 entries of that thread's
//! row. Thread `th` lane `l` then finds fetch `k` at
//! `base + th*64 + l*4 + k*64*N`. The interleave depends on the thread count,
//! so every conversion takes it explicitly.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asm::LANES;
use crate::error::MapError;
use crate::kernel::coord;
use crate::kernel::schedule::TILE_COLUMNS;

/// Bytes of the file header.
pub const HEADER_BYTES: usize = 16;

/// Widest supported map.
pub const MAX_WIDTH: usize = 1920;

/// Tallest supported map.
pub const MAX_HEIGHT: usize = 1080;

/// Map and source-image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapHeader {
    /// Output width.
    pub map_width: u32,
    /// Output height.
    pub map_height: u32,
    /// Source image width.
    pub image_width: u32,
    /// Source image height.
    pub image_height: u32,
}

impl MapHeader {
    /// Header for a map the same size as its source image.
    #[must_use]
    pub const fn same_size(width: u32, height: u32) -> Self {
        Self {
            map_width: width,
            map_height: height,
            image_width: width,
            image_height: height,
        }
    }

    /// Entries the map holds.
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.map_width as usize * self.map_height as usize
    }

    /// Texture extent the horizontal component is normalized against.
    ///
    /// Source buffers are allocated with a power-of-two pitch, and the
    /// texture is configured with that pitch as its width.
    #[must_use]
    pub const fn texture_width(&self) -> u32 {
        next_pow2(self.image_width)
    }

    fn to_bytes(self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        for (chunk, v) in out.chunks_exact_mut(4).zip([
            self.map_width,
            self.map_height,
            self.image_width,
            self.image_height,
        ]) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MapError> {
        if bytes.len() < HEADER_BYTES {
            return Err(MapError::Truncated {
                expected: HEADER_BYTES,
                found: bytes.len(),
            });
        }
        let field = |i: usize, name: &'static str| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[4 * i..4 * i + 4]);
            let value = i32::from_le_bytes(raw);
            u32::try_from(value)
                .ok()
                .filter(|&v| v > 0)
                .ok_or(MapError::InvalidHeader { field: name, value })
        };
        Ok(Self {
            map_width: field(0, "map_width")?,
            map_height: field(1, "map_height")?,
            image_width: field(2, "image_width")?,
            image_height: field(3, "image_height")?,
        })
    }
}

/// Smallest power of two at least `v` (1 for 0).
#[must_use]
pub const fn next_pow2(v: u32) -> u32 {
    if v <= 1 {
        1
    } else {
        1 << (32 - (v - 1).leading_zeros())
    }
}

/// Checks the tiling preconditions the kernel assumes but never verifies.
///
/// # Errors
///
/// Returns [`MapError::Dimension`] when the width is not a multiple of the
/// tile width or the height not a multiple of the thread count, or either
/// exceeds the supported frame size.
pub fn validate_dimensions(width: usize, height: usize, threads: usize) -> Result<(), MapError> {
    if width == 0 || width % TILE_COLUMNS != 0 || width > MAX_WIDTH {
        return Err(MapError::Dimension {
            axis: "width",
            value: width,
            multiple: TILE_COLUMNS,
            max: MAX_WIDTH,
        });
    }
    if height == 0 || threads == 0 || height % threads != 0 || height > MAX_HEIGHT {
        return Err(MapError::Dimension {
            axis: "height",
            value: height,
            multiple: threads,
            max: MAX_HEIGHT,
        });
    }
    Ok(())
}

/// Position of row-major pixel `(x, y)` in the interleaved entry table.
#[must_use]
pub const fn interleaved_index(x: usize, y: usize, width: usize, threads: usize) -> usize {
    let blocks = width / LANES;
    let (tile_row, thread) = (y / threads, y % threads);
    let (block, lane) = (x / LANES, x % LANES);
    ((tile_row * blocks + block) * threads + thread) * LANES + lane
}

/// Displacement map in kernel fetch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplacementMap {
    header: MapHeader,
    threads: usize,
    entries: Vec<u32>,
}

impl DisplacementMap {
    /// Builds a map from row-major entries.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for bad dimensions or a wrong entry count.
    pub fn from_row_major(
        header: MapHeader,
        threads: usize,
        row_major: &[u32],
    ) -> Result<Self, MapError> {
        let (w, h) = (header.map_width as usize, header.map_height as usize);
        validate_dimensions(w, h, threads)?;
        if row_major.len() != header.entries() {
            return Err(MapError::FieldLength {
                expected: header.entries(),
                found: row_major.len(),
            });
        }
        let mut entries = vec![0u32; row_major.len()];
        for (y, row) in row_major.chunks_exact(w).enumerate() {
            for (x, &e) in row.iter().enumerate() {
                entries[interleaved_index(x, y, w, threads)] = e;
            }
        }
        Ok(Self {
            header,
            threads,
            entries,
        })
    }

    /// Builds a map from per-pixel source positions, in pixels.
    ///
    /// `xs` and `ys` are row-major and address the source image; each pair is
    /// aimed at the centre of the texel it names.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for bad dimensions or field lengths.
    pub fn from_fields(
        header: MapHeader,
        threads: usize,
        xs: &[f32],
        ys: &[f32],
    ) -> Result<Self, MapError> {
        for field in [xs, ys] {
            if field.len() != header.entries() {
                return Err(MapError::FieldLength {
                    expected: header.entries(),
                    found: field.len(),
                });
            }
        }
        let (sw, th) = (header.texture_width(), header.image_height);
        let row_major: Vec<u32> = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| coord::pack(coord::from_pixel(x, sw), coord::from_pixel(y, th)))
            .collect();
        debug!(
            width = header.map_width,
            height = header.map_height,
            threads,
            "converted coordinate fields"
        );
        Self::from_row_major(header, threads, &row_major)
    }

    /// Map sampling every output pixel from the same source position.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for bad dimensions.
    pub fn identity(header: MapHeader, threads: usize) -> Result<Self, MapError> {
        Self::from_positions(header, threads, |x, y| (x as f32, y as f32))
    }

    /// Map mirroring the source horizontally.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for bad dimensions.
    pub fn horizontal_flip(header: MapHeader, threads: usize) -> Result<Self, MapError> {
        let last = header.image_width.saturating_sub(1) as f32;
        Self::from_positions(header, threads, |x, y| (last - x as f32, y as f32))
    }

    /// Map built from a per-pixel position function.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for bad dimensions.
    pub fn from_positions(
        header: MapHeader,
        threads: usize,
        position: impl Fn(usize, usize) -> (f32, f32),
    ) -> Result<Self, MapError> {
        let (w, h) = (header.map_width as usize, header.map_height as usize);
        let (xs, ys): (Vec<f32>, Vec<f32>) = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| position(x, y))
            .unzip();
        Self::from_fields(header, threads, &xs, &ys)
    }

    /// Header.
    #[must_use]
    pub const fn header(&self) -> MapHeader {
        self.header
    }

    /// Thread count the entries are interleaved for.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Entries in fetch order.
    #[must_use]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Entry of output pixel `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<u32> {
        let w = self.header.map_width as usize;
        if x >= w || y >= self.header.map_height as usize {
            return None;
        }
        self.entries
            .get(interleaved_index(x, y, w, self.threads))
            .copied()
    }

    /// Entries in row-major order.
    #[must_use]
    pub fn to_row_major(&self) -> Vec<u32> {
        let (w, h) = (
            self.header.map_width as usize,
            self.header.map_height as usize,
        );
        (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| self.entries[interleaved_index(x, y, w, self.threads)])
            .collect()
    }

    /// Entry table as little-endian bytes, the image the kernel reads.
    #[must_use]
    pub fn entry_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|e| e.to_le_bytes()).collect()
    }

    /// Parses a map file.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] for truncated files, invalid header fields or
    /// dimensions the kernel cannot tile.
    pub fn from_bytes(bytes: &[u8], threads: usize) -> Result<Self, MapError> {
        let header = MapHeader::from_bytes(bytes)?;
        validate_dimensions(
            header.map_width as usize,
            header.map_height as usize,
            threads,
        )?;
        let expected = HEADER_BYTES + 4 * header.entries();
        if bytes.len() < expected {
            return Err(MapError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        let entries = bytes[HEADER_BYTES..expected]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            header,
            threads,
            entries,
        })
    }

    /// Reads a map file.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] on I/O failure or malformed content.
    pub fn read_from(mut r: impl Read, threads: usize) -> Result<Self, MapError> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes, threads)
    }

    /// Writes the map file.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.header.to_bytes())?;
        w.write_all(&self.entry_bytes())
    }
}
