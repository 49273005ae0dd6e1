//! Frame-level harness: lays out a map, a source frame and the launch streams
//! in emulated memory, runs the kernel and reads the output frame back.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emu::memory::{Memory, PAGE};
use crate::emu::{Emulator, EmulatorOptions, Run};
use crate::error::{EmulatorError, MapError};
use crate::kernel::MAP_ROW_BYTES;
use crate::launch::{Filter, LaunchConfig, TextureConfig, MAX_TEXTURE_DIM, UNIFORMS_PER_THREAD};
use crate::map::DisplacementMap;

/// Bus address of the first allocation.
pub const MEMORY_BASE: u32 = 0x0800_0000;

/// Map rows the kernel fetches past the last entry.
pub const MAP_OVERREAD_BLOCKS: u32 = 5;

/// Packed 4:2:2 frame, two pixels per four bytes `Y0 U Y1 V`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YuyvFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl YuyvFrame {
    /// Wraps packed pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::SourceMismatch`] unless `data` holds exactly
    /// `width * height * 2` bytes, or [`MapError::Dimension`] for an odd width.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MapError> {
        if width % 2 != 0 {
            return Err(MapError::Dimension {
                axis: "width",
                value: width as usize,
                multiple: 2,
                max: MAX_TEXTURE_DIM as usize,
            });
        }
        let expected = width as usize * height as usize * 2;
        if data.len() != expected {
            return Err(MapError::SourceMismatch {
                what: "byte length",
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Frame from a per-pixel `[Y, U, V]` function; chroma is taken from the
    /// even pixel of each pair.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 2);
        for y in 0..height {
            for x in (0..width).step_by(2) {
                let [y0, u, v] = pixel(x, y);
                let [y1, _, _] = pixel(x + 1, y);
                data.extend_from_slice(&[y0, u, y1, v]);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Packed bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// `[Y, U, V]` of pixel `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let pair = (y as usize * self.width as usize + (x as usize & !1)) * 2;
        let q = self.data.get(pair..pair + 4)?;
        Some([q[(x as usize & 1) * 2], q[1], q[3]])
    }
}

/// Planar 4:2:0 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Yuv420Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Luma, `width * height` bytes.
    pub y: Vec<u8>,
    /// Chroma U, `width/2 * height/2` bytes.
    pub u: Vec<u8>,
    /// Chroma V, same size as U.
    pub v: Vec<u8>,
}

impl Yuv420Frame {
    /// Reads a frame laid out as Y, U, V planes from `base`.
    #[must_use]
    pub fn read(memory: &Memory, base: u32, width: u32, height: u32) -> Option<Self> {
        let luma = width as usize * height as usize;
        let chroma = luma / 4;
        let bytes = memory.slice(base, luma + 2 * chroma)?;
        let (y, rest) = bytes.split_at(luma);
        let (u, v) = rest.split_at(chroma);
        Some(Self {
            width,
            height,
            y: y.to_vec(),
            u: u.to_vec(),
            v: v.to_vec(),
        })
    }

    /// Luma of `(x, y)`.
    #[must_use]
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        self.y
            .get(y as usize * self.width as usize + x as usize)
            .filter(|_| x < self.width)
            .copied()
    }

    /// `[U, V]` of chroma sample `(i, j)`.
    #[must_use]
    pub fn chroma(&self, i: u32, j: u32) -> Option<[u8; 2]> {
        let at = j as usize * (self.width as usize / 2) + i as usize;
        if i >= self.width / 2 {
            return None;
        }
        Some([*self.u.get(at)?, *self.v.get(at)?])
    }

    /// I420 bytes: Y plane, then U, then V.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        [self.y.as_slice(), self.u.as_slice(), self.v.as_slice()].concat()
    }
}

/// Map, source and launch streams laid out in memory, ready to run.
#[derive(Debug, Clone)]
pub struct Scene {
    memory: Memory,
    launch: LaunchConfig,
    uniforms: Vec<u32>,
}

impl Scene {
    /// Lays out `map` and `source` for a run with `filter`.
    ///
    /// The source rows are copied into a buffer whose pitch is the texture
    /// width the map was normalized against.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::SourceMismatch`] when the source dimensions are not
    /// the ones in the map header.
    pub fn new(map: &DisplacementMap, source: &YuyvFrame, filter: Filter) -> Result<Self, MapError> {
        let header = map.header();
        for (what, expected, found) in [
            ("width", header.image_width, source.width),
            ("height", header.image_height, source.height),
        ] {
            if expected != found {
                return Err(MapError::SourceMismatch {
                    what,
                    expected: expected as usize,
                    found: found as usize,
                });
            }
        }
        let threads = map.threads();
        let mut memory = Memory::new(MEMORY_BASE);

        let mut map_bytes = map.entry_bytes();
        map_bytes.resize(
            map_bytes.len() + (MAP_OVERREAD_BLOCKS * MAP_ROW_BYTES) as usize * threads,
            0,
        );
        let map_base = memory.alloc_with(&map_bytes, PAGE);

        let texture_width = header.texture_width();
        let pitch = texture_width as usize * 2;
        let row = source.width as usize * 2;
        let mut texels = vec![0u8; pitch * source.height as usize];
        for (dst, src) in texels.chunks_exact_mut(pitch).zip(source.data.chunks_exact(row.max(1))) {
            dst[..row].copy_from_slice(src);
        }
        let texture_base = memory.alloc_with(&texels, PAGE);

        let launch = LaunchConfig {
            threads,
            texture: TextureConfig::yuyv(texture_base, texture_width, header.image_height)
                .with_filter(filter),
            map_base,
            frame_base: 0,
            width: header.map_width,
            height: header.map_height,
        };
        let frame_base = memory.alloc(launch.frame_bytes(), PAGE);
        let launch = LaunchConfig {
            frame_base,
            ..launch
        };

        let stream_bytes = (UNIFORMS_PER_THREAD * 4) as u32;
        let streams = memory.next_address(16);
        let uniforms: Vec<u32> = (0..threads as u32).map(|t| streams + t * stream_bytes).collect();
        let words: Vec<u8> = uniforms
            .iter()
            .enumerate()
            .flat_map(|(t, &addr)| launch.uniforms(t, addr))
            .flat_map(u32::to_le_bytes)
            .collect();
        memory.alloc_with(&words, 16);

        debug!(
            map_base,
            texture_base,
            frame_base,
            streams,
            bytes = memory.len(),
            "scene laid out"
        );
        Ok(Self {
            memory,
            launch,
            uniforms,
        })
    }

    /// Launch geometry and addresses.
    #[must_use]
    pub const fn launch(&self) -> &LaunchConfig {
        &self.launch
    }

    /// Memory before the run.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Uniform stream address of each thread.
    #[must_use]
    pub fn uniform_addrs(&self) -> &[u32] {
        &self.uniforms
    }

    /// Runs `program` over the scene and reads back the output frame.
    ///
    /// # Errors
    ///
    /// Returns any [`EmulatorError`] of the run.
    pub fn run(
        &self,
        program: &[u64],
        options: EmulatorOptions,
    ) -> Result<(Run, Yuv420Frame), EmulatorError> {
        let run = Emulator::new(program, options).run(self.memory.clone(), &self.uniforms)?;
        let (base, w, h) = (self.launch.frame_base, self.launch.width, self.launch.height);
        let frame = Yuv420Frame::read(&run.memory, base, w, h).ok_or(EmulatorError::MemoryFault {
            address: base,
            len: self.launch.frame_bytes(),
        })?;
        Ok((run, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapHeader;

    fn gradient(width: u32, height: u32) -> YuyvFrame {
        YuyvFrame::from_fn(width, height, |x, y| [(x + y) as u8, x as u8 / 2, 255 - y as u8])
    }

    #[test]
    fn yuyv_pixels_share_pair_chroma() {
        let frame = gradient(8, 2);
        assert_eq!(frame.pixel(3, 1), Some([4, 1, 254]));
        assert_eq!(frame.pixel(2, 1), Some([3, 1, 254]));
        assert_eq!(frame.pixel(8, 0), None);
        assert!(YuyvFrame::new(8, 2, vec![0; 31]).is_err());
        assert!(YuyvFrame::new(7, 2, vec![0; 28]).is_err());
    }

    #[test]
    fn scene_layout() {
        let header = MapHeader::same_size(128, 4);
        let map = DisplacementMap::identity(header, 2).unwrap_or_else(|e| panic!("{e}"));
        let scene = Scene::new(&map, &gradient(128, 4), Filter::Nearest)
            .unwrap_or_else(|e| panic!("{e}"));
        let launch = scene.launch();
        assert_eq!(launch.map_base, MEMORY_BASE);
        assert_eq!(launch.texture.width, 128);
        assert_eq!(launch.frame_base % PAGE, 0);
        let addrs = scene.uniform_addrs();
        assert_eq!(addrs.len(), 2);
        assert_eq!(scene.memory().read_u32(addrs[1]), addrs[1]);
        assert_eq!(scene.memory().read_u32(addrs[1] + 20), 1);
        // source row 1 starts one pitch in
        let tex = launch.texture.base;
        assert_eq!(scene.memory().read_u8(tex + 256), 1);
    }

    #[test]
    fn source_must_match_header() {
        let header = MapHeader {
            map_width: 128,
            map_height: 2,
            image_width: 160,
            image_height: 2,
        };
        let map = DisplacementMap::identity(header, 2).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(
            Scene::new(&map, &gradient(128, 2), Filter::Nearest),
            Err(MapError::SourceMismatch { what: "width", .. })
        ));
        // narrower rows are padded to the power-of-two pitch
        let scene = Scene::new(&map, &gradient(160, 2), Filter::Nearest)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(scene.launch().texture.width, 256);
        assert_eq!(scene.memory().read_u8(scene.launch().texture.base + 512), 1);
    }

    #[test]
    fn i420_bytes_are_planar() {
        let frame = Yuv420Frame {
            width: 4,
            height: 2,
            y: (0..8).collect(),
            u: vec![10, 11],
            v: vec![20, 21],
        };
        assert_eq!(frame.luma(3, 1), Some(7));
        assert_eq!(frame.chroma(1, 0), Some([11, 21]));
        assert_eq!(frame.chroma(2, 0), None);
        assert_eq!(frame.to_bytes().len(), 12);
    }
}
