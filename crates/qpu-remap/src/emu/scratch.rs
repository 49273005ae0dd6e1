//! Scratch memory and the store engine.
//!
//! Writes model the 8-bit packed horizontal mode only. The store engine copies
//! its whole block when the start address is written, so any later scratch
//! write into that block is visibly too late in the trace.

use crate::asm::LANES;
use crate::emu::memory::Memory;
use crate::error::EmulatorError;
use crate::kernel::scratch::{
    StoreSetup, WriteSetupFields, MAX_STORE_STRIDE, VPM_ROWS, VPM_ROW_BYTES,
};

/// Where a packed write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSpan {
    /// Row.
    pub row: usize,
    /// First byte.
    pub byte: usize,
}

/// Shared scratch memory plus the store-engine configuration.
#[derive(Debug, Clone)]
pub struct Scratch {
    rows: Vec<[u8; VPM_ROW_BYTES]>,
    store: Option<StoreSetup>,
    stride: u32,
    in_flight: bool,
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratch {
    /// Zeroed scratch memory, store engine idle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: vec![[0; VPM_ROW_BYTES]; VPM_ROWS],
            store: None,
            stride: 0,
            in_flight: false,
        }
    }

    /// One row.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[u8; VPM_ROW_BYTES]> {
        self.rows.get(row)
    }

    /// Writes the low byte of each lane at the setup's address and advances it.
    ///
    /// # Errors
    ///
    /// [`EmulatorError::Unsupported`] for modes other than 8-bit packed
    /// horizontal, [`EmulatorError::ScratchFault`] past the last row.
    pub fn write_packed(
        &mut self,
        thread: usize,
        setup: &mut WriteSetupFields,
        lanes: &[u32; LANES],
    ) -> Result<WriteSpan, EmulatorError> {
        if !setup.horizontal || setup.laned || setup.size != 0 {
            return Err(EmulatorError::Unsupported {
                thread,
                what: format!(
                    "scratch write mode (horizontal={}, laned={}, size={})",
                    setup.horizontal, setup.laned, setup.size
                ),
            });
        }
        let row = (setup.addr >> 2) as usize;
        let byte = (setup.addr & 3) as usize * LANES;
        let dst = self
            .rows
            .get_mut(row)
            .ok_or(EmulatorError::ScratchFault { thread, row })?;
        for (d, v) in dst[byte..byte + LANES].iter_mut().zip(lanes) {
            *d = *v as u8;
        }
        setup.addr += setup.stride;
        Ok(WriteSpan { row, byte })
    }

    /// Routes a setup-register write by its identifier bits.
    ///
    /// Returns the new generic write setup when the word is one.
    ///
    /// # Errors
    ///
    /// [`EmulatorError::Unsupported`] for read setups and malformed store
    /// setups.
    pub fn setup(&mut self, thread: usize, word: u32) -> Result<Option<WriteSetupFields>, EmulatorError> {
        match word >> 30 {
            0b00 => Ok(Some(WriteSetupFields::decode(word))),
            0b10 => {
                let store = StoreSetup::decode(word).ok_or_else(|| EmulatorError::Unsupported {
                    thread,
                    what: format!("store setup {word:#010x}"),
                })?;
                self.store = Some(store);
                Ok(None)
            }
            0b11 => {
                self.stride = word & MAX_STORE_STRIDE;
                Ok(None)
            }
            _ => Err(EmulatorError::Unsupported {
                thread,
                what: format!("scratch read setup {word:#010x}"),
            }),
        }
    }

    /// Starts a store of the configured block to `addr`.
    ///
    /// # Errors
    ///
    /// [`EmulatorError::TransferOverlap`] if a store is still in flight,
    /// [`EmulatorError::Unsupported`] without a block setup, and scratch or
    /// memory faults for out-of-range blocks.
    pub fn start_store(
        &mut self,
        thread: usize,
        addr: u32,
        memory: &mut Memory,
    ) -> Result<StoreSetup, EmulatorError> {
        if self.in_flight {
            return Err(EmulatorError::TransferOverlap { thread });
        }
        let store = self.store.ok_or_else(|| EmulatorError::Unsupported {
            thread,
            what: "store started without a block setup".into(),
        })?;
        let start = store.x as usize * 4;
        let end = start + store.row_bytes();
        let pitch = store.row_bytes() as u32 + self.stride;
        for r in 0..store.rows as usize {
            let row = store.y as usize + r;
            let src = self
                .rows
                .get(row)
                .and_then(|bytes| bytes.get(start..end))
                .ok_or(EmulatorError::ScratchFault { thread, row })?;
            memory.write(addr + r as u32 * pitch, src)?;
        }
        self.in_flight = true;
        Ok(store)
    }

    /// Completes the in-flight store; a no-op when idle.
    pub fn wait_store(&mut self) {
        self.in_flight = false;
    }

    /// Destination stride between stored rows.
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// True while a store is in flight.
    #[must_use]
    pub const fn store_in_flight(&self) -> bool {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::scratch::{stride_word, ScratchLayout};

    #[test]
    fn packed_write_lands_in_quarter_row_and_advances() {
        let mut scratch = Scratch::new();
        let layout = ScratchLayout::new(12);
        let mut setup = WriteSetupFields::decode(layout.chroma_write_setup(2).word() + 1);
        let lanes: [u32; LANES] = std::array::from_fn(|i| 0x100 + i as u32);
        let span = scratch.write_packed(0, &mut setup, &lanes);
        assert_eq!(span, Ok(WriteSpan { row: 25, byte: 16 }));
        assert_eq!(scratch.row(25).map(|r| r[16..32].to_vec()), Some((0..16).collect()));
        let span = scratch.write_packed(0, &mut setup, &lanes);
        assert_eq!(span, Ok(WriteSpan { row: 31, byte: 16 }));
    }

    #[test]
    fn store_copies_block_with_stride() {
        let mut scratch = Scratch::new();
        let mut memory = Memory::new(0x8000);
        let out = memory.alloc(256, 4);
        let lanes = [7u32; LANES];
        let mut setup = WriteSetupFields::decode(ScratchLayout::new(2).luma_write_setup(1).word());
        assert!(scratch.write_packed(0, &mut setup, &lanes).is_ok());
        let store = StoreSetup {
            rows: 2,
            words: 4,
            y: 0,
            x: 0,
        };
        assert_eq!(scratch.setup(0, stride_word(16)), Ok(None));
        assert_eq!(scratch.setup(0, store.word()), Ok(None));
        assert!(scratch.start_store(0, out, &mut memory).is_ok());
        assert_eq!(memory.slice(out + 32, 16), Some(&[7u8; 16][..]));
        assert_eq!(memory.slice(out, 16), Some(&[0u8; 16][..]));
        assert!(matches!(
            scratch.start_store(0, out, &mut memory),
            Err(EmulatorError::TransferOverlap { thread: 0 })
        ));
        scratch.wait_store();
        assert!(!scratch.store_in_flight());
    }

    #[test]
    fn unsupported_write_modes() {
        let mut scratch = Scratch::new();
        let mut setup = WriteSetupFields::decode(2 << 8 | 1 << 11);
        assert!(matches!(
            scratch.write_packed(1, &mut setup, &[0; LANES]),
            Err(EmulatorError::Unsupported { thread: 1, .. })
        ));
        assert!(scratch.setup(1, 0x4000_0000).is_err());
    }
}
