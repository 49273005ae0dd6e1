//! Scratch-buffer (VPM) layout and store-engine setup words.
//!
//! # Layout for N threads
//!
//! ```text
//! rows 0      .. N        luma slot 0, row th = thread th
//! rows N      .. 2N       luma slot 1
//! rows 2N     .. 2N+N/2   chroma U, words 8w..8w+8 for slot w
//! rows 2N+N/2 .. 3N       chroma V, same split
//! row  3N                 discard row for odd threads' chroma
//! ```
//!
//! Writes use 8-bit packed horizontal mode: one vector stores the low byte of
//! each lane as 16 consecutive bytes, a quarter row. The write address is
//! `Y << 2 | B` where `B` picks the quarter, and advances by the setup's
//! stride after each write.

use serde::{Deserialize, Serialize};

/// Rows in the scratch buffer.
pub const VPM_ROWS: usize = 64;

/// Bytes per scratch row (16 words).
pub const VPM_ROW_BYTES: usize = 64;

/// Store-engine stride setup identifier bits.
pub const STRIDE_SETUP_ID: u32 = 0xC000_0000;

/// Largest stride the stride setup word can carry.
pub const MAX_STORE_STRIDE: u32 = 0x1FFF;

/// Generic scratch write setup (8-bit, packed, horizontal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpmWriteSetup {
    /// Address increment after each write, in quarter rows (0 means 64).
    pub stride: u8,
    /// Row.
    pub y: u8,
    /// Quarter-row (byte lane group) within the row.
    pub b: u8,
}

impl VpmWriteSetup {
    /// Encodes the setup word.
    #[must_use]
    pub const fn word(self) -> u32 {
        let horizontal = 1u32;
        let laned = 0u32;
        let size = 0u32;
        let addr = ((self.y as u32 & 0x3F) << 2) | (self.b as u32 & 0x3);
        (self.stride as u32 & 0x3F) << 12 | horizontal << 11 | laned << 10 | size << 8 | addr
    }
}

/// Decoded generic write setup as seen by the scratch memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSetupFields {
    /// Address step.
    pub stride: u32,
    /// Horizontal mode.
    pub horizontal: bool,
    /// Laned (as opposed to packed) mode.
    pub laned: bool,
    /// Element size: 0 = 8-bit, 1 = 16-bit, 2 = 32-bit.
    pub size: u8,
    /// Write address.
    pub addr: u32,
}

impl WriteSetupFields {
    /// Decodes a generic write setup word.
    #[must_use]
    pub const fn decode(word: u32) -> Self {
        let stride = (word >> 12) & 0x3F;
        Self {
            stride: if stride == 0 { 64 } else { stride },
            horizontal: word & (1 << 11) != 0,
            laned: word & (1 << 10) != 0,
            size: ((word >> 8) & 0x3) as u8,
            addr: word & 0xFF,
        }
    }
}

/// Store-engine block setup (32-bit, horizontal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSetup {
    /// Rows to transfer (1..=128).
    pub rows: u32,
    /// 32-bit words per row (1..=128).
    pub words: u32,
    /// First scratch row.
    pub y: u32,
    /// First word within the row.
    pub x: u32,
}

impl StoreSetup {
    /// Encodes the setup word.
    #[must_use]
    pub const fn word(self) -> u32 {
        let horizontal = 1u32;
        let mode_32bit = 0u32;
        0x8000_0000
            | (self.rows & 0x7F) << 23
            | (self.words & 0x7F) << 16
            | horizontal << 14
            | (self.y & 0x7F) << 7
            | (self.x & 0xF) << 3
            | mode_32bit
    }

    /// Decodes a block setup word; `None` for non-horizontal or narrow modes.
    #[must_use]
    pub const fn decode(word: u32) -> Option<Self> {
        if word >> 30 != 0b10 || word & (1 << 14) == 0 || word & 0x7 != 0 {
            return None;
        }
        let rows = (word >> 23) & 0x7F;
        let words = (word >> 16) & 0x7F;
        Some(Self {
            rows: if rows == 0 { 128 } else { rows },
            words: if words == 0 { 128 } else { words },
            y: (word >> 7) & 0x7F,
            x: (word >> 3) & 0xF,
        })
    }

    /// Bytes per transferred row.
    #[must_use]
    pub const fn row_bytes(self) -> usize {
        self.words as usize * 4
    }
}

/// Encodes a store-engine stride setup word.
#[must_use]
pub const fn stride_word(stride: u32) -> u32 {
    STRIDE_SETUP_ID | (stride & MAX_STORE_STRIDE)
}

/// Scratch layout for a given thread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchLayout {
    threads: u32,
}

impl ScratchLayout {
    /// Layout for `threads` threads.
    #[must_use]
    pub const fn new(threads: usize) -> Self {
        Self {
            threads: threads as u32,
        }
    }

    /// First row of chroma U.
    #[must_use]
    pub const fn chroma_u_row(self) -> u32 {
        2 * self.threads
    }

    /// First row of chroma V.
    #[must_use]
    pub const fn chroma_v_row(self) -> u32 {
        2 * self.threads + self.threads / 2
    }

    /// Row receiving odd threads' chroma writes.
    #[must_use]
    pub const fn discard_row(self) -> u32 {
        3 * self.threads
    }

    /// Rows used, including the discard row and its overflow quarter.
    #[must_use]
    pub const fn rows_used(self) -> usize {
        self.discard_row() as usize + 2
    }

    /// Luma write setup handed to `thread` in its launch stream.
    #[must_use]
    pub const fn luma_write_setup(self, thread: usize) -> VpmWriteSetup {
        VpmWriteSetup {
            stride: 1,
            y: thread as u8,
            b: 0,
        }
    }

    /// Chroma write setup handed to `thread`.
    ///
    /// Even threads own chroma row `thread / 2`; the stride steps from the U
    /// row to the matching V row. Odd threads write the discard row.
    #[must_use]
    pub const fn chroma_write_setup(self, thread: usize) -> VpmWriteSetup {
        if thread % 2 == 0 {
            VpmWriteSetup {
                stride: (self.threads / 2 * 4) as u8,
                y: (self.chroma_u_row() + thread as u32 / 2) as u8,
                b: 0,
            }
        } else {
            VpmWriteSetup {
                stride: 1,
                y: self.discard_row() as u8,
                b: 0,
            }
        }
    }

    /// Offset added to the luma setup for sub-step `t` writing slot `slot`.
    #[must_use]
    pub const fn luma_write_offset(self, slot: u32, t: u32) -> u32 {
        slot * self.threads * 4 + t
    }

    /// Offset added to the chroma setup for odd sub-step `t` writing slot `slot`.
    #[must_use]
    pub const fn chroma_write_offset(self, slot: u32, t: u32) -> u32 {
        slot * 2 + t / 2
    }

    /// Store of luma slot `slot`.
    #[must_use]
    pub const fn luma_store(self, slot: u32) -> StoreSetup {
        StoreSetup {
            rows: self.threads,
            words: 16,
            y: slot * self.threads,
            x: 0,
        }
    }

    /// Store of chroma-U slot `slot`.
    #[must_use]
    pub const fn chroma_u_store(self, slot: u32) -> StoreSetup {
        StoreSetup {
            rows: self.threads / 2,
            words: 8,
            y: self.chroma_u_row(),
            x: 8 * slot,
        }
    }

    /// Store of chroma-V slot `slot`.
    #[must_use]
    pub const fn chroma_v_store(self, slot: u32) -> StoreSetup {
        StoreSetup {
            rows: self.threads / 2,
            words: 8,
            y: self.chroma_v_row(),
            x: 8 * slot,
        }
    }
}
