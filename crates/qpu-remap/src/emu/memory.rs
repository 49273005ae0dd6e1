//! Flat main memory with a bump allocator.

use crate::error::EmulatorError;

/// Default allocation alignment (one texture page).
pub const PAGE: u32 = 4096;

/// Byte-addressed main memory starting at a non-zero bus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    base: u32,
    bytes: Vec<u8>,
}

impl Memory {
    /// Empty memory whose first allocation lands at `base`.
    #[must_use]
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            bytes: Vec::new(),
        }
    }

    /// First bus address.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Bytes allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True before the first allocation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address the next allocation aligned to `align` will return.
    #[must_use]
    pub fn next_address(&self, align: u32) -> u32 {
        let align = align.max(1) as usize;
        self.base + (self.bytes.len().div_ceil(align) * align) as u32
    }

    /// Reserves `len` zeroed bytes aligned to `align` and returns the address.
    pub fn alloc(&mut self, len: usize, align: u32) -> u32 {
        let addr = self.next_address(align);
        self.bytes.resize((addr - self.base) as usize + len, 0);
        addr
    }

    /// Allocates and fills a region with `data`.
    pub fn alloc_with(&mut self, data: &[u8], align: u32) -> u32 {
        let addr = self.alloc(data.len(), align);
        let start = (addr - self.base) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        addr
    }

    fn offset(&self, address: u32, len: usize) -> Option<usize> {
        let start = address.checked_sub(self.base)? as usize;
        (start.checked_add(len)? <= self.bytes.len()).then_some(start)
    }

    /// Reads `len` bytes, `None` if any falls outside memory.
    #[must_use]
    pub fn slice(&self, address: u32, len: usize) -> Option<&[u8]> {
        self.offset(address, len)
            .map(|start| &self.bytes[start..start + len])
    }

    /// Reads one byte; unmapped addresses read as zero.
    #[must_use]
    pub fn read_u8(&self, address: u32) -> u8 {
        self.slice(address, 1).map_or(0, |b| b[0])
    }

    /// Reads a little-endian word; unmapped addresses read as zero.
    #[must_use]
    pub fn read_u32(&self, address: u32) -> u32 {
        self.slice(address, 4)
            .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Writes `data` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulatorError::MemoryFault`] when the range is not mapped.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), EmulatorError> {
        let start = self
            .offset(address, data.len())
            .ok_or(EmulatorError::MemoryFault {
                address,
                len: data.len(),
            })?;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Writes little-endian words at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulatorError::MemoryFault`] when the range is not mapped.
    pub fn write_words(&mut self, address: u32, words: &[u32]) -> Result<(), EmulatorError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(address, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut mem = Memory::new(0x1000_0000);
        let a = mem.alloc(10, 16);
        let b = mem.alloc(4, PAGE);
        assert_eq!(a, 0x1000_0000);
        assert_eq!(b, 0x1000_1000);
        assert_eq!(mem.len(), 0x1004);
    }

    #[test]
    fn unmapped_reads_are_zero_and_writes_fault() {
        let mut mem = Memory::new(0x100);
        let a = mem.alloc_with(&[1, 2, 3, 4], 4);
        assert_eq!(mem.read_u32(a), 0x0403_0201);
        assert_eq!(mem.read_u32(a + 2), 0);
        assert_eq!(mem.read_u8(0), 0);
        assert!(matches!(
            mem.write(a + 3, &[0, 0]),
            Err(EmulatorError::MemoryFault { len: 2, .. })
        ));
        assert!(mem.write(a + 2, &[9, 9]).is_ok());
        assert_eq!(mem.slice(a, 4), Some(&[1u8, 2, 9, 9][..]));
    }
}
