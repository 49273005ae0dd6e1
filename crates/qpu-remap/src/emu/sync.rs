//! Hardware counting semaphores.
//!
//! Sixteen 4-bit counters shared by all threads. `up` cannot complete while a
//! counter is at 15, `down` while it is at 0. A thread whose operation cannot
//! complete stalls on the same instruction and retries on the next tick.

use crate::asm::SemaOp;
use crate::kernel::barrier::SEMAPHORE_MAX;

/// Number of hardware semaphores.
pub const SEMAPHORES: usize = 16;

/// Semaphore block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Semaphores {
    counts: [u8; SEMAPHORES],
}

impl Semaphores {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counts: [0; SEMAPHORES],
        }
    }

    /// Performs `op` on semaphore `id` if it can complete now.
    ///
    /// Returns `false`, leaving the counter untouched, when the caller must
    /// stall.
    pub fn try_apply(&mut self, id: u8, op: SemaOp) -> bool {
        let count = &mut self.counts[usize::from(id) % SEMAPHORES];
        match op {
            SemaOp::Up if *count < SEMAPHORE_MAX => *count += 1,
            SemaOp::Down if *count > 0 => *count -= 1,
            _ => return false,
        }
        true
    }

    /// Current value of semaphore `id`.
    #[must_use]
    pub const fn get(&self, id: u8) -> u8 {
        self.counts[id as usize % SEMAPHORES]
    }

    /// Current counter values.
    #[must_use]
    pub const fn snapshot(&self) -> [u8; SEMAPHORES] {
        self.counts
    }
}

/// Assembler-style name of a semaphore direction.
#[must_use]
pub const fn op_name(op: SemaOp) -> &'static str {
    match op {
        SemaOp::Up => "up",
        SemaOp::Down => "down",
    }
}
