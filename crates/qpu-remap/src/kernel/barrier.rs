//! Cross-thread synchronization built on the hardware counting semaphores.
//!
//! Two shapes are used:
//!
//! - [`Rendezvous`]: every thread arrives, the coordinator collects all
//!   arrivals and then releases everyone. Emitted at the end of every
//!   half-tile so that no thread starts writing the next half-tile's scratch
//!   slot before the coordinator has armed the stores reading it.
//! - [`Join`]: every thread reports completion; the coordinator collects all
//!   reports and raises the host interrupt.
//!
//! Semaphores count 0..=15; up blocks at 15 and down blocks at 0. Both shapes
//! keep every counter within `0..=participants`.

use serde::{Deserialize, Serialize};

use crate::asm::{Assembler, Dst, SmallImm, Src};
use crate::kernel::plan::Role;

/// Semaphore assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Semaphore {
    /// Thread finished its last store.
    Completed,
    /// Thread reached the end of a half-tile.
    PreSync,
    /// Coordinator released the half-tile.
    PostSync,
}

impl Semaphore {
    /// Hardware semaphore number.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::PreSync => 1,
            Self::PostSync => 2,
        }
    }
}

/// Highest value a hardware semaphore can hold.
pub const SEMAPHORE_MAX: u8 = 15;

/// Reusable all-threads rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendezvous {
    /// Threads taking part.
    pub participants: usize,
    /// Raised by each arriving thread.
    pub arrive: Semaphore,
    /// Raised by the coordinator once per participant.
    pub release: Semaphore,
}

impl Rendezvous {
    /// The half-tile barrier.
    #[must_use]
    pub const fn half_tile(participants: usize) -> Self {
        Self {
            participants,
            arrive: Semaphore::PreSync,
            release: Semaphore::PostSync,
        }
    }

    /// Emits the rendezvous.
    pub fn emit(&self, asm: &mut Assembler) {
        let (arrive, release, n) = (self.arrive.id(), self.release.id(), self.participants);
        asm.sema_up(arrive);
        asm.coordinator_only(Role::ThreadIndex.src(), |asm| {
            for _ in 0..n {
                asm.sema_down(arrive);
            }
            for _ in 0..n {
                asm.sema_up(release);
            }
        });
        asm.sema_down(release);
    }
}

/// Completion join ending in a host interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Threads taking part.
    pub participants: usize,
    /// Raised by each finishing thread.
    pub semaphore: Semaphore,
}

impl Join {
    /// The end-of-frame join.
    #[must_use]
    pub const fn completion(participants: usize) -> Self {
        Self {
            participants,
            semaphore: Semaphore::Completed,
        }
    }

    /// Emits the join.
    pub fn emit(&self, asm: &mut Assembler) {
        let (id, n) = (self.semaphore.id(), self.participants);
        asm.sema_up(id);
        asm.coordinator_only(Role::ThreadIndex.src(), |asm| {
            for _ in 0..n {
                asm.sema_down(id);
            }
            asm.mov(Dst::HostInt, Src::Imm(HOST_INT_VALUE));
        });
    }
}

const HOST_INT_VALUE: SmallImm = SmallImm::int_const(1);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Instr, SemaOp};

    fn sema_ops(asm: Assembler) -> Vec<(u8, SemaOp)> {
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        program
            .instructions()
            .iter()
            .filter_map(|i| match *i {
                Instr::Sema { id, op } => Some((id, op)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rendezvous_balances_per_thread_counts() {
        let mut asm = Assembler::new();
        Rendezvous::half_tile(12).emit(&mut asm);
        let ops = sema_ops(asm);
        let count = |id: u8, op: SemaOp| ops.iter().filter(|&&x| x == (id, op)).count();
        // one arrival per thread, N collections by the coordinator
        assert_eq!(count(1, SemaOp::Up), 1);
        assert_eq!(count(1, SemaOp::Down), 12);
        assert_eq!(count(2, SemaOp::Up), 12);
        assert_eq!(count(2, SemaOp::Down), 1);
        assert_eq!(ops.first(), Some(&(1, SemaOp::Up)));
        assert_eq!(ops.last(), Some(&(2, SemaOp::Down)));
    }

    #[test]
    fn join_collects_every_thread() {
        let mut asm = Assembler::new();
        Join::completion(8).emit(&mut asm);
        let ops = sema_ops(asm);
        assert_eq!(ops.len(), 9);
        assert!(ops[1..].iter().all(|&x| x == (0, SemaOp::Down)));
    }

    #[test]
    fn host_interrupt_raises_integer_one() {
        assert_eq!(SmallImm::value_of(HOST_INT_VALUE.code()), Some(1));
    }

    #[test]
    fn participants_fit_the_counter() {
        assert!(crate::kernel::MAX_THREADS <= usize::from(SEMAPHORE_MAX));
    }
}
