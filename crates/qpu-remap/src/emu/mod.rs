//! Reference emulator for the subset of the QPU the remap kernel uses.
//!
//! All threads run on the calling host thread in lockstep: each tick retires
//! one instruction on every live thread, in thread order. A thread whose
//! semaphore operation cannot complete stalls in place. A tick on which every
//! live thread is stalled is a deadlock, reported as
//! [`EmulatorError::Deadlock`]. Runs are deterministic, so a trace is a
//! function of the program and the memory image alone.
//!
//! Every cross-thread side effect is appended to a [`trace::Trace`], which
//! [`report::ProtocolReport`] checks after the run.
//!
//! The emulator decodes raw instruction words and rejects forms it does not
//! model with [`EmulatorError::Unsupported`] rather than guessing.

pub mod memory;
pub mod qpu;
pub mod report;
pub mod scene;
pub mod scratch;
pub mod sync;
pub mod texture;
pub mod trace;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EmulatorError;
use crate::kernel::barrier::Semaphore;
use memory::Memory;
use qpu::{Progress, Qpu, System, ThreadSummary};
use scratch::Scratch;
use sync::{op_name, Semaphores, SEMAPHORES};
use trace::{Trace, TraceEvent};

pub use report::ProtocolReport;
pub use scene::{Scene, Yuv420Frame, YuyvFrame};

/// Ticks between wall-clock checks.
const CLOCK_CHECK_TICKS: u64 = 1024;

/// Emulator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorOptions {
    /// Wall-clock budget for the whole run.
    ///
    /// Deadlocks are detected without it; it only bounds runs that keep
    /// making progress for too long.
    pub timeout: Duration,
    /// Instructions one thread may execute.
    pub step_limit: u64,
    /// Semaphore whose decrements mark half-tile epochs in the trace.
    pub epoch_semaphore: u8,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            step_limit: 10_000_000,
            epoch_semaphore: Semaphore::PostSync.id(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct Run {
    /// Main memory after the run.
    pub memory: Memory,
    /// Cross-thread events in global order.
    pub trace: Vec<TraceEvent>,
    /// Per-thread summaries, by thread index.
    pub threads: Vec<ThreadSummary>,
    /// Semaphore counters after the run.
    pub semaphores: [u8; SEMAPHORES],
}

/// Program loaded into the emulator.
#[derive(Debug, Clone)]
pub struct Emulator {
    program: Vec<u64>,
    options: EmulatorOptions,
}

impl Emulator {
    /// Emulator for `program` words.
    #[must_use]
    pub fn new(program: &[u64], options: EmulatorOptions) -> Self {
        Self {
            program: program.to_vec(),
            options,
        }
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> EmulatorOptions {
        self.options
    }

    /// Runs one thread per uniform stream until every thread ends.
    ///
    /// # Errors
    ///
    /// Returns the first error any thread hits, [`EmulatorError::Deadlock`]
    /// when every live thread is stalled on a semaphore, and
    /// [`EmulatorError::Timeout`] when the wall-clock budget runs out.
    pub fn run(&self, memory: Memory, uniform_addrs: &[u32]) -> Result<Run, EmulatorError> {
        let mut sys = System {
            program: &self.program,
            memory,
            scratch: Scratch::new(),
            semaphores: Semaphores::new(),
            trace: Trace::new(),
            options: self.options,
        };
        info!(
            threads = uniform_addrs.len(),
            instructions = self.program.len(),
            "starting emulation"
        );

        let mut qpus: Vec<Qpu> = uniform_addrs
            .iter()
            .enumerate()
            .map(|(id, &addr)| Qpu::new(id, addr))
            .collect();
        let mut ended: Vec<Option<ThreadSummary>> = vec![None; qpus.len()];
        let started = Instant::now();
        let mut ticks: u64 = 0;

        loop {
            let mut live = false;
            let mut progressed = false;
            let mut first_stall = None;
            for (qpu, summary) in qpus.iter_mut().zip(ended.iter_mut()) {
                if summary.is_some() {
                    continue;
                }
                live = true;
                let progress = qpu.tick(&mut sys).map_err(|e| {
                    warn!(error = %e, tick = ticks, "emulation failed");
                    e
                })?;
                match progress {
                    Progress::Ran => progressed = true,
                    Progress::Blocked(stall) => {
                        first_stall.get_or_insert((qpu.id(), stall));
                    }
                    Progress::Ended(done) => {
                        progressed = true;
                        *summary = Some(done);
                    }
                }
            }
            if !live {
                break;
            }
            if let (false, Some((thread, stall))) = (progressed, first_stall) {
                let e = EmulatorError::Deadlock {
                    thread,
                    semaphore: stall.semaphore,
                    op: op_name(stall.op),
                };
                warn!(
                    error = %e,
                    tick = ticks,
                    semaphores = ?sys.semaphores.snapshot(),
                    "emulation deadlocked"
                );
                return Err(e);
            }
            ticks += 1;
            if ticks % CLOCK_CHECK_TICKS == 0 && started.elapsed() > self.options.timeout {
                let e = EmulatorError::Timeout {
                    limit: self.options.timeout,
                    ticks,
                };
                warn!(error = %e, "emulation timed out");
                return Err(e);
            }
        }

        let threads: Vec<ThreadSummary> = ended.into_iter().flatten().collect();
        let steps: u64 = threads.iter().map(|t| t.steps).sum();
        debug!(events = sys.trace.events().len(), steps, ticks, "emulation finished");
        Ok(Run {
            semaphores: sys.semaphores.snapshot(),
            memory: sys.memory,
            trace: sys.trace.into_events(),
            threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Assembler, BranchCond, Dst, Src};
    use crate::emu::trace::EventKind;
    use crate::kernel::barrier::Rendezvous;
    use crate::kernel::plan::Role;

    fn run(asm: Assembler, threads: usize, options: EmulatorOptions) -> Result<Run, EmulatorError> {
        let program = asm.finish().unwrap_or_else(|e| panic!("{e}"));
        let mut memory = Memory::new(0x1_0000);
        let uniforms: Vec<u32> = (0..threads)
            .map(|t| memory.alloc_with(&(t as u32).to_le_bytes(), 4))
            .collect();
        Emulator::new(program.words(), options).run(memory, &uniforms)
    }

    #[test]
    fn threads_end_and_report_steps() {
        let mut asm = Assembler::new();
        asm.mov(Dst::Acc(0), Src::Uniform);
        asm.thread_end();
        let run = run(asm, 3, EmulatorOptions::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(run.threads.len(), 3);
        // mov, thrend and two delay slots
        assert!(run.threads.iter().all(|t| t.steps == 4));
        assert_eq!(run.trace.len(), 3);
    }

    #[test]
    fn unbalanced_down_deadlocks() {
        let mut asm = Assembler::new();
        asm.sema_down(5);
        asm.thread_end();
        assert_eq!(
            run(asm, 2, EmulatorOptions::default()).err(),
            Some(EmulatorError::Deadlock {
                thread: 0,
                semaphore: 5,
                op: "down",
            })
        );
    }

    #[test]
    fn step_limit_stops_spinning_threads() {
        let mut asm = Assembler::new();
        let top = asm.label("spin");
        asm.bind(top);
        asm.branch(BranchCond::Always, top);
        asm.nops(3);
        let options = EmulatorOptions {
            step_limit: 100,
            ..EmulatorOptions::default()
        };
        assert!(matches!(
            run(asm, 1, options),
            Err(EmulatorError::StepLimit { limit: 100, .. })
        ));
    }

    /// `rounds` half-tile rendezvous separated by `work` instructions each.
    fn barrier_rounds(participants: usize, rounds: usize, work: usize) -> Assembler {
        let mut asm = Assembler::new();
        asm.mov(Role::ThreadIndex.dst(), Src::Uniform);
        for _ in 0..rounds {
            asm.nops(work);
            Rendezvous::half_tile(participants).emit(&mut asm);
        }
        asm.thread_end();
        asm
    }

    #[test]
    fn every_thread_takes_exactly_one_release_per_round() {
        let run = run(barrier_rounds(12, 4, 32), 12, EmulatorOptions::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(run.threads.len(), 12);
        assert!(run.threads.iter().all(|t| t.epochs == 4));
        assert_eq!(run.semaphores, [0; SEMAPHORES]);
        for round in 0..4 {
            let releases: Vec<usize> = run
                .trace
                .iter()
                .filter(|e| e.epoch == round && e.kind == EventKind::SemaDown { id: 2 })
                .map(|e| e.thread)
                .collect();
            let mut sorted = releases.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..12).collect::<Vec<_>>(), "round {round}");
        }
    }

    #[test]
    fn runs_are_deterministic() {
        let first = run(barrier_rounds(12, 3, 32), 12, EmulatorOptions::default())
            .unwrap_or_else(|e| panic!("{e}"));
        let second = run(barrier_rounds(12, 3, 32), 12, EmulatorOptions::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.trace, second.trace);
        assert_eq!(first.threads, second.threads);
    }

    #[test]
    fn missing_participant_deadlocks_the_coordinator() {
        assert_eq!(
            run(barrier_rounds(3, 1, 0), 2, EmulatorOptions::default()).err(),
            Some(EmulatorError::Deadlock {
                thread: 0,
                semaphore: 1,
                op: "down",
            })
        );
    }

    #[test]
    fn exhausted_budget_times_out() {
        let mut asm = Assembler::new();
        let top = asm.label("spin");
        asm.bind(top);
        asm.branch(BranchCond::Always, top);
        asm.nops(3);
        let options = EmulatorOptions {
            timeout: Duration::ZERO,
            ..EmulatorOptions::default()
        };
        assert!(matches!(
            run(asm, 1, options),
            Err(EmulatorError::Timeout { ticks: CLOCK_CHECK_TICKS, .. })
        ));
    }
}
