//! Cross-thread protocol checks over a run's trace.
//!
//! Each check produces one [`CheckResult`]; a [`ProtocolReport`] aggregates
//! them. Checks only look at the trace, the final semaphore counters and the
//! launch geometry, never at pixel values.

use serde::{Deserialize, Serialize};

use crate::emu::trace::{EventKind, TraceEvent};
use crate::emu::Run;
use crate::kernel::barrier::Semaphore;
use crate::launch::LaunchConfig;

/// Planes stored per half-tile.
const STORES_PER_HALF_TILE: usize = 3;

/// Outcome level of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// The check passed.
    Pass,
    /// Suspicious but not a protocol violation.
    Warning,
    /// The protocol was violated.
    Failure,
}

/// One check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Short identifier of the check.
    pub check: String,
    /// Human-readable outcome.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Offending events or bytes, if any.
    pub details: Vec<String>,
}

impl CheckResult {
    /// Passing result.
    pub fn pass(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, message, Severity::Pass, Vec::new())
    }

    /// Failing result.
    pub fn fail(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, message, Severity::Failure, Vec::new())
    }

    /// Failing result with detail lines.
    pub fn fail_with_details(
        check: impl Into<String>,
        message: impl Into<String>,
        details: Vec<String>,
    ) -> Self {
        Self::new(check, message, Severity::Failure, details)
    }

    /// Warning.
    pub fn warn(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, message, Severity::Warning, Vec::new())
    }

    fn new(
        check: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        details: Vec<String>,
    ) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
            severity,
            details,
        }
    }

    /// True for failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.severity == Severity::Failure
    }
}

/// Aggregated check results for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolReport {
    /// All results, in check order.
    pub results: Vec<CheckResult>,
}

impl ProtocolReport {
    /// Empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every check against `run`, launched with `launch`.
    #[must_use]
    pub fn analyze(run: &Run, launch: &LaunchConfig) -> Self {
        let mut report = Self::new();
        report.push(check_join_balance(run));
        report.push(check_double_buffering(&run.trace));
        report.push(check_store_count(&run.trace, launch));
        report.push(check_host_interrupt(&run.trace));
        report.push(check_coverage(&run.trace, launch));
        report.push(check_epochs(run, launch));
        report
    }

    /// Appends a result.
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    /// Appends the results of another report.
    pub fn extend(&mut self, other: Self) {
        self.results.extend(other.results);
    }

    /// Number of failed checks.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    /// True when no check failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failure_count() == 0
    }

    /// Result of the named check.
    #[must_use]
    pub fn get(&self, check: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check == check)
    }
}

fn main_stores(trace: &[TraceEvent]) -> impl Iterator<Item = &TraceEvent> {
    trace
        .iter()
        .filter(|e| e.epoch >= 1 && matches!(e.kind, EventKind::StoreArmed { .. }))
}

/// Every up is matched by a down and all counters end at zero.
fn check_join_balance(run: &Run) -> CheckResult {
    let mut ups = [0usize; 16];
    let mut downs = [0usize; 16];
    for e in &run.trace {
        match e.kind {
            EventKind::SemaUp { id } => ups[usize::from(id) % 16] += 1,
            EventKind::SemaDown { id } => downs[usize::from(id) % 16] += 1,
            _ => {}
        }
    }
    let details: Vec<String> = (0..16)
        .filter(|&i| ups[i] != downs[i] || run.semaphores[i] != 0)
        .map(|i| {
            format!(
                "semaphore {i}: {} up, {} down, final {}",
                ups[i], downs[i], run.semaphores[i]
            )
        })
        .collect();
    if details.is_empty() {
        CheckResult::pass("join-balance", "semaphore traffic balanced")
    } else {
        CheckResult::fail_with_details("join-balance", "unbalanced semaphores", details)
    }
}

/// Scratch bytes a store reads were written in the previous epoch, before it
/// was armed, and not overwritten until after.
fn check_double_buffering(trace: &[TraceEvent]) -> CheckResult {
    let writes: Vec<(&TraceEvent, (usize, usize, usize))> = trace
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ScratchWrite { .. }))
        .flat_map(|e| e.scratch_spans().into_iter().map(move |s| (e, s)))
        .collect();
    let overlaps = |a: (usize, usize, usize), b: (usize, usize, usize)| {
        a.0 == b.0 && a.1 < b.2 && b.1 < a.2
    };

    let mut details = Vec::new();
    for store in main_stores(trace) {
        let h = store.epoch;
        for span in store.scratch_spans() {
            for &(w, ws) in writes.iter().filter(|(_, ws)| overlaps(*ws, span)) {
                let problem = if w.epoch == h {
                    Some("written in the epoch that stores it")
                } else if w.epoch + 1 == h && w.seq > store.seq {
                    Some("filled after the store was armed")
                } else if w.epoch > h && w.seq < store.seq {
                    Some("overwritten before the store was armed")
                } else {
                    None
                };
                if let Some(problem) = problem {
                    details.push(format!(
                        "store #{} (epoch {h}) row {} bytes {}..{}: thread {} write #{} (epoch {}) {problem}",
                        store.seq, ws.0, ws.1, ws.2, w.thread, w.seq, w.epoch
                    ));
                }
            }
        }
    }
    if details.is_empty() {
        CheckResult::pass("double-buffering", "every store read a settled slot")
    } else {
        CheckResult::fail_with_details(
            "double-buffering",
            format!("{} scratch hazards", details.len()),
            details,
        )
    }
}

/// Three stores per half-tile after priming.
fn check_store_count(trace: &[TraceEvent], launch: &LaunchConfig) -> CheckResult {
    let expected = STORES_PER_HALF_TILE * 2 * launch.tile_cols() as usize * launch.tile_rows() as usize;
    let found = main_stores(trace).count();
    if found == expected {
        CheckResult::pass("store-count", format!("{found} stores"))
    } else {
        CheckResult::fail(
            "store-count",
            format!("expected {expected} stores after priming, found {found}"),
        )
    }
}

/// One host interrupt, raised after every completion report.
fn check_host_interrupt(trace: &[TraceEvent]) -> CheckResult {
    let interrupts: Vec<&TraceEvent> = trace
        .iter()
        .filter(|e| e.kind == EventKind::HostInterrupt)
        .collect();
    let [irq] = interrupts.as_slice() else {
        return CheckResult::fail(
            "host-interrupt",
            format!("expected one host interrupt, found {}", interrupts.len()),
        );
    };
    let completed = Semaphore::Completed.id();
    let late = trace
        .iter()
        .filter(|e| e.kind == EventKind::SemaUp { id: completed } && e.seq > irq.seq)
        .count();
    if late > 0 {
        return CheckResult::fail(
            "host-interrupt",
            format!("{late} completion reports arrived after the interrupt"),
        );
    }
    CheckResult::pass("host-interrupt", format!("raised by thread {}", irq.thread))
}

/// Stores after priming write every frame byte exactly once.
fn check_coverage(trace: &[TraceEvent], launch: &LaunchConfig) -> CheckResult {
    let base = u64::from(launch.frame_base);
    let len = launch.frame_bytes();
    let mut hits = vec![0u16; len];
    let mut outside = 0usize;
    for e in main_stores(trace) {
        let EventKind::StoreArmed {
            rows,
            words,
            addr,
            pitch,
            ..
        } = e.kind
        else {
            continue;
        };
        for r in 0..rows as u64 {
            let start = u64::from(addr) + r * u64::from(pitch);
            for a in start..start + 4 * words as u64 {
                match a.checked_sub(base).map(|o| o as usize).filter(|&o| o < len) {
                    Some(o) => hits[o] = hits[o].saturating_add(1),
                    None => outside += 1,
                }
            }
        }
    }
    let missed = hits.iter().filter(|&&h| h == 0).count();
    let repeated = hits.iter().filter(|&&h| h > 1).count();
    if missed == 0 && repeated == 0 && outside == 0 {
        return CheckResult::pass("coverage", format!("{len} bytes stored once"));
    }
    let mut details = Vec::new();
    if let Some(first) = hits.iter().position(|&h| h == 0) {
        details.push(format!("first unwritten byte at offset {first}"));
    }
    if let Some(first) = hits.iter().position(|&h| h > 1) {
        details.push(format!("first repeated byte at offset {first}"));
    }
    CheckResult::fail_with_details(
        "coverage",
        format!("{missed} bytes missed, {repeated} written twice, {outside} outside the frame"),
        details,
    )
}

/// Every thread passed one barrier per half-tile plus the priming one.
fn check_epochs(run: &Run, launch: &LaunchConfig) -> CheckResult {
    let expected = 1 + 2 * launch.tile_cols() * launch.tile_rows();
    let details: Vec<String> = run
        .threads
        .iter()
        .filter(|t| t.epochs != expected)
        .map(|t| format!("thread {}: {} barriers", t.thread, t.epochs))
        .collect();
    if run.threads.len() != launch.threads {
        return CheckResult::warn(
            "epochs",
            format!(
                "{} threads ran for a {}-thread launch",
                run.threads.len(),
                launch.threads
            ),
        );
    }
    if details.is_empty() {
        CheckResult::pass("epochs", format!("{expected} barriers per thread"))
    } else {
        CheckResult::fail_with_details(
            "epochs",
            format!("expected {expected} barriers per thread"),
            details,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::memory::Memory;
    use crate::emu::qpu::ThreadSummary;
    use crate::launch::TextureConfig;

    fn event(seq: usize, thread: usize, epoch: u32, kind: EventKind) -> TraceEvent {
        TraceEvent {
            seq,
            thread,
            epoch,
            kind,
        }
    }

    fn store(seq: usize, epoch: u32, addr: u32) -> TraceEvent {
        event(
            seq,
            0,
            epoch,
            EventKind::StoreArmed {
                vpm_y: 0,
                x: 0,
                rows: 1,
                words: 4,
                addr,
                pitch: 16,
            },
        )
    }

    fn write(seq: usize, thread: usize, epoch: u32) -> TraceEvent {
        event(
            seq,
            thread,
            epoch,
            EventKind::ScratchWrite {
                row: 0,
                byte: 0,
                len: 16,
            },
        )
    }

    #[test]
    fn settled_slot_passes() {
        let trace = [write(0, 1, 0), store(1, 1, 0), write(2, 1, 2)];
        assert!(!check_double_buffering(&trace).is_failure());
    }

    #[test]
    fn same_epoch_write_fails() {
        let trace = [write(0, 1, 0), store(1, 1, 0), write(2, 3, 1)];
        let result = check_double_buffering(&trace);
        assert!(result.is_failure());
        assert_eq!(result.details.len(), 1);
    }

    #[test]
    fn late_fill_and_early_overwrite_fail() {
        let late = [store(0, 1, 0), write(1, 1, 0)];
        assert!(check_double_buffering(&late).is_failure());
        let early = [write(0, 2, 2), store(1, 1, 0)];
        assert!(check_double_buffering(&early).is_failure());
    }

    #[test]
    fn priming_stores_are_not_checked() {
        let trace = [write(0, 0, 0), store(1, 0, 0)];
        assert!(!check_double_buffering(&trace).is_failure());
    }

    fn launch(width: u32, height: u32) -> LaunchConfig {
        LaunchConfig {
            threads: 2,
            texture: TextureConfig::yuyv(0, 256, 2),
            map_base: 0,
            frame_base: 0x1000,
            width,
            height,
        }
    }

    #[test]
    fn coverage_reports_gaps_and_repeats() {
        // 8x1 frame: 12 bytes, stored as three 4-byte rows
        let cfg = launch(8, 1);
        let row = |seq, addr| {
            event(
                seq,
                0,
                1,
                EventKind::StoreArmed {
                    vpm_y: 0,
                    x: 0,
                    rows: 3,
                    words: 1,
                    addr,
                    pitch: 4,
                },
            )
        };
        assert!(!check_coverage(&[row(0, 0x1000)], &cfg).is_failure());
        assert!(check_coverage(&[row(0, 0x1000), row(1, 0x1000)], &cfg).is_failure());
        assert!(check_coverage(&[row(0, 0x1004)], &cfg).is_failure());
    }

    #[test]
    fn join_balance_and_interrupt() {
        let trace = vec![
            event(0, 1, 3, EventKind::SemaUp { id: 0 }),
            event(1, 0, 3, EventKind::SemaUp { id: 0 }),
            event(2, 0, 3, EventKind::SemaDown { id: 0 }),
            event(3, 0, 3, EventKind::SemaDown { id: 0 }),
            event(4, 0, 3, EventKind::HostInterrupt),
        ];
        let summary = |thread| ThreadSummary {
            thread,
            steps: 10,
            stalls: 2,
            epochs: 3,
        };
        let run = Run {
            memory: Memory::new(0),
            trace,
            threads: vec![summary(0), summary(1)],
            semaphores: [0; 16],
        };
        assert!(!check_join_balance(&run).is_failure());
        assert!(!check_host_interrupt(&run.trace).is_failure());
        assert!(!check_epochs(&run, &launch(128, 2)).is_failure());
        assert!(check_epochs(&run, &launch(256, 2)).is_failure());

        let mut unbalanced = run.clone();
        unbalanced.trace.truncate(3);
        assert!(check_join_balance(&unbalanced).is_failure());
        assert!(check_host_interrupt(&unbalanced.trace).is_failure());
    }
}
