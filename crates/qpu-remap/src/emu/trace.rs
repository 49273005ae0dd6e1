//! Ordered record of the side effects that matter for cross-thread checks.

use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Bytes written into one scratch row.
    ScratchWrite {
        /// Row.
        row: usize,
        /// First byte.
        byte: usize,
        /// Bytes written.
        len: usize,
    },
    /// A store to main memory was started (and its source read).
    StoreArmed {
        /// First scratch row.
        vpm_y: usize,
        /// First word within the row.
        x: usize,
        /// Rows transferred.
        rows: usize,
        /// Words per row.
        words: usize,
        /// Destination address.
        addr: u32,
        /// Destination bytes from one row to the next.
        pitch: u32,
    },
    /// The thread waited for the in-flight store.
    StoreWaited,
    /// Semaphore incremented.
    SemaUp {
        /// Semaphore number.
        id: u8,
    },
    /// Semaphore decremented.
    SemaDown {
        /// Semaphore number.
        id: u8,
    },
    /// Host interrupt raised.
    HostInterrupt,
    /// Thread ended.
    ThreadEnd,
}

/// One trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Global order.
    pub seq: usize,
    /// Issuing thread.
    pub thread: usize,
    /// Half-tile epoch of the issuing thread.
    pub epoch: u32,
    /// Event.
    pub kind: EventKind,
}

impl TraceEvent {
    /// Scratch bytes `(row, first, last + 1)` this event reads or writes.
    #[must_use]
    pub fn scratch_spans(&self) -> Vec<(usize, usize, usize)> {
        match self.kind {
            EventKind::ScratchWrite { row, byte, len } => vec![(row, byte, byte + len)],
            EventKind::StoreArmed {
                vpm_y,
                x,
                rows,
                words,
                ..
            } => (vpm_y..vpm_y + rows)
                .map(|r| (r, 4 * x, 4 * (x + words)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Append-only trace.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    /// Empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns its sequence number.
    pub fn record(&mut self, thread: usize, epoch: u32, kind: EventKind) -> usize {
        let seq = self.events.len();
        self.events.push(TraceEvent {
            seq,
            thread,
            epoch,
            kind,
        });
        seq
    }

    /// Consumes the trace.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_follow_insertion() {
        let mut trace = Trace::new();
        assert_eq!(trace.record(0, 0, EventKind::StoreWaited), 0);
        assert_eq!(trace.record(3, 1, EventKind::ThreadEnd), 1);
        let events = trace.into_events();
        assert_eq!(events[1].thread, 3);
        assert_eq!(events[1].epoch, 1);
    }

    #[test]
    fn store_spans_cover_each_row() {
        let ev = TraceEvent {
            seq: 0,
            thread: 0,
            epoch: 2,
            kind: EventKind::StoreArmed {
                vpm_y: 24,
                x: 8,
                rows: 2,
                words: 8,
                addr: 0,
                pitch: 960,
            },
        };
        assert_eq!(ev.scratch_spans(), vec![(24, 32, 64), (25, 32, 64)]);
    }
}
