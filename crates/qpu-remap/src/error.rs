//! Error types for program assembly, map I/O and emulation.

use thiserror::Error;

use crate::asm::{Bank, Label};
use crate::kernel::plan::Role;

/// Errors raised while resolving or encoding an instruction stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// A branch targets a label that was never bound.
    #[error("label {0:?} is referenced but never bound")]
    UnboundLabel(Label),

    /// A label was bound at two positions.
    #[error("label {0:?} is bound more than once")]
    ReboundLabel(Label),

    /// Two operands need different values on the same register-file read port.
    #[error("instruction {index}: read port {port} requested for both {first} and {second}")]
    ReadPortConflict {
        /// Instruction index.
        index: usize,
        /// Port name ("A" or "B").
        port: char,
        /// First requested read address.
        first: u8,
        /// Conflicting read address.
        second: u8,
    },

    /// Add and mul results both need the same register-file write space.
    #[error("instruction {index}: add and mul both write register space {space}")]
    WriteSpaceConflict {
        /// Instruction index.
        index: usize,
        /// Register space ('A' or 'B').
        space: char,
    },

    /// The signal field is needed for two different purposes.
    #[error("instruction {index}: signal field already carries {existing}, cannot also carry {requested}")]
    SignalConflict {
        /// Instruction index.
        index: usize,
        /// Signal already present.
        existing: &'static str,
        /// Signal that could not be added.
        requested: &'static str,
    },

    /// A value cannot be represented in the instruction encoding.
    #[error("instruction {index}: {reason}")]
    Unencodable {
        /// Instruction index.
        index: usize,
        /// Human-readable reason.
        reason: String,
    },
}

/// Violations of the register placement rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Two roles were given the same register.
    #[error("{first:?} and {second:?} share a register")]
    SharedSlot {
        /// Earlier role.
        first: Role,
        /// Later role.
        second: Role,
    },

    /// A role sits in the wrong register file.
    #[error("{role:?} must live in register file {expected:?}")]
    WrongBank {
        /// Offending role.
        role: Role,
        /// Required file.
        expected: Bank,
    },

    /// A slot index beyond the register file.
    #[error("{0:?} is assigned past the end of its register file")]
    SlotOutOfRange(Role),
}

/// Errors raised while building the kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Unsupported thread count.
    #[error("thread count {0} must be even and between 2 and {max}", max = crate::kernel::MAX_THREADS)]
    Threads(usize),

    /// The register plan breaks a placement rule.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The generated sequence could not be assembled.
    #[error(transparent)]
    Asm(#[from] AsmError),
}

/// Errors raised while reading, writing or validating displacement maps.
#[derive(Error, Debug)]
pub enum MapError {
    /// Underlying I/O failure.
    #[error("map I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file ends before the header or entry table is complete.
    #[error("map file truncated: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes present.
        found: usize,
    },

    /// A header field is negative or zero.
    #[error("invalid map header field {field}: {value}")]
    InvalidHeader {
        /// Header field name.
        field: &'static str,
        /// Raw value.
        value: i32,
    },

    /// Map dimensions do not satisfy the kernel tiling preconditions.
    #[error("map {axis} {value} must be a multiple of {multiple} and at most {max}")]
    Dimension {
        /// "width" or "height".
        axis: &'static str,
        /// Offending value.
        value: usize,
        /// Required divisor.
        multiple: usize,
        /// Upper bound.
        max: usize,
    },

    /// A source frame does not match the map it is remapped with.
    #[error("source frame {what} is {found}, map expects {expected}")]
    SourceMismatch {
        /// Mismatching quantity.
        what: &'static str,
        /// Value the map requires.
        expected: usize,
        /// Value found.
        found: usize,
    },

    /// Coordinate fields have the wrong number of samples.
    #[error("coordinate field has {found} samples, expected {expected}")]
    FieldLength {
        /// Samples expected.
        expected: usize,
        /// Samples present.
        found: usize,
    },
}

/// Errors raised by the reference emulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// Every live thread is blocked on a semaphore; `thread` is the lowest.
    #[error("thread {thread} deadlocked waiting on semaphore {semaphore} ({op})")]
    Deadlock {
        /// Waiting thread.
        thread: usize,
        /// Semaphore number.
        semaphore: u8,
        /// "up" or "down".
        op: &'static str,
    },

    /// A fetch was issued while the unit already had one outstanding.
    #[error("thread {thread} issued a second outstanding fetch on unit {unit}")]
    FetchOverrun {
        /// Issuing thread.
        thread: usize,
        /// Fetch unit.
        unit: u8,
    },

    /// A fetch result was awaited with nothing outstanding.
    #[error("thread {thread} waited on unit {unit} with no outstanding fetch")]
    FetchUnderflow {
        /// Waiting thread.
        thread: usize,
        /// Fetch unit.
        unit: u8,
    },

    /// A fetch was issued before unit aliasing was disabled.
    #[error("thread {thread} used the texture units with unit swapping still enabled")]
    TmuAliasing {
        /// Offending thread.
        thread: usize,
    },

    /// A store was started while another one was still in flight.
    #[error("thread {thread} started a store while another transfer was in flight")]
    TransferOverlap {
        /// Offending thread.
        thread: usize,
    },

    /// Scratch memory access outside its rows.
    #[error("thread {thread} accessed scratch row {row} outside the buffer")]
    ScratchFault {
        /// Offending thread.
        thread: usize,
        /// Row index.
        row: usize,
    },

    /// Store to main memory outside the allocated range.
    #[error("store to address {address:#010x} (+{len}) is outside memory")]
    MemoryFault {
        /// Start address.
        address: u32,
        /// Length in bytes.
        len: usize,
    },

    /// The program counter left the program.
    #[error("thread {thread} ran past the end of the program at {pc}")]
    PcOutOfRange {
        /// Offending thread.
        thread: usize,
        /// Program counter.
        pc: usize,
    },

    /// The thread did not end within the step budget.
    #[error("thread {thread} exceeded the step limit of {limit}")]
    StepLimit {
        /// Offending thread.
        thread: usize,
        /// Configured limit.
        limit: u64,
    },

    /// An instruction form the emulator does not model.
    #[error("thread {thread}: unsupported {what}")]
    Unsupported {
        /// Offending thread.
        thread: usize,
        /// Description.
        what: String,
    },

    /// The run outlasted its wall-clock budget.
    #[error("emulation exceeded its {limit:?} budget after {ticks} ticks")]
    Timeout {
        /// Configured budget.
        limit: std::time::Duration,
        /// Lockstep ticks completed.
        ticks: u64,
    },
}
