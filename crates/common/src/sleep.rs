//! Packed sleep/return codes.
//!
//! A native that wants the current call suspended raises
//! [`ErrorCode::SLEEP`](crate::ErrorCode::SLEEP) on its instance and returns
//! one of these codes. The scheduler reads the tag in the top byte to decide
//! what to do, and the low 24 bits as the request's argument.

use crate::cell::{Cell, UCell};

/// Bits selecting the request kind.
pub const SLEEP_TYPE_MASK: UCell = 0xFF00_0000;

/// Bits carrying the payload.
pub const SLEEP_VALUE_MASK: UCell = 0x00FF_FFFF;

/// Fork payload bits selecting the fork method (`fork_level`).
pub const FORK_METHOD_MASK: Cell = 0x0F;

/// Fork payload bit asking the scheduler to copy the caller's data segment.
pub const FORK_COPY_DATA: Cell = 0x10;

/// Fork method used when the script passes none.
pub const DEFAULT_FORK_LEVEL: Cell = 2;

/// The kind of suspend request carried by a [`SleepCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepKind {
    /// Branch the current call; payload is method flags.
    Fork,
    /// Hand a value back as the fork's result.
    ForkCommit,
    /// Terminate the current fork.
    ForkEnd,
    /// Allocate dynamic storage; payload is the size in cells.
    AllocVar,
    /// Allocate zero-initialized dynamic storage.
    AllocVarZero,
    /// Release dynamic storage; payload is its address.
    FreeVar,
    /// Start parallel execution; payload is the branch count.
    Parallel,
    /// Leave parallel execution.
    ParallelEnd,
    /// Replace the current frame with the next call.
    TailCall,
}

/// All sleep kinds, in tag order.
pub const ALL_SLEEP_KINDS: [SleepKind; 9] = [
    SleepKind::Fork,
    SleepKind::ForkCommit,
    SleepKind::ForkEnd,
    SleepKind::AllocVar,
    SleepKind::AllocVarZero,
    SleepKind::FreeVar,
    SleepKind::Parallel,
    SleepKind::ParallelEnd,
    SleepKind::TailCall,
];

impl SleepKind {
    /// The tag bits for this kind.
    pub const fn tag(self) -> UCell {
        match self {
            SleepKind::Fork => 0x8A00_0000,
            SleepKind::ForkCommit => 0x8B00_0000,
            SleepKind::ForkEnd => 0x8C00_0000,
            SleepKind::AllocVar => 0x8D00_0000,
            SleepKind::AllocVarZero => 0x8E00_0000,
            SleepKind::FreeVar => 0x8F00_0000,
            SleepKind::Parallel => 0x9000_0000,
            SleepKind::ParallelEnd => 0x9100_0000,
            SleepKind::TailCall => 0x9200_0000,
        }
    }

    /// Look up the kind for a tag byte (already masked).
    pub fn from_tag(tag: UCell) -> Option<Self> {
        ALL_SLEEP_KINDS.iter().copied().find(|k| k.tag() == tag)
    }

    /// Whether requests of this kind carry a payload.
    pub const fn has_payload(self) -> bool {
        !matches!(
            self,
            SleepKind::ForkEnd | SleepKind::ParallelEnd | SleepKind::TailCall
        )
    }
}

/// A decoded suspend request: kind plus masked payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SleepCode {
    kind: SleepKind,
    payload: UCell,
}

impl SleepCode {
    /// Build a request. The payload is masked to [`SLEEP_VALUE_MASK`] and
    /// dropped entirely for kinds that carry none.
    pub const fn new(kind: SleepKind, payload: Cell) -> Self {
        let payload = if kind.has_payload() {
            payload as UCell & SLEEP_VALUE_MASK
        } else {
            0
        };
        Self { kind, payload }
    }

    /// A request with no payload.
    pub const fn bare(kind: SleepKind) -> Self {
        Self { kind, payload: 0 }
    }

    /// Fork request. `level` is masked to the method bits.
    pub const fn fork(level: Cell, copy_data: bool) -> Self {
        let mut flags = level & FORK_METHOD_MASK;
        if copy_data {
            flags |= FORK_COPY_DATA;
        }
        Self::new(SleepKind::Fork, flags)
    }

    /// Allocation request, zeroed or not.
    pub const fn alloc(size: Cell, zero: bool) -> Self {
        let kind = if zero {
            SleepKind::AllocVarZero
        } else {
            SleepKind::AllocVar
        };
        Self::new(kind, size)
    }

    pub const fn kind(self) -> SleepKind {
        self.kind
    }

    /// Payload as stored (always within `0..=0x00FF_FFFF`).
    pub const fn payload(self) -> Cell {
        self.payload as Cell
    }

    /// Payload sign-extended from 24 bits, for values such as commit
    /// results that may have been negative.
    pub const fn signed_payload(self) -> Cell {
        ((self.payload << 8) as Cell) >> 8
    }

    /// Pack into the wire cell.
    pub const fn encode(self) -> Cell {
        (self.kind.tag() | self.payload) as Cell
    }

    /// Unpack a wire cell. Returns `None` for cells that are not sleep
    /// codes, or for payload-less kinds with stray payload bits.
    pub fn decode(cell: Cell) -> Option<Self> {
        let bits = cell as UCell;
        let kind = SleepKind::from_tag(bits & SLEEP_TYPE_MASK)?;
        let payload = bits & SLEEP_VALUE_MASK;
        if !kind.has_payload() && payload != 0 {
            return None;
        }
        Some(Self { kind, payload })
    }
}
