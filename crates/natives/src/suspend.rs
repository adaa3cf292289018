//! Native outcomes and suspend requests.
//!
//! Natives return an [`Outcome`] instead of poking the instance's status
//! directly. At the table boundary the outcome is applied: plain values
//! pass through, suspend requests raise [`ErrorCode::SLEEP`] and return the
//! packed [`SleepCode`], and raw raises set an arbitrary status.

use amxkit_common::sleep::DEFAULT_FORK_LEVEL;
use amxkit_common::{Cell, ErrorCode, SleepCode, SleepKind};
use tracing::trace;

use crate::instance::Instance;
use crate::registry::InstanceContext;

/// What a native hands back to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return normally with this value.
    Value(Cell),
    /// Ask the scheduler to suspend the call.
    Suspend(SleepCode),
    /// Set the instance status to `code` and return `value`.
    Raise { code: ErrorCode, value: Cell },
}

impl Outcome {
    /// Apply to the calling instance and produce the wire return value.
    pub fn apply(self, instance: &mut dyn Instance) -> Cell {
        match self {
            Outcome::Value(value) => value,
            Outcome::Suspend(code) => {
                trace!(instance = instance.name(), kind = ?code.kind(), payload = code.payload(), "suspend");
                instance.raise_error(ErrorCode::SLEEP);
                code.encode()
            }
            Outcome::Raise { code, value } => {
                instance.raise_error(code);
                value
            }
        }
    }

    pub fn is_suspend(&self) -> bool {
        matches!(self, Outcome::Suspend(_))
    }
}

impl From<Cell> for Outcome {
    fn from(value: Cell) -> Self {
        Outcome::Value(value)
    }
}

/// Where the scheduler writes a fork's outcome back in the caller.
///
/// Stored in the forking instance's context before the fork suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkInfo {
    pub result_address: Option<Cell>,
    pub error_address: Option<Cell>,
}

/// Arguments of a fork request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkRequest {
    /// Fork method; only the method bits are kept.
    pub level: Cell,
    pub result_address: Option<Cell>,
    /// Copy the caller's data into the fork.
    pub copy_data: bool,
    pub error_address: Option<Cell>,
}

impl Default for ForkRequest {
    fn default() -> Self {
        Self {
            level: DEFAULT_FORK_LEVEL,
            result_address: None,
            copy_data: true,
            error_address: None,
        }
    }
}

/// Fork the current call. Stashes the output addresses in `context`.
pub fn fork(context: &mut InstanceContext, request: &ForkRequest) -> Outcome {
    *context.get_extra::<ForkInfo>() = ForkInfo {
        result_address: request.result_address,
        error_address: request.error_address,
    };
    Outcome::Suspend(SleepCode::fork(request.level, request.copy_data))
}

/// Commit `value` as the fork's result.
pub fn commit(value: Cell) -> Outcome {
    Outcome::Suspend(SleepCode::new(SleepKind::ForkCommit, value))
}

pub fn fork_end() -> Outcome {
    Outcome::Suspend(SleepCode::bare(SleepKind::ForkEnd))
}

/// Raise an arbitrary status and return `value` in its place.
pub fn raise(code: ErrorCode, value: Cell) -> Outcome {
    Outcome::Raise { code, value }
}

/// Request `size` cells of dynamic storage.
pub fn alloc(size: Cell, zero: bool) -> Outcome {
    Outcome::Suspend(SleepCode::alloc(size, zero))
}

/// Report storage at `address` as released.
pub fn free(address: Cell) -> Outcome {
    Outcome::Suspend(SleepCode::new(SleepKind::FreeVar, address))
}

pub fn parallel_begin(count: Cell) -> Outcome {
    Outcome::Suspend(SleepCode::new(SleepKind::Parallel, count))
}

pub fn parallel_end() -> Outcome {
    Outcome::Suspend(SleepCode::bare(SleepKind::ParallelEnd))
}

pub fn tail_call() -> Outcome {
    Outcome::Suspend(SleepCode::bare(SleepKind::TailCall))
}
