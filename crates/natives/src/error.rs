//! Fatal native errors.
//!
//! Any of these aborts the current native call. The table boundary raises
//! [`ErrorCode::NATIVE`] on the calling instance so the script sees a
//! runtime fault. Recoverable outcomes (try-calls) and suspend requests are
//! not errors and never appear here.

use amxkit_common::{Cell, ErrorCode};
use thiserror::Error;

/// Errors that abort a native call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    /// An id or instance cell does not name a live object.
    #[error("{kind} reference {value} is invalid")]
    InvalidPointer { kind: &'static str, value: Cell },

    /// A numeric argument is outside its accepted range.
    #[error("argument '{what}' is out of range")]
    OutOfRange { what: &'static str },

    /// A required string argument was empty or unreadable.
    #[error("argument '{arg}' is empty")]
    ArgEmpty { arg: &'static str },

    /// Name lookup for a function failed.
    #[error("{kind} function '{name}' was not found")]
    FunctionNotFound { kind: &'static str, name: String },

    /// Name lookup for a variable failed.
    #[error("{kind} variable '{name}' was not found")]
    VarNotFound { kind: &'static str, name: String },

    /// The operation is not available for this object.
    #[error("operation is not supported on {kind} {value}")]
    OperationNotSupported { kind: &'static str, value: Cell },

    /// An address did not translate into live storage.
    #[error("invalid memory access at address {address:#x}")]
    MemoryAccess { address: Cell },

    /// Element index beyond the reference's fixed size.
    #[error("index {index} out of bounds (size {size})")]
    IndexOutOfBounds { index: Cell, size: Cell },

    /// A non-try cross-instance call failed in the target.
    #[error("call to '{function}' failed with {code}")]
    CallFailed { function: String, code: ErrorCode },

    /// A pool reached its configured capacity.
    #[error("{pool} pool exhausted (capacity {capacity})")]
    PoolExhausted { pool: &'static str, capacity: usize },

    /// The script passed fewer parameters than the native requires.
    #[error("native expects {expected} parameters, got {got}")]
    TooFewParams { expected: usize, got: usize },
}
