//! Cross-instance calls.
//!
//! A script can call a native or public function by name in another
//! instance, in every instance, or in every instance but itself. The
//! dispatcher picks the targets and resolves the name in each; marshaling
//! the arguments and running the target is the [`Host`]'s job.
//!
//! Only one result register exists, so a broadcast returns whatever the
//! last target in registry order returned.

use amxkit_common::{Cell, ErrorCode, InstanceId};
use tracing::{debug, trace};

use crate::error::NativeError;
use crate::instance::Entry;
use crate::registry::{Registry, SharedInstance};

/// Which instances a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One instance, as the raw cell the script passed.
    Single(Cell),
    /// Every registered instance, the caller included.
    All,
    /// Every registered instance except the caller.
    Others,
}

impl Target {
    /// Script-side selector for [`Target::All`].
    pub const ALL: Cell = -1;
    /// Script-side selector for [`Target::Others`].
    pub const OTHERS: Cell = -2;

    pub fn from_cell(cell: Cell) -> Self {
        match cell {
            Self::ALL => Target::All,
            Self::OTHERS => Target::Others,
            raw => Target::Single(raw),
        }
    }
}

/// Calling convention of the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Native,
    Public,
}

impl CallKind {
    pub fn name(self) -> &'static str {
        match self {
            CallKind::Native => "native",
            CallKind::Public => "public",
        }
    }
}

/// Format-tagged arguments as the caller passed them.
///
/// `values` are raw cells from the caller's frame; by-reference arguments
/// are addresses in the caller's address space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    pub format: String,
    pub values: Vec<Cell>,
}

impl CallArgs {
    pub fn new(format: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            format: format.into(),
            values,
        }
    }
}

/// One resolved call handed to the host.
#[derive(Debug, Clone, Copy)]
pub struct ForeignCall<'a> {
    pub source: InstanceId,
    pub target: InstanceId,
    pub function: &'a str,
    pub entry: Entry,
    pub args: &'a CallArgs,
}

/// Services the natives borrow from the embedding host.
pub trait Host: Send + Sync {
    /// Marshal `call.args` from the source into the target's calling
    /// convention and run the entry. Must cope with `source == target`.
    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Cell, ErrorCode>;

    /// Allocate a script string object and return its id.
    fn create_string(&self, value: &str) -> Cell;
}

/// A cross-instance call request.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub source: InstanceId,
    pub target: Target,
    pub function: &'a str,
    pub kind: CallKind,
    pub args: &'a CallArgs,
}

/// Result of a try-call: status of the last call, and the value of the
/// last call that succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TryOutcome {
    pub status: ErrorCode,
    pub result: Option<Cell>,
}

/// Walks the registry and forwards calls to the host.
pub struct Dispatcher<'a> {
    registry: &'a Registry,
    host: &'a dyn Host,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a Registry, host: &'a dyn Host) -> Self {
        Self { registry, host }
    }

    /// Dispatch and fail on the first target-side error.
    ///
    /// Returns the last result, or 0 if no target was called.
    pub fn call(&self, request: &CallRequest<'_>) -> Result<Cell, NativeError> {
        let outcome = self.run(request, false)?;
        Ok(outcome.result.unwrap_or(0))
    }

    /// Dispatch, converting target-side errors into a status.
    pub fn try_call(&self, request: &CallRequest<'_>) -> TryOutcome {
        // With recovery on, `run` has no failing path.
        self.run(request, true).unwrap_or_default()
    }

    fn run(&self, request: &CallRequest<'_>, recover: bool) -> Result<TryOutcome, NativeError> {
        let mut outcome = TryOutcome::default();
        match request.target {
            Target::Single(raw) => {
                let target = InstanceId::from_cell(raw).filter(|id| self.registry.is_live(*id));
                match target {
                    Some(target) => self.call_one(request, target, recover, &mut outcome)?,
                    None if recover => outcome.status = ErrorCode::NOTFOUND,
                    None => {
                        return Err(NativeError::InvalidPointer {
                            kind: "AMX",
                            value: raw,
                        })
                    }
                }
            }
            Target::All => self
                .registry
                .broadcast(|target| self.call_one(request, target, recover, &mut outcome))?,
            Target::Others => self.registry.broadcast(|target| {
                if target == request.source {
                    return Ok(());
                }
                self.call_one(request, target, recover, &mut outcome)
            })?,
        }
        Ok(outcome)
    }

    fn resolve(instance: &SharedInstance, function: &str, kind: CallKind) -> Option<Entry> {
        let instance = instance.lock();
        match kind {
            CallKind::Native => instance.find_native(function).map(Entry::Native),
            CallKind::Public => instance.find_public(function).map(Entry::Public),
        }
    }

    fn call_one(
        &self,
        request: &CallRequest<'_>,
        target: InstanceId,
        recover: bool,
        outcome: &mut TryOutcome,
    ) -> Result<(), NativeError> {
        let Some(instance) = self.registry.instance(target) else {
            trace!(target = %target, "skipping unloaded target");
            return Ok(());
        };
        let Some(entry) = Self::resolve(&instance, request.function, request.kind) else {
            if recover {
                outcome.status = ErrorCode::NOTFOUND;
                return Ok(());
            }
            return Err(NativeError::FunctionNotFound {
                kind: request.kind.name(),
                name: request.function.to_owned(),
            });
        };
        drop(instance);

        trace!(
            source = %request.source,
            target = %target,
            function = request.function,
            kind = request.kind.name(),
            "cross-instance call"
        );
        let call = ForeignCall {
            source: request.source,
            target,
            function: request.function,
            entry,
            args: request.args,
        };
        match self.host.invoke(&call) {
            Ok(value) => {
                outcome.status = ErrorCode::NONE;
                outcome.result = Some(value);
                Ok(())
            }
            Err(code) if recover => {
                debug!(target = %target, function = request.function, %code, "recovered call failure");
                outcome.status = code;
                Ok(())
            }
            Err(code) => Err(NativeError::CallFailed {
                function: request.function.to_owned(),
                code,
            }),
        }
    }
}
