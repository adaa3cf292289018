//! The native table: script-facing adapters over [`Natives`].
//!
//! Each entry takes the raw parameter cells the interpreter collected,
//! decodes them, and forwards to the typed method. [`Natives::invoke`] is
//! the single boundary where outcomes are applied to the calling instance
//! and fatal errors turn into [`ErrorCode::NATIVE`].

use amxkit_common::{Cell, ErrorCode, InstanceId};
use tracing::warn;

use crate::dispatch::{CallArgs, CallKind, Target};
use crate::error::NativeError;
use crate::natives::Natives;
use crate::suspend::{ForkRequest, Outcome};

/// Adapter signature shared by every native.
pub type NativeFn = fn(&Natives, InstanceId, &[Cell]) -> Result<Outcome, NativeError>;

/// One table entry.
#[derive(Clone, Copy)]
pub struct NativeInfo {
    pub name: &'static str,
    /// Parameters the script must pass. Optional ones are not counted.
    pub min_params: usize,
    pub func: NativeFn,
}

macro_rules! native {
    ($name:ident, $min:expr) => {
        NativeInfo {
            name: stringify!($name),
            min_params: $min,
            func: $name,
        }
    };
}

/// Every native, in declaration order.
pub static NATIVES: &[NativeInfo] = &[
    native!(amx_this, 0),
    native!(amx_handle, 0),
    native!(amx_source, 0),
    native!(amx_source_handle, 0),
    native!(amx_name, 2),
    native!(amx_name_s, 0),
    native!(amx_call_native, 3),
    native!(amx_call_public, 3),
    native!(amx_try_call_native, 4),
    native!(amx_try_call_public, 4),
    native!(amx_num_publics, 0),
    native!(amx_public_index, 1),
    native!(amx_public_name, 3),
    native!(amx_public_name_s, 1),
    // Array-returning natives get the hidden result buffer last.
    native!(amx_encode_public, 2),
    native!(amx_encode_native, 2),
    native!(amx_var, 1),
    native!(amx_var_arr, 2),
    native!(amx_public_var, 1),
    native!(amx_set, 2),
    native!(amx_get, 1),
    native!(amx_valid, 1),
    native!(amx_delete, 1),
    native!(amx_linked, 1),
    native!(amx_inside, 1),
    native!(amx_sizeof, 1),
    native!(amx_my, 1),
    native!(amx_to_ref, 2),
    native!(amx_fork, 0),
    native!(amx_commit, 0),
    native!(amx_fork_end, 0),
    native!(amx_error, 1),
    native!(amx_alloc, 1),
    native!(amx_free, 1),
    native!(amx_parallel_begin, 0),
    native!(amx_parallel_end, 0),
    native!(amx_tailcall, 0),
];

/// Look up a native by name.
pub fn find(name: &str) -> Option<&'static NativeInfo> {
    NATIVES.iter().find(|info| info.name == name)
}

impl Natives {
    /// Run the native `name` for instance `amx`.
    ///
    /// Returns the cell the interpreter should push as the call's result.
    /// Suspend requests and raw raises set the instance status here. A
    /// fatal error raises [`ErrorCode::NATIVE`] and is returned as-is.
    pub fn invoke(&self, amx: InstanceId, name: &str, params: &[Cell]) -> Result<Cell, NativeError> {
        let result = match find(name) {
            Some(info) if params.len() < info.min_params => Err(NativeError::TooFewParams {
                expected: info.min_params,
                got: params.len(),
            }),
            Some(info) => (info.func)(self, amx, params),
            None => Err(NativeError::FunctionNotFound {
                kind: "native",
                name: name.to_owned(),
            }),
        };
        let instance = self.instance(amx)?;
        let mut instance = instance.lock();
        match result {
            Ok(outcome) => Ok(outcome.apply(&mut *instance)),
            Err(err) => {
                warn!(instance = %amx, native = name, error = %err, "native failed");
                instance.raise_error(ErrorCode::NATIVE);
                Err(err)
            }
        }
    }
}

fn optional(params: &[Cell], index: usize, default: Cell) -> Cell {
    params.get(index).copied().unwrap_or(default)
}

fn flag(value: bool) -> Outcome {
    Outcome::Value(value as Cell)
}

/// Address of an optional by-reference parameter. Absent or -1 means none;
/// 0 is a real address.
fn out_param(params: &[Cell], index: usize) -> Option<Cell> {
    params.get(index).copied().filter(|&address| address != -1)
}

fn amx_this(n: &Natives, amx: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.this(amx).into())
}

fn amx_handle(n: &Natives, amx: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.handle(amx)?.into())
}

fn amx_source(n: &Natives, _: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.source().into())
}

fn amx_source_handle(n: &Natives, _: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.source_handle()?.into())
}

fn amx_name(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.name(amx, p[0], p[1])?.into())
}

fn amx_name_s(n: &Natives, amx: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.name_string(amx)?.into())
}

/// `[target, function, format, ...]`
fn call(n: &Natives, amx: InstanceId, p: &[Cell], kind: CallKind) -> Result<Outcome, NativeError> {
    let function = n.read_name(amx, p[1], "function")?;
    let format = n.instance(amx)?.lock().read_string(p[2], n.config().max_name_length);
    let format = format.ok_or(NativeError::MemoryAccess { address: p[2] })?;
    let args = CallArgs::new(format, p[3..].to_vec());
    Ok(n.call(amx, Target::from_cell(p[0]), &function, kind, &args)?.into())
}

/// `[target, function, &result, format, ...]`
fn try_call(n: &Natives, amx: InstanceId, p: &[Cell], kind: CallKind) -> Result<Outcome, NativeError> {
    let function = n.read_name(amx, p[1], "function")?;
    let format = n.instance(amx)?.lock().read_string(p[3], n.config().max_name_length);
    let format = format.ok_or(NativeError::MemoryAccess { address: p[3] })?;
    let args = CallArgs::new(format, p[4..].to_vec());
    let outcome = n.try_call(amx, Target::from_cell(p[0]), &function, kind, &args);
    if let Some(result) = outcome.result {
        n.store(amx, p[2], &[result])?;
    }
    Ok(outcome.status.0.into())
}

fn amx_call_native(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    call(n, amx, p, CallKind::Native)
}

fn amx_call_public(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    call(n, amx, p, CallKind::Public)
}

fn amx_try_call_native(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    try_call(n, amx, p, CallKind::Native)
}

fn amx_try_call_public(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    try_call(n, amx, p, CallKind::Public)
}

fn amx_num_publics(n: &Natives, amx: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.num_publics(amx)?.into())
}

fn amx_public_index(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    let name = n.read_name(amx, p[0], "function")?;
    Ok(n.public_index(amx, &name)?.into())
}

fn amx_public_name(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.public_name(amx, p[0], p[1], p[2])?.into())
}

fn amx_public_name_s(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.public_name_string(amx, p[0])?.into())
}

fn amx_encode_public(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.encode_public(amx, p[0], p[1])?.into())
}

fn amx_encode_native(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    let name = n.read_name(amx, p[0], "function")?;
    Ok(n.encode_native(amx, &name, p[1])?.into())
}

fn amx_var(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.var(amx, p[0])?.into())
}

fn amx_var_arr(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.var_arr(amx, p[0], p[1])?.into())
}

fn amx_public_var(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    let name = n.read_name(amx, p[0], "name")?;
    Ok(n.public_var(amx, &name)?.into())
}

fn amx_set(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.set(p[0], p[1], optional(p, 2, 0))?.into())
}

fn amx_get(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.get(p[0], optional(p, 1, 0))?.into())
}

fn amx_valid(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(flag(n.valid(p[0])))
}

fn amx_delete(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(flag(n.delete(p[0])?))
}

fn amx_linked(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(flag(n.linked(p[0])?))
}

fn amx_inside(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(flag(n.inside(p[0])?))
}

fn amx_sizeof(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.size_of(p[0])?.into())
}

fn amx_my(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(flag(n.my(amx, p[0])?))
}

fn amx_to_ref(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.to_ref(amx, p[0], p[1])?.into())
}

/// `[level = 2, &result, use_data = true, &error]`
fn amx_fork(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    let defaults = ForkRequest::default();
    let request = ForkRequest {
        level: optional(p, 0, defaults.level),
        result_address: out_param(p, 1),
        copy_data: optional(p, 2, defaults.copy_data as Cell) != 0,
        error_address: out_param(p, 3),
    };
    n.fork(amx, &request)
}

fn amx_commit(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.commit(optional(p, 0, 1)))
}

fn amx_fork_end(n: &Natives, _: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.fork_end())
}

fn amx_error(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.error(p[0], optional(p, 1, 0)))
}

fn amx_alloc(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.alloc(p[0], optional(p, 1, 1) != 0))
}

fn amx_free(n: &Natives, amx: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    n.free(amx, p[0])
}

fn amx_parallel_begin(n: &Natives, _: InstanceId, p: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.parallel_begin(optional(p, 0, 1)))
}

fn amx_parallel_end(n: &Natives, _: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.parallel_end())
}

fn amx_tailcall(n: &Natives, _: InstanceId, _: &[Cell]) -> Result<Outcome, NativeError> {
    Ok(n.tail_call())
}
