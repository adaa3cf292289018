//! Native entry points.
//!
//! [`Natives`] holds the shared state (registry, pools, host) and exposes
//! one typed method per script native. The raw-parameter adapters that
//! scripts actually call live in [`table`](crate::table).

use std::sync::Arc;

use amxkit_common::{address, Cell, ErrorCode, InstanceId};

use crate::config::HostConfig;
use crate::dispatch::{CallArgs, CallKind, CallRequest, Dispatcher, Host, Target, TryOutcome};
use crate::error::NativeError;
use crate::handle::{HandlePool, TaggedValue};
use crate::registry::{Registry, SharedInstance};
use crate::source;
use crate::suspend::{self, ForkRequest, Outcome};
use crate::var::{VarPool, VarRef};

/// The native set bound to one registry and host.
pub struct Natives {
    registry: Arc<Registry>,
    vars: Arc<VarPool>,
    handles: Arc<HandlePool>,
    host: Arc<dyn Host>,
    config: HostConfig,
}

impl Natives {
    pub fn new(registry: Arc<Registry>, host: Arc<dyn Host>) -> Self {
        Self::with_config(registry, host, HostConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, host: Arc<dyn Host>, config: HostConfig) -> Self {
        let vars = VarPool::new(Arc::clone(&registry), config.max_vars);
        let handles = HandlePool::attached(&registry, config.max_handles);
        Self {
            registry,
            vars,
            handles,
            host,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn vars(&self) -> &VarPool {
        &self.vars
    }

    pub fn handles(&self) -> &HandlePool {
        &self.handles
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub(crate) fn instance(&self, amx: InstanceId) -> Result<SharedInstance, NativeError> {
        self.registry
            .instance(amx)
            .ok_or(NativeError::InvalidPointer {
                kind: "AMX",
                value: amx.to_cell(),
            })
    }

    fn var_ref(&self, var: Cell) -> Result<VarRef, NativeError> {
        self.vars.resolve(var).ok_or(NativeError::InvalidPointer {
            kind: "AMX variable",
            value: var,
        })
    }

    /// Read a string argument from script memory. Empty strings are
    /// rejected as `arg`.
    pub(crate) fn read_name(
        &self,
        amx: InstanceId,
        address: Cell,
        arg: &'static str,
    ) -> Result<String, NativeError> {
        let instance = self.instance(amx)?;
        let name = instance
            .lock()
            .read_string(address, self.config.max_name_length)
            .ok_or(NativeError::MemoryAccess { address })?;
        if name.is_empty() {
            return Err(NativeError::ArgEmpty { arg });
        }
        Ok(name)
    }

    /// Write cells into script memory at `dest`.
    pub(crate) fn store(
        &self,
        amx: InstanceId,
        dest: Cell,
        values: &[Cell],
    ) -> Result<(), NativeError> {
        let instance = self.instance(amx)?;
        let mut instance = instance.lock();
        if instance.translate(dest, values.len() as Cell).is_none() {
            return Err(NativeError::MemoryAccess { address: dest });
        }
        for (address, value) in (dest..).step_by(4).zip(values) {
            instance
                .set_cell(address, *value)
                .ok_or(NativeError::MemoryAccess { address })?;
        }
        Ok(())
    }

    // ---- Identity ----

    /// `amx_this`: the calling instance.
    pub fn this(&self, amx: InstanceId) -> Cell {
        amx.to_cell()
    }

    /// `amx_handle`: a new handle wrapping the calling instance.
    pub fn handle(&self, amx: InstanceId) -> Result<Cell, NativeError> {
        self.handles.emplace(TaggedValue::amx(amx), amx, true)
    }

    /// `amx_source`: the instance that started the current dispatch, or 0.
    pub fn source(&self) -> Cell {
        source::current().map_or(0, InstanceId::to_cell)
    }

    /// `amx_source_handle`: a handle wrapping the source, or 0.
    pub fn source_handle(&self) -> Result<Cell, NativeError> {
        match source::current() {
            Some(src) => self.handles.emplace(TaggedValue::amx(src), src, true),
            None => Ok(0),
        }
    }

    /// `amx_name`: copy the instance name into a `size`-cell buffer and
    /// return the full name length in bytes.
    pub fn name(&self, amx: InstanceId, buffer: Cell, size: Cell) -> Result<Cell, NativeError> {
        let instance = self.instance(amx)?;
        let mut instance = instance.lock();
        let name = instance.name().to_owned();
        instance
            .write_string(buffer, &name, size)
            .ok_or(NativeError::MemoryAccess { address: buffer })?;
        Ok(name.len() as Cell)
    }

    /// `amx_name_s`: the instance name as a string object.
    pub fn name_string(&self, amx: InstanceId) -> Result<Cell, NativeError> {
        let name = self.instance(amx)?.lock().name().to_owned();
        Ok(self.host.create_string(&name))
    }

    // ---- Cross-instance calls ----

    /// `amx_call_native` / `amx_call_public`.
    pub fn call(
        &self,
        amx: InstanceId,
        target: Target,
        function: &str,
        kind: CallKind,
        args: &CallArgs,
    ) -> Result<Cell, NativeError> {
        let request = CallRequest {
            source: amx,
            target,
            function,
            kind,
            args,
        };
        Dispatcher::new(&self.registry, self.host.as_ref()).call(&request)
    }

    /// `amx_try_call_native` / `amx_try_call_public`.
    pub fn try_call(
        &self,
        amx: InstanceId,
        target: Target,
        function: &str,
        kind: CallKind,
        args: &CallArgs,
    ) -> TryOutcome {
        let request = CallRequest {
            source: amx,
            target,
            function,
            kind,
            args,
        };
        Dispatcher::new(&self.registry, self.host.as_ref()).try_call(&request)
    }

    // ---- Public functions ----

    pub fn num_publics(&self, amx: InstanceId) -> Result<Cell, NativeError> {
        Ok(self.instance(amx)?.lock().num_publics() as Cell)
    }

    /// `amx_public_index`: index of a public, or -1.
    pub fn public_index(&self, amx: InstanceId, name: &str) -> Result<Cell, NativeError> {
        if name.is_empty() {
            return Err(NativeError::ArgEmpty { arg: "function" });
        }
        let index = self.instance(amx)?.lock().find_public(name);
        Ok(index.map_or(-1, |i| i as Cell))
    }

    fn public_name_of(&self, amx: InstanceId, index: Cell) -> Result<String, NativeError> {
        let instance = self.instance(amx)?;
        let instance = instance.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| instance.public_name(i))
            .map(str::to_owned)
            .ok_or(NativeError::OutOfRange { what: "index" })
    }

    /// `amx_public_name`: copy a public's name into a buffer and return
    /// its length in bytes.
    pub fn public_name(
        &self,
        amx: InstanceId,
        index: Cell,
        buffer: Cell,
        size: Cell,
    ) -> Result<Cell, NativeError> {
        let name = self.public_name_of(amx, index)?;
        self.instance(amx)?
            .lock()
            .write_string(buffer, &name, size)
            .ok_or(NativeError::MemoryAccess { address: buffer })?;
        Ok(name.len() as Cell)
    }

    pub fn public_name_string(&self, amx: InstanceId, index: Cell) -> Result<Cell, NativeError> {
        let name = self.public_name_of(amx, index)?;
        Ok(self.host.create_string(&name))
    }

    /// `amx_encode_public`: write the one-cell token for `index` to `dest`.
    pub fn encode_public(&self, amx: InstanceId, index: Cell, dest: Cell) -> Result<Cell, NativeError> {
        let token =
            address::encode_public(index).map_err(|_| NativeError::OutOfRange { what: "index" })?;
        self.store(amx, dest, &[token])?;
        Ok(1)
    }

    /// `amx_encode_native`: write the two-cell token for a native
    /// registered with the calling instance to `dest`.
    pub fn encode_native(&self, amx: InstanceId, name: &str, dest: Cell) -> Result<Cell, NativeError> {
        if name.is_empty() {
            return Err(NativeError::ArgEmpty { arg: "function" });
        }
        let native = self
            .instance(amx)?
            .lock()
            .find_native(name)
            .ok_or_else(|| NativeError::FunctionNotFound {
                kind: "native",
                name: name.to_owned(),
            })?;
        let token = address::encode_native(native)
            .map_err(|_| NativeError::OutOfRange { what: "function" })?;
        self.store(amx, dest, &token)?;
        Ok(1)
    }

    // ---- Variable references ----

    /// `amx_var`: reference one cell of the caller.
    pub fn var(&self, amx: InstanceId, address: Cell) -> Result<Cell, NativeError> {
        self.vars.create_scalar(amx, address)
    }

    /// `amx_var_arr`: reference `size` cells of the caller.
    pub fn var_arr(&self, amx: InstanceId, address: Cell, size: Cell) -> Result<Cell, NativeError> {
        self.vars.create_array(amx, address, size)
    }

    /// `amx_public_var`: reference a public variable by name.
    pub fn public_var(&self, amx: InstanceId, name: &str) -> Result<Cell, NativeError> {
        if name.is_empty() {
            return Err(NativeError::ArgEmpty { arg: "name" });
        }
        let address = self
            .instance(amx)?
            .lock()
            .find_pubvar(name)
            .ok_or_else(|| NativeError::VarNotFound {
                kind: "public",
                name: name.to_owned(),
            })?;
        self.vars.create_scalar(amx, address)
    }

    /// `amx_set`: returns the previous value.
    pub fn set(&self, var: Cell, value: Cell, index: Cell) -> Result<Cell, NativeError> {
        let var = self.var_ref(var)?;
        self.vars.write(&var, index, value)
    }

    pub fn get(&self, var: Cell, index: Cell) -> Result<Cell, NativeError> {
        let var = self.var_ref(var)?;
        self.vars.read(&var, index)
    }

    /// `amx_valid`: never fails, unknown ids are just invalid.
    pub fn valid(&self, var: Cell) -> bool {
        self.vars.is_valid(var)
    }

    /// `amx_delete`: drop the reference itself.
    pub fn delete(&self, var: Cell) -> Result<bool, NativeError> {
        self.var_ref(var)?;
        Ok(self.vars.release(var))
    }

    pub fn linked(&self, var: Cell) -> Result<bool, NativeError> {
        Ok(self.vars.is_linked(&self.var_ref(var)?))
    }

    pub fn inside(&self, var: Cell) -> Result<bool, NativeError> {
        Ok(self.vars.is_inside(&self.var_ref(var)?))
    }

    pub fn size_of(&self, var: Cell) -> Result<Cell, NativeError> {
        Ok(self.var_ref(var)?.size())
    }

    /// `amx_my`: whether the caller owns the reference.
    pub fn my(&self, amx: InstanceId, var: Cell) -> Result<bool, NativeError> {
        Ok(self.vars.owned_by(&self.var_ref(var)?, amx))
    }

    /// `amx_to_ref`: store the offset from `dest` to the reference at
    /// `dest`, so the script can use it as a by-reference argument.
    pub fn to_ref(&self, amx: InstanceId, var: Cell, dest: Cell) -> Result<Cell, NativeError> {
        let offset = self.vars.to_relative_offset(var, amx, dest)?;
        self.store(amx, dest, &[offset])?;
        Ok(1)
    }

    // ---- Suspend requests ----

    /// `amx_fork`.
    pub fn fork(&self, amx: InstanceId, request: &ForkRequest) -> Result<Outcome, NativeError> {
        let context = self
            .registry
            .load_context(amx)
            .ok_or(NativeError::InvalidPointer {
                kind: "AMX",
                value: amx.to_cell(),
            })?;
        let mut context = context.lock();
        Ok(suspend::fork(&mut context, request))
    }

    /// `amx_commit`.
    pub fn commit(&self, value: Cell) -> Outcome {
        suspend::commit(value)
    }

    pub fn fork_end(&self) -> Outcome {
        suspend::fork_end()
    }

    /// `amx_error`: raise `code` and return `result` in its place.
    pub fn error(&self, code: Cell, result: Cell) -> Outcome {
        suspend::raise(ErrorCode(code), result)
    }

    /// `amx_alloc`: ask the scheduler for dynamic storage.
    pub fn alloc(&self, size: Cell, zero: bool) -> Outcome {
        suspend::alloc(size, zero)
    }

    /// `amx_free`: release the dynamic storage behind a reference the
    /// caller owns. Static and stack storage cannot be freed.
    pub fn free(&self, amx: InstanceId, var: Cell) -> Result<Outcome, NativeError> {
        let var_ref = self.var_ref(var)?;
        let unsupported = NativeError::OperationNotSupported {
            kind: "AMX variable",
            value: var,
        };
        if !self.vars.owned_by(&var_ref, amx) {
            return Err(unsupported);
        }
        match self.vars.free(&var_ref) {
            Some(address) => Ok(suspend::free(address)),
            None => Err(unsupported),
        }
    }

    pub fn parallel_begin(&self, count: Cell) -> Outcome {
        suspend::parallel_begin(count)
    }

    pub fn parallel_end(&self) -> Outcome {
        suspend::parallel_end()
    }

    pub fn tail_call(&self) -> Outcome {
        suspend::tail_call()
    }
}
