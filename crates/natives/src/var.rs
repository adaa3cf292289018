//! Variable references ("Var" handles).
//!
//! A Var names a cell or an array inside some instance's address space.
//! The pool stores only the owner, base address and element count; every
//! dereference goes back to the owner through the registry and re-checks
//! that the address range is still live, because the heap and stack move
//! underneath the reference between calls.

use std::sync::{Arc, Weak};

use amxkit_common::cell::cells_to_bytes;
use amxkit_common::{Cell, InstanceId, CELL_SIZE};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::NativeError;
use crate::instance::Region;
use crate::pool::SlotPool;
use crate::registry::{Registry, SharedInstance};

/// A resolved variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef {
    owner: InstanceId,
    address: Cell,
    size: Cell,
}

impl VarRef {
    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    /// Base address, relative to the owner's data segment.
    pub fn address(&self) -> Cell {
        self.address
    }

    /// Number of cells, fixed at creation.
    pub fn size(&self) -> Cell {
        self.size
    }
}

/// Process-wide store of variable references.
pub struct VarPool {
    slots: Mutex<SlotPool<VarRef>>,
    registry: Arc<Registry>,
}

impl VarPool {
    /// Create a pool and subscribe it to the registry's unload events, so
    /// references owned by an unloaded instance are reclaimed.
    pub fn new(registry: Arc<Registry>, capacity: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            slots: Mutex::new(SlotPool::new(capacity)),
            registry: Arc::clone(&registry),
        });
        let weak: Weak<Self> = Arc::downgrade(&pool);
        registry.on_unload(move |owner| {
            if let Some(pool) = weak.upgrade() {
                pool.reclaim(owner);
            }
        });
        pool
    }

    /// Reference a single cell.
    pub fn create_scalar(&self, owner: InstanceId, address: Cell) -> Result<Cell, NativeError> {
        self.create_array(owner, address, 1)
    }

    /// Reference `count` consecutive cells.
    ///
    /// Only the shape of the address is checked here. Whether it points at
    /// live storage is decided at access time.
    pub fn create_array(
        &self,
        owner: InstanceId,
        address: Cell,
        count: Cell,
    ) -> Result<Cell, NativeError> {
        if address < 0 || address % CELL_SIZE != 0 {
            return Err(NativeError::MemoryAccess { address });
        }
        let fits = count >= 1
            && cells_to_bytes(count)
                .and_then(|bytes| address.checked_add(bytes))
                .is_some();
        if !fits {
            return Err(NativeError::OutOfRange { what: "size" });
        }
        let var = VarRef {
            owner,
            address,
            size: count,
        };
        let mut slots = self.slots.lock();
        let capacity = slots.capacity();
        let id = slots.insert(var).map_err(|_| NativeError::PoolExhausted {
            pool: "AMX variable",
            capacity,
        })?;
        trace!(id, instance = %owner, address, size = count, "created variable reference");
        Ok(id)
    }

    /// Look up an id. `None` means never issued or already released.
    pub fn resolve(&self, id: Cell) -> Option<VarRef> {
        self.slots.lock().get(id).copied()
    }

    /// Whether `id` names an entry. Says nothing about the storage.
    pub fn is_valid(&self, id: Cell) -> bool {
        self.slots.lock().contains(id)
    }

    fn instance(&self, var: &VarRef) -> Result<SharedInstance, NativeError> {
        self.registry
            .instance(var.owner)
            .ok_or(NativeError::InvalidPointer {
                kind: "AMX",
                value: var.owner.to_cell(),
            })
    }

    fn region(&self, var: &VarRef) -> Option<Region> {
        let instance = self.registry.instance(var.owner)?;
        let region = instance.lock().translate(var.address, var.size);
        region
    }

    /// Whether the whole range still maps to live storage.
    pub fn is_linked(&self, var: &VarRef) -> bool {
        self.region(var).is_some()
    }

    /// Whether the whole range is live and inside the owner's data block.
    pub fn is_inside(&self, var: &VarRef) -> bool {
        self.region(var) == Some(Region::Primary)
    }

    /// Whether `instance` is the reference's live owner.
    pub fn owned_by(&self, var: &VarRef, instance: InstanceId) -> bool {
        var.owner == instance && self.registry.is_live(instance)
    }

    fn element(&self, var: &VarRef, index: Cell) -> Result<Cell, NativeError> {
        if index < 0 || index >= var.size {
            return Err(NativeError::IndexOutOfBounds {
                index,
                size: var.size,
            });
        }
        Ok(var.address + index * CELL_SIZE)
    }

    /// Read element `index`.
    pub fn read(&self, var: &VarRef, index: Cell) -> Result<Cell, NativeError> {
        let address = self.element(var, index)?;
        let instance = self.instance(var)?;
        let value = instance.lock().cell(address);
        value.ok_or(NativeError::MemoryAccess { address })
    }

    /// Write element `index`, returning the previous value.
    pub fn write(&self, var: &VarRef, index: Cell, value: Cell) -> Result<Cell, NativeError> {
        let address = self.element(var, index)?;
        let instance = self.instance(var)?;
        let previous = instance.lock().set_cell(address, value);
        previous.ok_or(NativeError::MemoryAccess { address })
    }

    /// Byte distance from `from_address` to reference `id`, both in the
    /// address space of `instance`, which must own the reference.
    pub fn to_relative_offset(
        &self,
        id: Cell,
        instance: InstanceId,
        from_address: Cell,
    ) -> Result<Cell, NativeError> {
        let var = self.resolve(id).ok_or(NativeError::InvalidPointer {
            kind: "AMX variable",
            value: id,
        })?;
        if !self.owned_by(&var, instance) {
            return Err(NativeError::OperationNotSupported {
                kind: "AMX variable",
                value: id,
            });
        }
        Ok(var.address.wrapping_sub(from_address))
    }

    /// Release the dynamic block holding the reference.
    ///
    /// Returns the released block's address, or `None` if the reference
    /// does not point into dynamic storage (or its owner is gone). The
    /// pool entry itself survives; only its storage is unlinked.
    pub fn free(&self, var: &VarRef) -> Option<Cell> {
        let instance = self.registry.instance(var.owner)?;
        let released = instance.lock().release_dynamic(var.address);
        if let Some(address) = released {
            debug!(instance = %var.owner, address, "released dynamic storage");
        }
        released
    }

    /// Remove an entry. Returns `false` if the id was not live.
    pub fn release(&self, id: Cell) -> bool {
        let removed = self.slots.lock().remove(id).is_some();
        if removed {
            trace!(id, "released variable reference");
        }
        removed
    }

    /// Drop every entry owned by `owner`.
    pub fn reclaim(&self, owner: InstanceId) -> usize {
        let count = self.slots.lock().retain(|var| var.owner != owner);
        if count > 0 {
            debug!(instance = %owner, count, "reclaimed variable references");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
