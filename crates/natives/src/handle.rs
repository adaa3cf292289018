//! Handle pool: opaque script-visible ids for typed values.
//!
//! Natives here only ever wrap instance ids, but the payload is tagged so
//! scripts that pass a handle somewhere else can tell what it holds.

use std::sync::{Arc, Weak};

use amxkit_common::{Cell, InstanceId};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::NativeError;
use crate::pool::SlotPool;
use crate::registry::Registry;

/// Type tag of a handle payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A machine instance id.
    Amx,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Amx => "Amx",
        }
    }
}

/// A cell with its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedValue {
    pub tag: Tag,
    pub value: Cell,
}

impl TaggedValue {
    /// Wrap an instance id.
    pub fn amx(id: InstanceId) -> Self {
        Self {
            tag: Tag::Amx,
            value: id.to_cell(),
        }
    }

    /// The instance id, if this value is tagged `Amx`.
    pub fn as_amx(&self) -> Option<InstanceId> {
        match self.tag {
            Tag::Amx => InstanceId::from_cell(self.value),
        }
    }
}

/// One pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub value: TaggedValue,
    /// Instance whose context the handle was created in.
    pub context: InstanceId,
    /// Whether the handle owns its payload.
    pub owned: bool,
}

/// Process-wide store of handles.
pub struct HandlePool {
    slots: Mutex<SlotPool<Handle>>,
}

impl HandlePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(SlotPool::new(capacity)),
        }
    }

    /// Create a pool that drops the handles made in an instance's context
    /// when that instance unloads.
    pub fn attached(registry: &Registry, capacity: usize) -> Arc<Self> {
        let pool = Arc::new(Self::new(capacity));
        let weak: Weak<Self> = Arc::downgrade(&pool);
        registry.on_unload(move |context| {
            if let Some(pool) = weak.upgrade() {
                pool.reclaim(context);
            }
        });
        pool
    }

    /// Store a value and return its handle id.
    pub fn emplace(
        &self,
        value: TaggedValue,
        context: InstanceId,
        owned: bool,
    ) -> Result<Cell, NativeError> {
        let mut slots = self.slots.lock();
        let capacity = slots.capacity();
        let id = slots
            .insert(Handle {
                value,
                context,
                owned,
            })
            .map_err(|_| NativeError::PoolExhausted {
                pool: "handle",
                capacity,
            })?;
        trace!(id, tag = value.tag.name(), value = value.value, "created handle");
        Ok(id)
    }

    pub fn get(&self, id: Cell) -> Option<Handle> {
        self.slots.lock().get(id).copied()
    }

    pub fn release(&self, id: Cell) -> Option<Handle> {
        self.slots.lock().remove(id)
    }

    /// Drop every handle created in `context`.
    pub fn reclaim(&self, context: InstanceId) -> usize {
        let count = self.slots.lock().retain(|h| h.context != context);
        if count > 0 {
            debug!(instance = %context, count, "reclaimed handles");
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
