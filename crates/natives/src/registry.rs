//! Registry of loaded machine instances.
//!
//! Tracks which instances are live, in load order, and hands out their
//! per-instance context. Instance ids are allocated here and never reused.
//! Other components subscribe to unload events instead of polling.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use amxkit_common::InstanceId;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::instance::Instance;

/// A loaded instance, shared between the registry and its interpreter.
pub type SharedInstance = Arc<Mutex<dyn Instance>>;

/// Callback run after an instance has been removed from the registry.
pub type UnloadHook = Box<dyn Fn(InstanceId) + Send + Sync>;

/// Per-instance context: typed extra data slots.
///
/// Each type gets at most one slot, created on first access.
#[derive(Default)]
pub struct InstanceContext {
    extras: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl InstanceContext {
    /// The slot for `T`, default-initialized on first access.
    pub fn get_extra<T: Any + Send + Default>(&mut self) -> &mut T {
        self.extras
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .expect("extra slots are keyed by their own TypeId")
    }

    /// The slot for `T`, if it has been created.
    pub fn extra<T: Any + Send>(&self) -> Option<&T> {
        self.extras
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
    }
}

struct Loaded {
    id: InstanceId,
    instance: SharedInstance,
    context: Option<Arc<Mutex<InstanceContext>>>,
}

/// The set of live instances.
pub struct Registry {
    loaded: RwLock<Vec<Loaded>>,
    next_id: AtomicU32,
    unload_hooks: RwLock<Vec<UnloadHook>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            loaded: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
            unload_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a loaded instance. It is appended to the enumeration order.
    pub fn register<I: Instance + 'static>(&self, instance: Arc<Mutex<I>>) -> InstanceId {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = InstanceId::new(raw).expect("instance ids start at one");
        let instance: SharedInstance = instance;
        debug!(instance = %id, name = instance.lock().name(), "registered instance");
        self.loaded.write().push(Loaded {
            id,
            instance,
            context: None,
        });
        id
    }

    /// Remove an instance and notify unload hooks.
    ///
    /// Returns `false` if the instance was not registered. Hooks run after
    /// the registry lock is released and must not register further hooks.
    pub fn unload(&self, id: InstanceId) -> bool {
        let removed = {
            let mut loaded = self.loaded.write();
            match loaded.iter().position(|l| l.id == id) {
                Some(pos) => {
                    loaded.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!(instance = %id, "unloaded instance");
            for hook in self.unload_hooks.read().iter() {
                hook(id);
            }
        }
        removed
    }

    /// Subscribe to unload events.
    pub fn on_unload(&self, hook: impl Fn(InstanceId) + Send + Sync + 'static) {
        self.unload_hooks.write().push(Box::new(hook));
    }

    pub fn is_live(&self, id: InstanceId) -> bool {
        self.loaded.read().iter().any(|l| l.id == id)
    }

    /// The instance behind `id`, if it is still live.
    pub fn instance(&self, id: InstanceId) -> Option<SharedInstance> {
        self.loaded
            .read()
            .iter()
            .find(|l| l.id == id)
            .map(|l| Arc::clone(&l.instance))
    }

    /// Live instance ids in load order.
    pub fn enumerate_live_instances(&self) -> Vec<InstanceId> {
        self.loaded.read().iter().map(|l| l.id).collect()
    }

    /// The context for a live instance, created on first access.
    pub fn load_context(&self, id: InstanceId) -> Option<Arc<Mutex<InstanceContext>>> {
        if let Some(context) = self
            .loaded
            .read()
            .iter()
            .find(|l| l.id == id)
            .and_then(|l| l.context.clone())
        {
            return Some(context);
        }
        let mut loaded = self.loaded.write();
        let entry = loaded.iter_mut().find(|l| l.id == id)?;
        Some(Arc::clone(entry.context.get_or_insert_with(Default::default)))
    }

    /// Call `f` for every instance registered at the time of the call, in
    /// load order, stopping at the first error.
    ///
    /// The registry is not locked while `f` runs, so `f` may call back into
    /// the registry or into the instances themselves.
    pub fn broadcast<E>(&self, mut f: impl FnMut(InstanceId) -> Result<(), E>) -> Result<(), E> {
        for id in self.enumerate_live_instances() {
            f(id)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.loaded.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.read().is_empty()
    }
}
