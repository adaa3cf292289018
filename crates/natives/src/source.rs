//! The source instance of the current top-level dispatch.
//!
//! Whoever starts a top-level script call (a host callback, a timer, a
//! cross-instance call from outside any script) enters the originating
//! instance here for the duration of the call. Nested entries restore the
//! outer value when their guard drops.

use std::cell::Cell as StdCell;
use std::marker::PhantomData;

use amxkit_common::InstanceId;

thread_local! {
    static SOURCE: StdCell<Option<InstanceId>> = const { StdCell::new(None) };
}

/// Restores the previous source instance on drop.
#[must_use = "the source instance is cleared as soon as the guard drops"]
pub struct SourceGuard {
    previous: Option<InstanceId>,
    // Tied to the thread whose slot it restores.
    _not_send: PhantomData<*const ()>,
}

/// Make `instance` the source for the current thread until the guard drops.
pub fn enter(instance: Option<InstanceId>) -> SourceGuard {
    let previous = SOURCE.with(|source| source.replace(instance));
    SourceGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// The current source instance, if a dispatch entered one.
pub fn current() -> Option<InstanceId> {
    SOURCE.with(|source| source.get())
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        SOURCE.with(|source| source.set(self.previous));
    }
}
