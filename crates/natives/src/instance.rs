//! The machine-instance seam.
//!
//! Natives never touch interpreter internals directly. Everything they need
//! from an instance (address translation, string marshaling, name lookups,
//! raising a status code) goes through [`Instance`].

use amxkit_common::{Cell, ErrorCode};

/// Where a translated address range lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The instance's own data block: data, heap, or stack.
    Primary,
    /// Dynamic storage outside the data block, handed out by the scheduler.
    Auxiliary,
}

/// Host address of a native function, as used by [`address`] tokens.
///
/// [`address`]: amxkit_common::address
pub type NativeAddr = u64;

/// A resolved call target inside an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A public function, by index.
    Public(usize),
    /// A registered native, by host address.
    Native(NativeAddr),
}

/// One loaded machine instance, as seen by the natives.
///
/// Addresses are byte offsets relative to the instance's data segment.
/// Every method re-derives its answer from current state: the heap and
/// stack move between calls, and dynamic blocks come and go.
pub trait Instance: Send {
    fn name(&self) -> &str;

    /// Check that `cells` consecutive cells starting at `address` are live
    /// storage, all in the same region.
    fn translate(&self, address: Cell, cells: Cell) -> Option<Region>;

    /// Read one cell, or `None` if the address does not translate.
    fn cell(&self, address: Cell) -> Option<Cell>;

    /// Write one cell, returning the previous value.
    fn set_cell(&mut self, address: Cell, value: Cell) -> Option<Cell>;

    /// Release the dynamic block containing `address` and return the
    /// block's base address. `None` for static or stack storage.
    fn release_dynamic(&mut self, address: Cell) -> Option<Cell>;

    /// Read a zero-terminated string, at most `max_len` characters.
    fn read_string(&self, address: Cell, max_len: usize) -> Option<String>;

    /// Write `value` into a buffer of `size` cells, truncating and
    /// terminating it. Returns the number of characters written.
    fn write_string(&mut self, address: Cell, value: &str, size: Cell) -> Option<usize>;

    fn num_publics(&self) -> usize;

    fn find_public(&self, name: &str) -> Option<usize>;

    fn public_name(&self, index: usize) -> Option<&str>;

    /// Address of a public variable.
    fn find_pubvar(&self, name: &str) -> Option<Cell>;

    /// Host address of a native registered with this instance.
    fn find_native(&self, name: &str) -> Option<NativeAddr>;

    /// Set the instance's status code. Called with [`ErrorCode::SLEEP`] to
    /// request suspension.
    fn raise_error(&mut self, code: ErrorCode);
}
