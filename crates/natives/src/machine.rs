//! Reference machine instance: data block, heap, stack, dynamic blocks.
//!
//! This is the in-memory [`Instance`] used by hosts that embed the natives
//! without a full interpreter, and by the test suites. The data block is
//! laid out the usual way for this family of machines:
//!
//! ```text
//! 0          hlw         hea ->          <- stk          stp
//! | data ... | heap ...  |     free      | stack ...     |
//! ```
//!
//! Dynamic blocks live past `stp` and are addressed with the same relative
//! offsets, so a reference into one looks like any other address.

use std::collections::{BTreeMap, HashMap};

use amxkit_common::cell::cells_to_bytes;
use amxkit_common::{Cell, ErrorCode, CELL_SIZE};
use thiserror::Error;

use crate::instance::{Instance, NativeAddr, Region};

/// Errors from direct heap/stack manipulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("stack overflow (stk {stk:#x}, hea {hea:#x})")]
    StackOverflow { stk: Cell, hea: Cell },

    #[error("stack underflow")]
    StackUnderflow,

    #[error("heap overflow (requested {cells} cells)")]
    HeapOverflow { cells: Cell },

    #[error("heap release at {address:#x} outside the heap")]
    BadHeapRelease { address: Cell },
}

/// Sizes of a machine's data block, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineLayout {
    /// Static data cells.
    pub data_cells: usize,
    /// Cells shared by the heap and the stack.
    pub heap_stack_cells: usize,
}

impl Default for MachineLayout {
    fn default() -> Self {
        Self {
            data_cells: 64,
            heap_stack_cells: 256,
        }
    }
}

/// An in-memory machine instance.
pub struct Machine {
    name: String,
    /// Data block: data, heap, free space, stack.
    memory: Vec<Cell>,
    /// Heap bottom (end of static data).
    hlw: Cell,
    /// Heap top.
    hea: Cell,
    /// Stack pointer; the stack grows down towards `hea`.
    stk: Cell,
    /// Stack top (end of the data block).
    stp: Cell,
    /// Dynamic blocks by base address.
    dynamic: BTreeMap<Cell, Vec<Cell>>,
    next_dynamic: Cell,
    publics: Vec<String>,
    pubvars: HashMap<String, Cell>,
    natives: HashMap<String, NativeAddr>,
    error: ErrorCode,
}

fn to_index(address: Cell) -> usize {
    (address / CELL_SIZE) as usize
}

impl Machine {
    /// Create a machine with a zeroed data block.
    pub fn new(name: impl Into<String>, layout: MachineLayout) -> Self {
        let total = layout.data_cells + layout.heap_stack_cells;
        let hlw = layout.data_cells as Cell * CELL_SIZE;
        let stp = total as Cell * CELL_SIZE;
        Self {
            name: name.into(),
            memory: vec![0; total],
            hlw,
            hea: hlw,
            stk: stp,
            stp,
            dynamic: BTreeMap::new(),
            next_dynamic: stp,
            publics: Vec::new(),
            pubvars: HashMap::new(),
            natives: HashMap::new(),
            error: ErrorCode::NONE,
        }
    }

    /// Declare a public function. Indices follow declaration order.
    pub fn with_public(mut self, name: impl Into<String>) -> Self {
        self.publics.push(name.into());
        self
    }

    /// Declare a public variable at a static data address.
    pub fn with_pubvar(mut self, name: impl Into<String>, address: Cell) -> Self {
        self.pubvars.insert(name.into(), address);
        self
    }

    /// Register a native under `name` with the given host address.
    pub fn with_native(mut self, name: impl Into<String>, address: NativeAddr) -> Self {
        self.natives.insert(name.into(), address);
        self
    }

    /// End of the data block; dynamic blocks start here.
    pub fn stack_top(&self) -> Cell {
        self.stp
    }

    /// Current status code.
    pub fn error(&self) -> ErrorCode {
        self.error
    }

    /// Return the status code and reset it to [`ErrorCode::NONE`].
    pub fn take_error(&mut self) -> ErrorCode {
        std::mem::take(&mut self.error)
    }

    /// Push a value and return its address.
    pub fn push(&mut self, value: Cell) -> Result<Cell, MachineError> {
        if self.stk - CELL_SIZE < self.hea {
            return Err(MachineError::StackOverflow {
                stk: self.stk,
                hea: self.hea,
            });
        }
        self.stk -= CELL_SIZE;
        self.memory[to_index(self.stk)] = value;
        Ok(self.stk)
    }

    /// Pop a value. The popped slot stops being live storage.
    pub fn pop(&mut self) -> Result<Cell, MachineError> {
        if self.stk >= self.stp {
            return Err(MachineError::StackUnderflow);
        }
        let value = self.memory[to_index(self.stk)];
        self.stk += CELL_SIZE;
        Ok(value)
    }

    /// Reserve zeroed heap cells and return their base address.
    pub fn heap_alloc(&mut self, cells: Cell) -> Result<Cell, MachineError> {
        let bytes = cells_to_bytes(cells)
            .filter(|b| *b > 0 && self.hea + b <= self.stk)
            .ok_or(MachineError::HeapOverflow { cells })?;
        let base = self.hea;
        self.hea += bytes;
        self.memory[to_index(base)..to_index(self.hea)].fill(0);
        Ok(base)
    }

    /// Drop the heap back to `address`, releasing everything above it.
    pub fn heap_release(&mut self, address: Cell) -> Result<(), MachineError> {
        if address < self.hlw || address > self.hea {
            return Err(MachineError::BadHeapRelease { address });
        }
        self.hea = address;
        Ok(())
    }

    /// Allocate a zeroed dynamic block past the data block.
    ///
    /// This is the scheduler's half of an allocation request; the natives
    /// only ever release these blocks.
    pub fn alloc_dynamic(&mut self, cells: Cell) -> Option<Cell> {
        let bytes = cells_to_bytes(cells).filter(|b| *b > 0)?;
        let base = self.next_dynamic;
        self.next_dynamic = base.checked_add(bytes)?;
        self.dynamic.insert(base, vec![0; cells as usize]);
        Some(base)
    }

    /// Number of live dynamic blocks.
    pub fn dynamic_blocks(&self) -> usize {
        self.dynamic.len()
    }

    /// The dynamic block containing `[address, address + bytes)`.
    fn dynamic_block(&self, address: Cell, bytes: Cell) -> Option<(Cell, &Vec<Cell>)> {
        let (&base, block) = self.dynamic.range(..=address).next_back()?;
        let end = base + block.len() as Cell * CELL_SIZE;
        address
            .checked_add(bytes)
            .is_some_and(|last| last <= end)
            .then_some((base, block))
    }

    fn slot(&self, address: Cell) -> Option<&Cell> {
        match self.translate(address, 1)? {
            Region::Primary => self.memory.get(to_index(address)),
            Region::Auxiliary => {
                let (base, block) = self.dynamic_block(address, CELL_SIZE)?;
                block.get(to_index(address - base))
            }
        }
    }

    fn slot_mut(&mut self, address: Cell) -> Option<&mut Cell> {
        match self.translate(address, 1)? {
            Region::Primary => self.memory.get_mut(to_index(address)),
            Region::Auxiliary => {
                let (base, _) = self.dynamic_block(address, CELL_SIZE)?;
                let block = self.dynamic.get_mut(&base)?;
                block.get_mut(to_index(address - base))
            }
        }
    }
}

impl Instance for Machine {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&self, address: Cell, cells: Cell) -> Option<Region> {
        if address < 0 || address % CELL_SIZE != 0 || cells <= 0 {
            return None;
        }
        let bytes = cells_to_bytes(cells)?;
        let end = address.checked_add(bytes)?;
        if end <= self.hea || (address >= self.stk && end <= self.stp) {
            return Some(Region::Primary);
        }
        if address >= self.stp {
            return self
                .dynamic_block(address, bytes)
                .map(|_| Region::Auxiliary);
        }
        None
    }

    fn cell(&self, address: Cell) -> Option<Cell> {
        self.slot(address).copied()
    }

    fn set_cell(&mut self, address: Cell, value: Cell) -> Option<Cell> {
        self.slot_mut(address)
            .map(|slot| std::mem::replace(slot, value))
    }

    fn release_dynamic(&mut self, address: Cell) -> Option<Cell> {
        if address < self.stp {
            return None;
        }
        let (base, _) = self.dynamic_block(address, CELL_SIZE)?;
        self.dynamic.remove(&base);
        Some(base)
    }

    fn read_string(&self, address: Cell, max_len: usize) -> Option<String> {
        let mut out = String::new();
        let mut at = address;
        loop {
            let c = self.cell(at)?;
            if c == 0 || out.chars().count() >= max_len {
                return Some(out);
            }
            out.push(char::from_u32(c as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
            at = at.checked_add(CELL_SIZE)?;
        }
    }

    fn write_string(&mut self, address: Cell, value: &str, size: Cell) -> Option<usize> {
        self.translate(address, size)?;
        let capacity = size as usize - 1;
        let mut written = 0;
        for (i, c) in value.chars().take(capacity).enumerate() {
            self.set_cell(address + i as Cell * CELL_SIZE, c as Cell)?;
            written += 1;
        }
        self.set_cell(address + written as Cell * CELL_SIZE, 0)?;
        Some(written)
    }

    fn num_publics(&self) -> usize {
        self.publics.len()
    }

    fn find_public(&self, name: &str) -> Option<usize> {
        self.publics.iter().position(|p| p == name)
    }

    fn public_name(&self, index: usize) -> Option<&str> {
        self.publics.get(index).map(String::as_str)
    }

    fn find_pubvar(&self, name: &str) -> Option<Cell> {
        self.pubvars.get(name).copied()
    }

    fn find_native(&self, name: &str) -> Option<NativeAddr> {
        self.natives.get(name).copied()
    }

    fn raise_error(&mut self, code: ErrorCode) {
        self.error = code;
    }
}
