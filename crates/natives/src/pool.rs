//! Generational slot pool behind the script-visible ids.
//!
//! Slots are reused through a free list; every reuse bumps the slot's
//! generation, and the generation is part of the id, so an id that was
//! released never resolves again even after its slot is recycled.

use amxkit_common::limits::{next_generation, pack_id, unpack_id, MAX_POOL_SLOTS};
use amxkit_common::Cell;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A bounded slot map keyed by packed [`Cell`] ids.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    /// Free slots, available for reuse.
    free_slots: Vec<usize>,
    capacity: usize,
    live: usize,
    retired: usize,
}

impl<T> SlotPool<T> {
    /// Capacity is clamped to the slots an id can address.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            capacity: capacity.min(MAX_POOL_SLOTS),
            live: 0,
            retired: 0,
        }
    }

    /// Store a value and return its id, or hand the value back when the
    /// pool is full.
    pub fn insert(&mut self, value: T) -> Result<Cell, T> {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
            None => return Err(value),
        };
        let entry = &mut self.slots[slot];
        entry.value = Some(value);
        self.live += 1;
        Ok(pack_id(slot, entry.generation))
    }

    fn locate(&self, id: Cell) -> Option<usize> {
        let (slot, generation) = unpack_id(id)?;
        let entry = self.slots.get(slot)?;
        (entry.generation == generation && entry.value.is_some()).then_some(slot)
    }

    pub fn get(&self, id: Cell) -> Option<&T> {
        let slot = self.locate(id)?;
        self.slots[slot].value.as_ref()
    }

    pub fn get_mut(&mut self, id: Cell) -> Option<&mut T> {
        let slot = self.locate(id)?;
        self.slots[slot].value.as_mut()
    }

    pub fn contains(&self, id: Cell) -> bool {
        self.locate(id).is_some()
    }

    /// Remove a value. The id is dead from here on.
    pub fn remove(&mut self, id: Cell) -> Option<T> {
        let slot = self.locate(id)?;
        Some(self.vacate(slot))
    }

    /// Remove every value for which `keep` returns false. Returns how many
    /// were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value.as_ref().is_some_and(|v| !keep(v)))
            .map(|(i, _)| i)
            .collect();
        for &slot in &doomed {
            self.vacate(slot);
        }
        doomed.len()
    }

    fn vacate(&mut self, slot: usize) -> T {
        let entry = &mut self.slots[slot];
        let value = entry
            .value
            .take()
            .expect("vacate is only called on occupied slots");
        match next_generation(entry.generation) {
            Some(generation) => {
                entry.generation = generation;
                self.free_slots.push(slot);
            }
            // Out of generations: the slot stays empty for good.
            None => self.retired += 1,
        }
        self.live -= 1;
        value
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots that ran out of generations and will never be reused.
    pub fn retired(&self) -> usize {
        self.retired
    }
}
