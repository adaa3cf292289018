//! Hard limits and id packing shared by the pools.

use crate::cell::Cell;

/// Bits of a pool id holding the slot number (plus one).
pub const ID_SLOT_BITS: u32 = 20;

/// Bits of a pool id holding the slot generation.
pub const ID_GENERATION_BITS: u32 = 11;

/// Largest number of slots a pool can address.
pub const MAX_POOL_SLOTS: usize = (1 << ID_SLOT_BITS) - 1;

/// Default capacity of the variable reference pool.
pub const DEFAULT_MAX_VARS: usize = 65_536;

/// Default capacity of the handle pool.
pub const DEFAULT_MAX_HANDLES: usize = 65_536;

/// Maximum length, in characters, of a name copied into a script buffer.
pub const MAX_NAME_LENGTH: usize = 4_096;

const SLOT_MASK: u32 = (1 << ID_SLOT_BITS) - 1;
const GENERATION_MASK: u32 = (1 << ID_GENERATION_BITS) - 1;

/// Pack a slot number and generation into a script-visible id.
///
/// The result is always positive; zero is never produced.
pub fn pack_id(slot: usize, generation: u32) -> Cell {
    debug_assert!(slot < MAX_POOL_SLOTS);
    (((generation & GENERATION_MASK) << ID_SLOT_BITS) | (slot as u32 + 1)) as Cell
}

/// Split an id into slot number and generation.
pub fn unpack_id(id: Cell) -> Option<(usize, u32)> {
    if id <= 0 {
        return None;
    }
    let bits = id as u32;
    let slot = bits & SLOT_MASK;
    if slot == 0 {
        return None;
    }
    Some(((slot - 1) as usize, (bits >> ID_SLOT_BITS) & GENERATION_MASK))
}

/// Advance a slot generation. `None` once the generation bits are used
/// up; the slot must then be retired, since wrapping would revive old ids.
pub fn next_generation(generation: u32) -> Option<u32> {
    (generation < GENERATION_MASK).then_some(generation + 1)
}
