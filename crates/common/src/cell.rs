//! Machine word and instance identity.

use std::fmt;

/// A machine cell: the 32-bit signed word every script value fits in.
pub type Cell = i32;

/// Unsigned view of a [`Cell`], used for bit packing.
pub type UCell = u32;

/// Size of one cell in bytes. Relative addresses are byte offsets.
pub const CELL_SIZE: Cell = 4;

/// Identity of a loaded machine instance.
///
/// Ids are handed out by the registry and never reused within a process,
/// so an id stays a valid identity token after its instance is unloaded.
/// Scripts see the id as an `Amx:` tagged cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Wrap a raw id. Zero is reserved for "no instance".
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Raw numeric id.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The script-visible cell for this id.
    pub const fn to_cell(self) -> Cell {
        self.0 as Cell
    }

    /// Interpret a script-provided cell as an instance id.
    ///
    /// Non-positive cells never name an instance.
    pub const fn from_cell(cell: Cell) -> Option<Self> {
        if cell <= 0 {
            None
        } else {
            Some(Self(cell as u32))
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "amx#{}", self.0)
    }
}

/// Convert a cell count to a byte span, or `None` on overflow.
pub fn cells_to_bytes(count: Cell) -> Option<Cell> {
    count.checked_mul(CELL_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_an_instance() {
        assert_eq!(InstanceId::new(0), None);
        assert_eq!(InstanceId::from_cell(0), None);
        assert_eq!(InstanceId::from_cell(-1), None);
    }

    #[test]
    fn cell_conversion() {
        let id = InstanceId::new(7).unwrap();
        assert_eq!(id.to_cell(), 7);
        assert_eq!(InstanceId::from_cell(7), Some(id));
        assert_eq!(id.to_string(), "amx#7");
    }

    #[test]
    fn byte_span_overflow() {
        assert_eq!(cells_to_bytes(3), Some(12));
        assert_eq!(cells_to_bytes(Cell::MAX), None);
    }
}
