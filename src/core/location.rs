// This module models code locations the way the unwind drivers consume them. A CodeLocation
// is an opaque marker captured while code is emitted; only after final layout can it be
// turned into a byte offset. Offsets are unit-relative: hot code first, cold code after it,
// so a cold offset is always at least the total hot code size. LocationOracle is the seam
// to whatever performed layout, and LocationTable is the plain map implementation used by
// the x64 code generator, the trace tool and the tests.

//! Code location markers and their resolution after final layout.

use hashbrown::HashMap;

/// Opaque marker for a point in the emitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeLocation(u32);

impl CodeLocation {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// Which of the two code regions a descriptor is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeRegion {
    Hot,
    Cold,
}

impl CodeRegion {
    pub fn is_cold(self) -> bool {
        self == CodeRegion::Cold
    }
}

/// Resolves markers to unit-relative byte offsets once code layout is final.
pub trait LocationOracle {
    /// Offset of `location` from the start of the unit's hot code, or `None`
    /// if the marker was never placed.
    fn code_offset(&self, location: CodeLocation) -> Option<u32>;
}

/// Map-backed oracle.
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    offsets: HashMap<CodeLocation, u32>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `location` to `offset`, replacing any previous binding.
    pub fn insert(&mut self, location: CodeLocation, offset: u32) {
        self.offsets.insert(location, offset);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl LocationOracle for LocationTable {
    fn code_offset(&self, location: CodeLocation) -> Option<u32> {
        self.offsets.get(&location).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_table_lookup() {
        let mut table = LocationTable::new();
        assert!(table.is_empty());

        table.insert(CodeLocation::new(1), 40);
        table.insert(CodeLocation::new(2), 512);

        assert_eq!(table.len(), 2);
        assert_eq!(table.code_offset(CodeLocation::new(1)), Some(40));
        assert_eq!(table.code_offset(CodeLocation::new(2)), Some(512));
        assert_eq!(table.code_offset(CodeLocation::new(3)), None);
    }

    #[test]
    fn test_rebinding_replaces_offset() {
        let mut table = LocationTable::new();
        table.insert(CodeLocation::new(7), 8);
        table.insert(CodeLocation::new(7), 16);
        assert_eq!(table.code_offset(CodeLocation::new(7)), Some(16));
    }
}
