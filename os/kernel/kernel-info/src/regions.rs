//! # Physical Memory Regions
//!
//! Read-only description of the guest's physical memory, produced by the
//! platform (device tree / firmware) before the translation layer runs.

use bitfield_struct::bitfield;

/// Attribute flags of a [`MemoryRegion`].
///
/// | Bit | Meaning |
/// |-----|---------|
/// | 0   | `primary`: the RAM region the guest was loaded into |
/// | 1   | `io`: device memory, mapped uncached and privileged only |
/// | 31  | `unknown`: region type could not be determined |
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct RegionFlags {
    pub primary: bool,
    pub io: bool,
    #[bits(29)]
    __reserved: u32,
    pub unknown: bool,
}

/// One contiguous physical range `[start, end)`.
///
/// A region with `end == 0` is the table sentinel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub flags: RegionFlags,
}

impl MemoryRegion {
    /// The terminating entry of a region table.
    pub const SENTINEL: Self = Self::new(0, 0, RegionFlags::new());

    #[must_use]
    pub const fn new(start: u64, end: u64, flags: RegionFlags) -> Self {
        Self { start, end, flags }
    }

    #[must_use]
    pub const fn io(start: u64, end: u64) -> Self {
        Self::new(start, end, RegionFlags::new().with_io(true))
    }

    #[must_use]
    pub const fn ram(start: u64, end: u64) -> Self {
        Self::new(start, end, RegionFlags::new().with_primary(true))
    }

    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.end == 0
    }

    #[must_use]
    pub const fn is_io(&self) -> bool {
        self.flags.io()
    }
}

/// Iterate a region table up to (excluding) its sentinel.
///
/// Tables without a sentinel are walked to their end.
pub fn iter_regions(table: &[MemoryRegion]) -> impl Iterator<Item = &MemoryRegion> {
    table.iter().take_while(|r| !r.is_sentinel())
}
