use crate::MemoryAddress;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Physical memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **physical** addresses
/// (guest RAM / MMIO). Like [`VirtualAddress`](super::VirtualAddress), this type
/// carries intent and prevents accidental VA↔PA mix-ups.
///
/// ### Notes
/// - Table entries store a **granule-aligned** physical base plus attribute
///   bits; use [`align_down`](Self::align_down) and [`offset`](Self::offset) to
///   reason about base vs. in-page offset explicitly.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x4020_0042);
/// let base = pa.align_down(0x20_0000);
/// assert_eq!(base.as_u64(), 0x4020_0000);
/// assert_eq!(base.join(pa.offset(0x20_0000)), pa);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(pub(crate) MemoryAddress);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, size: u64) -> Self {
        Self(self.0.align_down(size))
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, size: u64) -> Self {
        Self(self.0.align_up(size))
    }

    #[inline]
    #[must_use]
    pub const fn offset(self, size: u64) -> u64 {
        self.0.offset(size)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, size: u64) -> bool {
        self.0.is_aligned(size)
    }

    /// Recombine a block base with an offset taken from another address.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> Self {
        Self::new(self.as_u64() + offset)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for PhysicalAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
