use crate::{MemoryAddress, PhysicalAddress};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// It does not validate the input-address width at runtime; it only carries
/// the *kind* of address at the type level so virtual and physical values are
/// not mixed by accident.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x4001_0123);
/// assert_eq!(va.align_down(4096).as_u64(), 0x4001_0000);
/// assert_eq!(va.offset(4096), 0x123);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(MemoryAddress::from_ptr(ptr))
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
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

    /// The numerically equal physical address, as produced by an identity map.
    #[inline]
    #[must_use]
    pub const fn identity(self) -> PhysicalAddress {
        PhysicalAddress::new(self.as_u64())
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for VirtualAddress {
    /// Identity conversion; only meaningful under an identity map.
    #[inline]
    fn from(pa: PhysicalAddress) -> Self {
        Self::new(pa.as_u64())
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for VirtualAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
