//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses used by the translation
//! layer of the guest.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |----------|----------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`VirtualAddress`] | Refers to virtual (table-translated) memory. |
//! | [`PhysicalAddress`] | Refers to physical memory or MMIO regions. |
//!
//! Granule and section sizes are chosen once at startup (4 KiB, 16 KiB or
//! 64 KiB pages; 512 MiB or 1 GiB sections), so the helpers take the size as
//! a runtime argument instead of a type parameter. Every size passed in must
//! be a non-zero power of two.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4001_2345);
//! assert_eq!(va.align_down(4096).as_u64(), 0x4001_2000);
//! assert_eq!(va.offset(4096), 0x345);
//!
//! let pa = PhysicalAddress::new(0x4001_2000);
//! assert_eq!(pa.join(va.offset(4096)).as_u64(), 0x4001_2345);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(4096,   4096), 4096);
/// assert_eq!(align_down(0x12345,  16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0,    4096), 0);
/// assert_eq!(align_up(1,    4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}
