//! # Virtual Memory Support
//!
//! Translation-table construction and MMU state for an ARM guest kernel
//! (ARMv7 LPAE and ARMv8-A), used while the guest runs under a hypervisor.
//!
//! ## What you get
//! - A [`TranslationConfig`] fixing granule, depth and descriptor format.
//! - A typed long-descriptor codec ([`Descriptor`], [`PageDescriptor`],
//!   [`BlockDescriptor`], [`TableDescriptor`]) with [`Protection`] presets.
//! - An [`AddressSpace`] walker that allocates missing tables lazily.
//! - The [`Mmu`] facade: page/section installation, the identity map, the
//!   per-CPU enable/disable state and address translation.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]) plus
//!   the [`Platform`] hooks for the architecture primitives.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! With the 4 KiB granule each table holds 512 descriptors of 8 bytes; with
//! LPAE the root holds only 4 (a 32-bit input address).
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  top  |  mid  |  leaf | Offset |
//!
//!   top  →  mid  →  leaf  →  Physical Page
//!    │       │        │
//!    │       │        └───► page descriptor  → maps 4 KiB
//!    │       └────────────► block descriptor → maps 2 MiB (not created here)
//!    └────────────────────► block descriptor → maps 1 GiB (a section)
//! ```
//!
//! ### Leaf vs. non-leaf entries
//!
//! - A **table** descriptor points to the next level and continues the walk.
//! - A **block** descriptor above the leaf level stops the walk early; the
//!   remaining VA bits become the offset inside the block.
//! - A **page** descriptor at the leaf level maps one granule.
//!
//! ## Concurrency
//!
//! Operations are synchronous and may run on several CPUs at once. Entry
//! writes are single atomic stores followed by a TLB invalidation on the
//! writing CPU only. A CPU changing a mapping that other CPUs may have cached
//! must arrange its own cross-CPU invalidation.
//!
//! ## Errors
//!
//! Failures are unrecoverable at this layer. The walkers expose `try_*`
//! variants returning [`VmemError`]; the [`Mmu`] operations halt through
//! [`fatal`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod address_space;
mod config;
mod descriptor;
mod error;
mod identity;
mod mapping;
mod mmu;
mod percpu;
mod platform;
mod table;
mod translate;

#[cfg(test)]
mod testing;

pub use crate::address_space::AddressSpace;
pub use crate::config::{DescriptorFormat, TranslationConfig};
pub use crate::descriptor::{
    BlockDescriptor, CachePolicy, Descriptor, DescriptorBits, INNER_SHAREABLE, PageDescriptor,
    Protection, TableDescriptor,
};
pub use crate::error::{VmemError, fatal};
pub use crate::identity::MemoryLayout;
pub use crate::mmu::{Mmu, MmuState};
pub use crate::percpu::CpuContext;
pub use crate::platform::Platform;
pub use crate::table::{EntrySlot, TableRoot};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::PhysicalAddress;

/// Source of zeroed physical frames for translation tables.
///
/// Frames are one granule ([`TranslationConfig::page_size`]) in size and
/// aligned to it. The allocator is shared by every CPU and synchronizes
/// internally, hence `&self`.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one zero-filled frame.
    fn alloc_zeroed(&self) -> Option<PhysicalAddress>;

    /// Take back a frame that was allocated but never linked into a tree.
    ///
    /// The frame may have been written to; it must be zeroed again before
    /// [`alloc_zeroed`](Self::alloc_zeroed) hands it out.
    fn release(&self, frame: PhysicalAddress);
}

/// Converts physical addresses of table frames to usable pointers.
///
/// Typical patterns:
/// - **Guest**: tables live in identity-mapped RAM ([`IdentityMapper`]).
/// - **Host tests**: tables live in a heap buffer at an arbitrary offset.
pub trait PhysMapper {
    /// Pointer through which the frame at `pa` can be read and written.
    ///
    /// # Safety
    /// `pa` must address memory reachable through this mapper, and `T` must
    /// match the bytes stored there.
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T;
}

/// [`PhysMapper`] for frames that are reachable at their physical address.
///
/// True while translation is off and, afterwards, inside the identity map.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        core::ptr::with_exposed_provenance_mut(pa.as_u64() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    #[repr(C, align(4096))]
    struct Frame([AtomicU64; 512]);

    #[test]
    fn identity_mapper_walks_host_frames() {
        let root = Box::new(Frame([const { AtomicU64::new(0) }; 512]));
        let next = Box::new(Frame([const { AtomicU64::new(0) }; 512]));
        let leaf = Box::new(Frame([const { AtomicU64::new(0) }; 512]));

        let pa = |f: &Frame| PhysicalAddress::new((&raw const *f).expose_provenance() as u64);
        let (root_pa, next_pa, leaf_pa) = (pa(&*root), pa(&*next), pa(&*leaf));

        let cfg = TranslationConfig::AARCH64_4K;
        let va = kernel_memory_addresses::VirtualAddress::new(0x40_4060_3000);
        root.0[cfg.index(0, va)].store(TableDescriptor::new(next_pa).bits().into_bits(), Ordering::Relaxed);
        next.0[cfg.index(1, va)].store(TableDescriptor::new(leaf_pa).bits().into_bits(), Ordering::Relaxed);
        let pte = PageDescriptor::new(PhysicalAddress::new(0x8000_0000), Protection::DATA, cfg.format());
        leaf.0[cfg.index(2, va)].store(pte.bits().into_bits(), Ordering::Relaxed);

        let space = AddressSpace::from_root(&IdentityMapper, TableRoot::new(root_pa), cfg);
        assert_eq!(
            space.lookup(va + 0x123),
            Some(PhysicalAddress::new(0x8000_0123))
        );
        assert_eq!(space.lookup(va + 0x1000), None);
    }
}
