//! Views of table frames as arrays of atomically accessed descriptors.

use crate::PhysMapper;
use crate::config::TranslationConfig;
use crate::descriptor::{Descriptor, DescriptorBits};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::PhysicalAddress;

/// Physical frame of a top-level translation table.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableRoot(PhysicalAddress);

impl TableRoot {
    #[inline]
    #[must_use]
    pub const fn new(pa: PhysicalAddress) -> Self {
        Self(pa)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }
}

/// One table frame at a known level.
pub(crate) struct Table<'t> {
    entries: &'t [AtomicU64],
    level: u8,
}

impl<'t> Table<'t> {
    /// Borrow the table stored at `pa`.
    ///
    /// # Safety
    /// `pa` must be a live, table-aligned frame holding `config.entries_at(level)`
    /// descriptors, reachable through `mapper` for `'t`.
    pub(crate) unsafe fn at<M: PhysMapper>(
        mapper: &'t M,
        pa: PhysicalAddress,
        level: u8,
        config: &TranslationConfig,
    ) -> Self {
        let len = config.entries_at(level);
        // SAFETY: guaranteed by the caller; AtomicU64 has the layout of u64.
        let entries = unsafe {
            let ptr = mapper.phys_to_ptr::<AtomicU64>(pa);
            core::slice::from_raw_parts(ptr.cast_const(), len)
        };
        Self { entries, level }
    }

    pub(crate) fn slot(&self, index: usize) -> EntrySlot<'t> {
        EntrySlot {
            entry: &self.entries[index],
            level: self.level,
        }
    }
}

/// A single descriptor inside a table.
#[derive(Copy, Clone)]
pub struct EntrySlot<'t> {
    entry: &'t AtomicU64,
    level: u8,
}

impl EntrySlot<'_> {
    /// Level of the table holding this entry.
    #[inline]
    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    #[must_use]
    pub fn read(&self) -> DescriptorBits {
        DescriptorBits::from_bits(self.entry.load(Ordering::Acquire))
    }

    /// Replace the entry with one 64-bit store.
    #[inline]
    pub fn write(&self, bits: DescriptorBits) {
        self.entry.store(bits.into_bits(), Ordering::Release);
    }

    /// Store `new` only if the entry still holds `current`.
    ///
    /// # Errors
    /// The bits actually found, when another writer got there first.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: DescriptorBits,
        new: DescriptorBits,
    ) -> Result<(), DescriptorBits> {
        self.entry
            .compare_exchange(
                current.into_bits(),
                new.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(DescriptorBits::from_bits)
    }

    #[inline]
    #[must_use]
    pub fn decode(&self, config: &TranslationConfig) -> Descriptor {
        Descriptor::decode(self.read(), self.level, config)
    }
}
