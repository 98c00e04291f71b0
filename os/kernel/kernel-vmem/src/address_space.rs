//! # Address Space (table walker)
//!
//! A handle to one translation-table tree: its root frame, the mapper used to
//! reach table frames, and the [`TranslationConfig`] that fixes the tree's
//! shape.
//!
//! ## Walks
//!
//! - [`try_locate_leaf`](AddressSpace::try_locate_leaf) descends to the leaf
//!   slot of a VA, allocating every missing intermediate table on the way.
//! - [`try_find_mapping`](AddressSpace::try_find_mapping) descends without
//!   allocating and stops at the first block or page descriptor.
//! - [`lookup`](AddressSpace::lookup) resolves a VA to its physical address
//!   (block mappings included) without allocating.
//!
//! ## Splitting
//!
//! A block met on the way down to a leaf is split: a fresh next-level table
//! is filled with descriptors covering the same range with the same
//! attributes, then linked in place of the block. The block is swapped for
//! the table directly, without an invalid entry in between, so the range
//! never faults while the split is in progress. Stale TLB entries for the
//! block are the caller's to flush (see
//! [`try_locate_leaf_with`](AddressSpace::try_locate_leaf_with)).
//!
//! ## Range
//!
//! Table indices are masked per level. Every walk first checks the VA against
//! [`TranslationConfig::covers`] so that a VA above the input range is
//! rejected instead of aliasing a lower entry.

use crate::config::TranslationConfig;
use crate::descriptor::{
    BlockDescriptor, Descriptor, PageDescriptor, TableDescriptor,
};
use crate::error::{OrFatal, VmemError};
use crate::table::{EntrySlot, Table, TableRoot};
use crate::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, trace};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: TableRoot,
    mapper: &'m M,
    config: TranslationConfig,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the tree rooted at `root`.
    ///
    /// `root` must be a table frame laid out per `config` (for example one
    /// returned by a [`FrameAlloc`] and possibly populated by earlier walks).
    #[inline]
    pub const fn from_root(mapper: &'m M, root: TableRoot, config: TranslationConfig) -> Self {
        Self {
            root,
            mapper,
            config,
        }
    }

    #[inline]
    pub const fn root(&self) -> TableRoot {
        self.root
    }

    #[inline]
    pub const fn config(&self) -> &TranslationConfig {
        &self.config
    }

    fn table(&self, pa: PhysicalAddress, level: u8) -> Table<'m> {
        // SAFETY: `pa` is the root or the output of a table descriptor in this
        // tree; both are live frames of the configured geometry.
        unsafe { Table::at(self.mapper, pa, level, &self.config) }
    }

    /// Top-level slot covering `va` (where sections live).
    ///
    /// # Errors
    /// [`VmemError::OutOfRange`] if `va` is above the translated input range.
    pub fn try_top_entry(&self, va: VirtualAddress) -> Result<EntrySlot<'m>, VmemError> {
        if !self.config.covers(va) {
            return Err(VmemError::OutOfRange { va });
        }
        Ok(self.table(self.root.base(), 0).slot(self.config.index(0, va)))
    }

    /// Leaf slot for `va`, creating intermediate tables as needed.
    ///
    /// The returned slot may still be invalid.
    ///
    /// # Errors
    /// - [`VmemError::OutOfRange`] if `va` is above the translated input range.
    /// - [`VmemError::OutOfFrames`] with the level of the table that could not
    ///   be allocated. Tables linked before the failure stay linked.
    pub fn try_locate_leaf<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<EntrySlot<'m>, VmemError> {
        self.try_locate_leaf_with(alloc, va, |_| {})
    }

    /// [`try_locate_leaf`](Self::try_locate_leaf), calling `on_split` with
    /// the base VA of every block replaced by a table on the way down.
    ///
    /// The split table maps the same range, but TLB entries for the old block
    /// stay live until invalidated; `on_split` runs right after the table is
    /// linked so the caller can flush them.
    ///
    /// # Errors
    /// As for [`try_locate_leaf`](Self::try_locate_leaf).
    pub fn try_locate_leaf_with<A, F>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        mut on_split: F,
    ) -> Result<EntrySlot<'m>, VmemError>
    where
        A: FrameAlloc + ?Sized,
        F: FnMut(VirtualAddress),
    {
        if !self.config.covers(va) {
            return Err(VmemError::OutOfRange { va });
        }
        let leaf = self.config.leaf_level();
        let mut table = self.table(self.root.base(), 0);

        for level in 0..leaf {
            let slot = table.slot(self.config.index(level, va));
            let next = self.link_table(alloc, slot, va, &mut on_split)?;
            table = self.table(next, level + 1);
        }

        Ok(table.slot(self.config.index(leaf, va)))
    }

    /// Next-level table below `slot`, linking a new one if the slot is
    /// invalid or holds a block.
    ///
    /// Several CPUs may walk the same path at once. A table is published with
    /// a compare-exchange against the descriptor it replaces; the loser
    /// releases its frame and continues with whatever the winner linked.
    fn link_table<A, F>(
        &self,
        alloc: &A,
        slot: EntrySlot<'m>,
        va: VirtualAddress,
        on_split: &mut F,
    ) -> Result<PhysicalAddress, VmemError>
    where
        A: FrameAlloc + ?Sized,
        F: FnMut(VirtualAddress),
    {
        let level = slot.level();
        loop {
            let current = slot.read();
            let (frame, split) = match Descriptor::decode(current, level, &self.config) {
                Descriptor::Table(t) => return Ok(t.next_table()),
                Descriptor::Invalid => {
                    let frame = alloc
                        .alloc_zeroed()
                        .ok_or(VmemError::OutOfFrames { level: level + 1 })?;
                    (frame, false)
                }
                Descriptor::Block(block) => (self.split_block(alloc, block, level)?, true),
                Descriptor::Page(_) => unreachable!("page descriptor above the leaf level"),
            };

            if let Err(found) = slot.compare_exchange(current, TableDescriptor::new(frame).bits()) {
                alloc.release(frame);
                trace!("level {level} entry for {va:?} changed to {found:?}, retrying");
                continue;
            }

            if split {
                let block_va = va.align_down(self.config.level_size(level));
                debug!("split level {level} block at {block_va:?} into table {frame:?}");
                on_split(block_va);
            } else {
                trace!("level {} table at {frame:?} for {va:?}", level + 1);
            }
            return Ok(frame);
        }
    }

    /// Fatal form of [`try_locate_leaf`](Self::try_locate_leaf).
    #[track_caller]
    pub fn locate_leaf<A: FrameAlloc + ?Sized>(&self, alloc: &A, va: VirtualAddress) -> EntrySlot<'m> {
        self.try_locate_leaf(alloc, va).or_fatal()
    }

    /// Fill a fresh level `level + 1` table with the mapping of `block`.
    fn split_block<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        block: BlockDescriptor,
        level: u8,
    ) -> Result<PhysicalAddress, VmemError> {
        let child = level + 1;
        let frame = alloc
            .alloc_zeroed()
            .ok_or(VmemError::OutOfFrames { level: child })?;
        let table = self.table(frame, child);
        let stride = self.config.level_size(child);
        let base = block.output_address();
        let leaf = child == self.config.leaf_level();

        let mut pa = base;
        for index in 0..self.config.entries_at(child) {
            // Same attribute bits, new output address and type.
            let bits = block
                .bits()
                .with_output_address(pa)
                .with_table_or_page(leaf);
            table.slot(index).write(bits);
            pa += stride;
        }
        Ok(frame)
    }

    /// Block or page slot currently mapping `va`. Never allocates.
    ///
    /// # Errors
    /// - [`VmemError::OutOfRange`] if `va` is above the translated input range.
    /// - [`VmemError::NotMapped`] naming the level at which the walk found an
    ///   invalid descriptor.
    pub fn try_find_mapping(&self, va: VirtualAddress) -> Result<EntrySlot<'m>, VmemError> {
        if !self.config.covers(va) {
            return Err(VmemError::OutOfRange { va });
        }
        let mut table = self.table(self.root.base(), 0);
        let mut level = 0;
        loop {
            let slot = table.slot(self.config.index(level, va));
            match slot.decode(&self.config) {
                Descriptor::Table(t) => {
                    level += 1;
                    table = self.table(t.next_table(), level);
                }
                Descriptor::Block(_) | Descriptor::Page(_) => return Ok(slot),
                Descriptor::Invalid => return Err(VmemError::NotMapped { va, level }),
            }
        }
    }

    /// Physical address `va` translates to. Never allocates.
    ///
    /// Block mappings keep the offset within the block.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] if no valid mapping covers `va`.
    pub fn try_lookup(&self, va: VirtualAddress) -> Result<PhysicalAddress, VmemError> {
        let slot = self.try_find_mapping(va)?;
        let base = match slot.decode(&self.config) {
            Descriptor::Block(b) => b.output_address(),
            Descriptor::Page(p) => p.output_address(),
            Descriptor::Table(_) | Descriptor::Invalid => {
                return Err(VmemError::NotMapped {
                    va,
                    level: slot.level(),
                });
            }
        };
        Ok(base.join(va.offset(self.config.level_size(slot.level()))))
    }

    /// Physical address `va` translates to, if mapped.
    #[inline]
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.try_lookup(va).ok()
    }

    /// Page descriptor for `va`, if `va` is mapped at page granularity.
    #[must_use]
    pub fn page(&self, va: VirtualAddress) -> Option<PageDescriptor> {
        match self.try_find_mapping(va).ok()?.decode(&self.config) {
            Descriptor::Page(p) => Some(p),
            _ => None,
        }
    }

    /// Block descriptor for `va`, if `va` is covered by a block.
    #[must_use]
    pub fn block(&self, va: VirtualAddress) -> Option<BlockDescriptor> {
        match self.try_find_mapping(va).ok()?.decode(&self.config) {
            Descriptor::Block(b) => Some(b),
            _ => None,
        }
    }
}
