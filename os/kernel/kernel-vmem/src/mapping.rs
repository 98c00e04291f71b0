//! Installing page and section mappings.
//!
//! Every write replaces a whole descriptor in one store and is followed by a
//! TLB invalidation for the covered address **on the calling CPU only**.
//! Other CPUs sharing the table keep whatever they cached; there is no
//! shootdown.

use crate::Platform;
use crate::descriptor::{BlockDescriptor, DescriptorBits, PageDescriptor, Protection};
use crate::error::OrFatal;
use crate::mmu::Mmu;
use crate::table::TableRoot;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, trace};

impl<P: Platform> Mmu<'_, P> {
    /// Write `bits` into the leaf slot for `va`, creating missing tables.
    ///
    /// A block split on the way is flushed at its base VA before the leaf is
    /// written. Halts if `va` is out of range or a table frame cannot be
    /// allocated.
    #[track_caller]
    pub fn install_leaf(&self, root: TableRoot, va: VirtualAddress, bits: DescriptorBits) -> DescriptorBits {
        let slot = self
            .address_space(root)
            .try_locate_leaf_with(self.platform, va, |block_va| {
                self.platform.flush_tlb_page(block_va);
            })
            .or_fatal();
        slot.write(bits);
        self.platform.flush_tlb_page(va);
        trace!("{va:?} <- {:#018x}", bits.into_bits());
        bits
    }

    /// Map the page at `va` to `phys` with `prot`.
    ///
    /// Any previous mapping of `va` is overwritten.
    #[track_caller]
    pub fn install_page(
        &self,
        root: TableRoot,
        phys: PhysicalAddress,
        va: VirtualAddress,
        prot: Protection,
    ) -> PageDescriptor {
        let pte = PageDescriptor::new(phys, prot, self.config.format());
        self.install_leaf(root, va, pte.bits());
        pte
    }

    /// [`install_page`](Self::install_page) with [`Protection::DEFAULT`].
    #[track_caller]
    pub fn install_page_default(&self, root: TableRoot, phys: PhysicalAddress, va: VirtualAddress) -> PageDescriptor {
        self.install_page(root, phys, va, Protection::DEFAULT)
    }

    /// Map `[phys_start, phys_end)` page by page starting at `virt_offset`.
    ///
    /// `phys_start` and `virt_offset` are rounded down to a page; a partial
    /// last page is mapped whole. Returns the number of pages installed.
    #[track_caller]
    pub fn map_pages(
        &self,
        root: TableRoot,
        virt_offset: VirtualAddress,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
        prot: Protection,
    ) -> usize {
        let page = self.config.page_size();
        let mut pa = phys_start.align_down(page);
        let mut va = virt_offset.align_down(page);
        if phys_end <= pa {
            return 0;
        }
        let virt_end = va + (phys_end - pa);

        debug!("map pages {va:?}..{virt_end:?} -> {pa:?} {prot:?}");
        let mut count = 0;
        while va < virt_end {
            self.install_page(root, pa, va, prot);
            va += page;
            pa += page;
            count += 1;
        }
        count
    }

    /// Map `[phys_start, phys_end)` with top-level block descriptors.
    ///
    /// Same rounding as [`map_pages`](Self::map_pages) at section
    /// granularity. No intermediate tables are allocated. Returns the number
    /// of sections installed.
    pub fn map_sections(
        &self,
        root: TableRoot,
        virt_offset: VirtualAddress,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
        prot: Protection,
    ) -> usize {
        let section = self.config.section_size();
        let mut pa = phys_start.align_down(section);
        let mut va = virt_offset.align_down(section);
        if phys_end <= pa {
            return 0;
        }
        let virt_end = va + (phys_end - pa);

        debug!("map sections {va:?}..{virt_end:?} -> {pa:?} {prot:?}");
        let space = self.address_space(root);
        let mut count = 0;
        while va < virt_end {
            let block = BlockDescriptor::new(pa, prot, self.config.format());
            space.try_top_entry(va).or_fatal().write(block.bits());
            self.platform.flush_tlb_page(va);
            trace!("{va:?} <- section {pa:?}");
            va += section;
            pa += section;
            count += 1;
        }
        count
    }
}
