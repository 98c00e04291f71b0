//! # Identity Map Construction
//!
//! Builds the guest's boot address space, in which every mapped virtual
//! address equals its physical address:
//!
//! ```text
//!  0                                   IDMAP_END       VMALLOC_END
//!  ├── I/O regions (sections, Device) ──┤
//!            ├─ load_base ── code (pages, RO) ── code_end ── data (pages, RW) ──┤  (reserved)  │
//! ```
//!
//! I/O regions are installed first as sections; the data range starts at the
//! end of code and stops at the clamped limit, so the two never overlap as
//! long as I/O lies below the load base.

use crate::Platform;
use crate::descriptor::Protection;
use crate::error::{VmemError, fatal};
use crate::mmu::Mmu;
use crate::table::TableRoot;
use kernel_info::memory::{IDMAP_END, VMALLOC_END};
use kernel_info::regions::{MemoryRegion, iter_regions};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, info, warn};

/// Where the running image lives and what the physical address map looks like.
#[derive(Copy, Clone, Debug)]
pub struct MemoryLayout<'r> {
    /// First byte of the loaded image.
    pub load_base: PhysicalAddress,
    /// End of the static code (text) section; data follows.
    pub code_end: PhysicalAddress,
    /// Region table; iteration stops at the first sentinel.
    pub regions: &'r [MemoryRegion],
}

impl<'r> MemoryLayout<'r> {
    #[must_use]
    pub const fn new(load_base: PhysicalAddress, code_end: PhysicalAddress, regions: &'r [MemoryRegion]) -> Self {
        Self {
            load_base,
            code_end,
            regions,
        }
    }

    /// Regions flagged as device memory.
    pub fn io_regions(&self) -> impl Iterator<Item = &'r MemoryRegion> {
        iter_regions(self.regions).filter(|r| r.is_io())
    }
}

impl<P: Platform> Mmu<'_, P> {
    /// Build the identity map up to `phys_limit` and enable it on the calling CPU.
    ///
    /// `phys_limit` is clamped to [`IDMAP_END`]; the window above it up to
    /// [`VMALLOC_END`] is left unmapped. The first table built is recorded in
    /// [`MmuState::idmap`](crate::MmuState::idmap) for secondary CPUs.
    ///
    /// Halts if the root or any intermediate table cannot be allocated.
    ///
    /// # Safety
    /// `layout` must describe the running image: the code and the stack of the
    /// calling CPU must lie inside `[load_base, phys_limit)`.
    pub unsafe fn build_identity_map(&self, layout: &MemoryLayout<'_>, phys_limit: PhysicalAddress) -> TableRoot {
        let limit = if phys_limit.as_u64() > IDMAP_END {
            debug!("clamping identity map at {IDMAP_END:#x}, {IDMAP_END:#x}..{VMALLOC_END:#x} reserved");
            PhysicalAddress::new(IDMAP_END)
        } else {
            phys_limit
        };

        let Some(frame) = self.platform.alloc_zeroed() else {
            fatal(VmemError::OutOfFrames { level: 0 });
        };
        let root = TableRoot::new(frame);

        for region in layout.io_regions() {
            debug!("I/O region {:#x}..{:#x}", region.start, region.end);
            self.map_sections(
                root,
                VirtualAddress::new(region.start),
                PhysicalAddress::new(region.start),
                PhysicalAddress::new(region.end),
                Protection::IO,
            );
        }

        let code = self.map_pages(
            root,
            VirtualAddress::from(layout.load_base),
            layout.load_base,
            layout.code_end,
            Protection::CODE,
        );
        let data = self.map_pages(
            root,
            VirtualAddress::from(layout.code_end),
            layout.code_end,
            limit,
            Protection::DATA,
        );

        if !self.state.record_idmap(root) {
            warn!("identity map already built; keeping the first one for secondary CPUs");
        }

        // SAFETY: the code and stack are identity mapped per the caller's contract.
        unsafe { self.enable(root) };
        info!(
            "identity map {:?}: {code} code pages, {data} data pages, limit {limit:?}",
            root.base()
        );
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationConfig;
    use crate::descriptor::{CachePolicy, Protection};
    use crate::mmu::MmuState;
    use crate::testing::TestPlatform;
    use kernel_info::memory::IO_END;
    use kernel_info::regions::MemoryRegion;

    const CFG: TranslationConfig = TranslationConfig::ARM32_LPAE;

    const REGIONS: [MemoryRegion; 3] = [
        MemoryRegion::io(0, IO_END),
        MemoryRegion::ram(IO_END, VMALLOC_END),
        MemoryRegion::SENTINEL,
    ];

    fn layout() -> MemoryLayout<'static> {
        MemoryLayout::new(
            PhysicalAddress::new(IO_END),
            PhysicalAddress::new(0x4001_0000),
            &REGIONS,
        )
    }

    #[test]
    fn builds_clamped_identity_map_and_enables_it() {
        let platform = TestPlatform::new(&CFG, 2048, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);

        let root = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x1_0000_0000)) };
        let space = mmu.address_space(root);

        // I/O: one uncached, privileged-only section.
        let io = space.block(VirtualAddress::new(0x0900_0000)).unwrap();
        assert_eq!(io.protection(CFG.format()), Some(Protection::IO));
        assert_eq!(io.protection(CFG.format()).unwrap().cache, CachePolicy::Device);

        // Code: read-only pages, reachable from both privilege levels.
        for va in [0x4000_0000u64, 0x4000_f000] {
            let pte = space.page(VirtualAddress::new(va)).unwrap();
            assert_eq!(pte.protection(CFG.format()), Some(Protection::CODE));
        }

        // Data: read-write pages up to the clamp.
        for va in [0x4001_0000u64, 0x8000_0000, 0xbfff_f000] {
            let pte = space.page(VirtualAddress::new(va)).unwrap();
            assert_eq!(pte.protection(CFG.format()), Some(Protection::DATA));
        }
        assert_eq!(space.lookup(VirtualAddress::new(0xc000_0000)), None);

        assert_eq!(platform.enables(), [(0, root.base())]);
        assert_eq!(state.idmap(), Some(root));
        assert!(mmu.is_enabled());
        assert_eq!(platform.cpu(0).active_table(), Some(root));
    }

    #[test]
    fn identity_holds_over_the_mapped_range() {
        let platform = TestPlatform::new(&CFG, 2048, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let _ = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x1_0000_0000)) };

        for va in (0..0xc000_0000u64).step_by(0x0100_0000).map(|a| a + 0x0abc) {
            let va = VirtualAddress::new(va);
            assert_eq!(mmu.virt_to_phys(va), va.identity());
        }
    }

    #[test]
    fn limit_below_the_clamp_is_kept() {
        let platform = TestPlatform::new(&CFG, 16, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);

        let root = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x4002_0000)) };
        let space = mmu.address_space(root);
        assert!(space.page(VirtualAddress::new(0x4001_f000)).is_some());
        assert_eq!(space.lookup(VirtualAddress::new(0x4002_0000)), None);
    }

    #[test]
    fn second_identity_map_keeps_the_first_record() {
        let platform = TestPlatform::new(&CFG, 32, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);

        let first = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x4002_0000)) };
        let second = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x4002_0000)) };
        assert_ne!(first, second);
        assert_eq!(state.idmap(), Some(first));
        assert_eq!(platform.cpu(0).active_table(), Some(second));
    }

    #[test]
    #[should_panic(expected = "is outside the translated input range")]
    fn io_region_above_the_input_range_is_fatal() {
        const HIGH_IO: [MemoryRegion; 4] = [
            MemoryRegion::io(0, IO_END),
            MemoryRegion::ram(IO_END, VMALLOC_END),
            MemoryRegion::io(VMALLOC_END, VMALLOC_END + IO_END),
            MemoryRegion::SENTINEL,
        ];
        let platform = TestPlatform::new(&CFG, 16, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let layout = MemoryLayout::new(PhysicalAddress::new(IO_END), PhysicalAddress::new(0x4001_0000), &HIGH_IO);
        let _ = unsafe { mmu.build_identity_map(&layout, PhysicalAddress::new(0x4002_0000)) };
    }

    #[test]
    #[should_panic(expected = "out of page-table frames (level 0)")]
    fn no_frame_for_the_root_is_fatal() {
        let platform = TestPlatform::new(&CFG, 0, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let _ = unsafe { mmu.build_identity_map(&layout(), PhysicalAddress::new(0x4002_0000)) };
    }
}
