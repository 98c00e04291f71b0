//! Address translation and access revocation.

use crate::Platform;
use crate::error::{OrFatal, VmemError, fatal};
use crate::mmu::Mmu;
use crate::table::TableRoot;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::trace;

impl<P: Platform> Mmu<'_, P> {
    /// Physical address of `va` in the tree at `root`. Halts if unmapped.
    #[track_caller]
    pub fn lookup(&self, root: TableRoot, va: VirtualAddress) -> PhysicalAddress {
        self.address_space(root).try_lookup(va).or_fatal()
    }

    /// Physical address of the byte `ptr` points at.
    #[track_caller]
    pub fn lookup_physical<T>(&self, root: TableRoot, ptr: *const T) -> PhysicalAddress {
        self.lookup(root, VirtualAddress::from_ptr(ptr))
    }

    /// Translate through the calling CPU's active table, or return `va`
    /// unchanged while translation is off.
    #[track_caller]
    pub fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        if !self.is_enabled() {
            return va.identity();
        }
        let ctx = self.platform.current_cpu();
        let Some(root) = ctx.active_table() else {
            fatal(VmemError::NoActiveTable { cpu: ctx.cpu() });
        };
        self.lookup(root, va)
    }

    /// Identity inverse of [`virt_to_phys`](Self::virt_to_phys).
    ///
    /// While translation is on, halts unless `pa` is identity mapped.
    #[track_caller]
    pub fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        let va = VirtualAddress::from(pa);
        if self.is_enabled() {
            let back = self.virt_to_phys(va);
            if back != pa {
                fatal(VmemError::NotIdentityMapped { va, pa: back });
            }
        }
        va
    }

    /// Revoke unprivileged access to the mapping covering `va`.
    ///
    /// Clears the user bit of the block or page descriptor in place. Does
    /// nothing while translation is off on the calling CPU; halts if `va` has
    /// no valid mapping.
    #[track_caller]
    pub fn demote_to_privileged(&self, root: TableRoot, va: VirtualAddress) {
        if !self.is_enabled() {
            return;
        }
        let slot = self.address_space(root).try_find_mapping(va).or_fatal();
        let bits = slot.read().with_user(false);
        slot.write(bits);
        self.platform.flush_tlb_page(va);
        trace!("{va:?} demoted at level {}", slot.level());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationConfig;
    use crate::descriptor::Protection;
    use crate::mmu::MmuState;
    use crate::testing::{TestPlatform, set_current_cpu};

    const CFG: TranslationConfig = TranslationConfig::AARCH64_4K;

    #[test]
    fn lookup_physical_keeps_the_page_offset() {
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();

        let va = VirtualAddress::new(0x40_0000_2000);
        mmu.install_page_default(root, PhysicalAddress::new(0x8765_4000), va);
        let ptr = core::ptr::without_provenance::<u32>(0x40_0000_2abc);
        assert_eq!(mmu.lookup_physical(root, ptr), PhysicalAddress::new(0x8765_4abc));
    }

    #[test]
    #[should_panic(expected = "is not mapped")]
    fn lookup_of_unmapped_address_is_fatal() {
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();
        let _ = mmu.lookup(root, VirtualAddress::new(0x1000));
    }

    #[test]
    fn translation_is_identity_while_disabled() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 1, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);

        let va = VirtualAddress::new(0xdead_b000);
        assert_eq!(mmu.virt_to_phys(va), PhysicalAddress::new(0xdead_b000));
        assert_eq!(mmu.phys_to_virt(PhysicalAddress::new(0xdead_b000)), va);
    }

    #[test]
    fn translation_uses_the_active_table() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();

        let va = VirtualAddress::new(0x4000_0000);
        mmu.install_page_default(root, PhysicalAddress::new(0x4000_0000), va);
        mmu.install_page_default(root, PhysicalAddress::new(0x9000_0000), va + 0x1000);
        unsafe { mmu.enable(root) };

        assert_eq!(mmu.virt_to_phys(va + 8), PhysicalAddress::new(0x4000_0008));
        assert_eq!(mmu.virt_to_phys(va + 0x1008), PhysicalAddress::new(0x9000_0008));
        assert_eq!(mmu.phys_to_virt(PhysicalAddress::new(0x4000_0010)), va + 0x10);
    }

    #[test]
    #[should_panic(expected = "not identity mapped")]
    fn phys_to_virt_rejects_non_identity_pages() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();

        mmu.install_page_default(root, PhysicalAddress::new(0x9000_0000), VirtualAddress::new(0x4000_0000));
        unsafe { mmu.enable(root) };
        let _ = mmu.phys_to_virt(PhysicalAddress::new(0x4000_0000));
    }

    #[test]
    fn demote_clears_user_on_pages_and_sections() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();

        let page = VirtualAddress::new(0x4000_3000);
        mmu.install_page(root, page.identity(), page, Protection::DATA);
        mmu.map_sections(
            root,
            VirtualAddress::new(0x8000_0000),
            PhysicalAddress::new(0x8000_0000),
            PhysicalAddress::new(0xc000_0000),
            Protection::DATA,
        );
        unsafe { mmu.enable(root) };
        platform.clear_flushes();

        mmu.demote_to_privileged(root, page + 0x10);
        mmu.demote_to_privileged(root, VirtualAddress::new(0x8123_4000));

        let space = mmu.address_space(root);
        let pte = space.page(page).unwrap();
        assert!(!pte.is_user());
        assert_eq!(pte.protection(CFG.format()), Some(Protection::DATA.with_user(false)));
        assert!(!space.block(VirtualAddress::new(0x8000_0000)).unwrap().is_user());
        assert_eq!(
            platform.flushes(),
            [page + 0x10, VirtualAddress::new(0x8123_4000)]
        );
    }

    #[test]
    fn demote_is_a_no_op_while_disabled() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();

        let va = VirtualAddress::new(0x4000_0000);
        mmu.install_page_default(root, va.identity(), va);
        platform.clear_flushes();

        mmu.demote_to_privileged(root, va);
        assert!(mmu.address_space(root).page(va).unwrap().is_user());
        assert!(platform.flushes().is_empty());
        // Unmapped addresses are not even looked at.
        mmu.demote_to_privileged(root, VirtualAddress::new(0x5000_0000));
    }

    #[test]
    #[should_panic(expected = "is not mapped")]
    fn demote_of_unmapped_address_is_fatal() {
        set_current_cpu(0);
        let platform = TestPlatform::new(&CFG, 8, 1);
        let state = MmuState::new(1);
        let mmu = Mmu::new(&platform, &state, CFG);
        let root = platform.new_root();
        unsafe { mmu.enable(root) };
        mmu.demote_to_privileged(root, VirtualAddress::new(0x4000_0000));
    }
}
