//! Architecture hooks.

use crate::percpu::CpuContext;
use crate::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Everything the paging layer needs from the CPU and the boot environment.
///
/// A platform maps table frames ([`PhysMapper`]), hands out zeroed frames
/// ([`FrameAlloc`]) and drives the translation-control registers. All
/// methods act on the **calling** CPU.
pub trait Platform: PhysMapper + FrameAlloc {
    /// Context of the calling CPU.
    fn current_cpu(&self) -> &CpuContext;

    /// Point the translation base at `root` and turn translation on.
    ///
    /// # Safety
    /// `root` must map the currently executing code and stack.
    unsafe fn mmu_enable(&self, root: PhysicalAddress);

    /// Turn translation off.
    ///
    /// # Safety
    /// Code and stack must be identity mapped.
    unsafe fn mmu_disable(&self);

    /// Invalidate TLB entries for the page containing `va` on the calling CPU.
    fn flush_tlb_page(&self, va: VirtualAddress);

    /// Stack pointer of the calling CPU.
    fn current_stack_pointer(&self) -> VirtualAddress;
}
