//! Per-CPU paging context.

use crate::table::TableRoot;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::PhysicalAddress;

const NO_TABLE: u64 = u64::MAX;

/// Paging state owned by one CPU: its number and the table it runs on.
///
/// The table slot is written only by the owning CPU (in
/// [`Mmu::enable`](crate::Mmu::enable)) but may be read by others.
#[derive(Debug)]
pub struct CpuContext {
    cpu: usize,
    pgtable: AtomicU64,
}

impl CpuContext {
    #[must_use]
    pub const fn new(cpu: usize) -> Self {
        Self {
            cpu,
            pgtable: AtomicU64::new(NO_TABLE),
        }
    }

    #[inline]
    #[must_use]
    pub const fn cpu(&self) -> usize {
        self.cpu
    }

    /// Table most recently enabled on this CPU.
    #[must_use]
    pub fn active_table(&self) -> Option<TableRoot> {
        match self.pgtable.load(Ordering::Acquire) {
            NO_TABLE => None,
            pa => Some(TableRoot::new(PhysicalAddress::new(pa))),
        }
    }

    pub(crate) fn set_active_table(&self, root: TableRoot) {
        self.pgtable.store(root.base().as_u64(), Ordering::Release);
    }
}
