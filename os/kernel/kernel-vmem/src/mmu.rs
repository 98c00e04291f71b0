//! # Enable/Disable State
//!
//! [`MmuState`] is the process-wide record of which CPUs run with translation
//! off. It is lock-free: lock primitives ask [`Mmu::is_enabled`] before
//! touching memory, so nothing here may take a lock.
//!
//! ```text
//!            enable(t)                  disable()
//!   ┌─────┐ ───────────────► ┌────┐ ───────────────► ┌─────┐
//!   │ OFF │                  │ ON │                  │ OFF │
//!   └─────┘ ◄─────────────── └────┘                  └─────┘
//!   initial     disable()      │ enable(t')
//!                              └──► ON (slot swapped, counter untouched)
//! ```
//!
//! ## Ordering
//!
//! Each CPU writes only its own bit. The bit flip is an atomic RMW, and the
//! cached count moves only on the CPU that observed the bit change, so the
//! count never drifts. Other CPUs may read a stale count or bitmap; the count
//! is a statistic, not a barrier.

use crate::Platform;
use crate::address_space::AddressSpace;
use crate::config::TranslationConfig;
use crate::error::{VmemError, fatal};
use crate::table::TableRoot;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_info::memory::NR_CPUS;
use kernel_sync::{CpuMask, SyncOnceCell};
use log::{debug, info};

/// Disabled-CPU set, its cached population count and the recorded identity map.
pub struct MmuState {
    nr_cpus: usize,
    disabled: CpuMask,
    disabled_count: AtomicUsize,
    idmap: SyncOnceCell<TableRoot>,
}

impl MmuState {
    /// CPUs `0..nr_cpus` start with translation off. No other CPU id is
    /// accepted by the queries and updates below.
    ///
    /// # Panics
    /// If `nr_cpus` exceeds [`CpuMask::CAPACITY`].
    #[must_use]
    pub const fn new(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            disabled: CpuMask::first(nr_cpus),
            disabled_count: AtomicUsize::new(nr_cpus),
            idmap: SyncOnceCell::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    #[track_caller]
    fn check_cpu(&self, cpu: usize) {
        assert!(cpu < self.nr_cpus, "CPU {cpu} outside the {} tracked CPUs", self.nr_cpus);
    }

    /// # Panics
    /// If `cpu` is not below [`nr_cpus`](Self::nr_cpus); the same holds for
    /// the updates below.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn is_disabled(&self, cpu: usize) -> bool {
        self.check_cpu(cpu);
        self.disabled.test(cpu)
    }

    /// Record that `cpu` runs with translation on.
    ///
    /// Only `cpu` itself (or code seeding its state before it runs) may call this.
    #[track_caller]
    pub fn mark_enabled(&self, cpu: usize) {
        self.check_cpu(cpu);
        if self.disabled.test_and_clear(cpu) {
            self.disabled_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Record that `cpu` runs with translation off.
    #[track_caller]
    pub fn mark_disabled(&self, cpu: usize) {
        self.check_cpu(cpu);
        if !self.disabled.test_and_set(cpu) {
            self.disabled_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Number of CPUs with translation off, as last published.
    #[inline]
    #[must_use]
    pub fn disabled_cpu_count(&self) -> usize {
        self.disabled_count.load(Ordering::Acquire)
    }

    /// Raw disabled bitmap.
    #[inline]
    #[must_use]
    pub fn disabled_mask(&self) -> u64 {
        self.disabled.bits()
    }

    /// The identity map built by [`Mmu::build_identity_map`], if any.
    #[inline]
    #[must_use]
    pub fn idmap(&self) -> Option<TableRoot> {
        self.idmap.get().copied()
    }

    /// Returns `false` if an identity map was already recorded.
    pub(crate) fn record_idmap(&self, root: TableRoot) -> bool {
        self.idmap.set(root).is_ok()
    }
}

impl Default for MmuState {
    /// State for the guest's [`NR_CPUS`] CPUs.
    fn default() -> Self {
        Self::new(NR_CPUS)
    }
}

/// Paging operations of one platform, bound to the shared [`MmuState`] and
/// the [`TranslationConfig`] resolved at startup.
pub struct Mmu<'p, P: Platform> {
    pub(crate) platform: &'p P,
    pub(crate) state: &'p MmuState,
    pub(crate) config: TranslationConfig,
}

impl<'p, P: Platform> Mmu<'p, P> {
    #[must_use]
    pub const fn new(platform: &'p P, state: &'p MmuState, config: TranslationConfig) -> Self {
        Self {
            platform,
            state,
            config,
        }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &TranslationConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> &'p MmuState {
        self.state
    }

    /// Walker over the tree rooted at `root`.
    #[inline]
    #[must_use]
    pub fn address_space(&self, root: TableRoot) -> AddressSpace<'p, P> {
        AddressSpace::from_root(self.platform, root, self.config)
    }

    /// Whether translation is on for the calling CPU.
    ///
    /// Reads one bit of the calling CPU's own state; safe to call from lock
    /// primitives.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.state.is_disabled(self.platform.current_cpu().cpu())
    }

    /// Turn translation on for the calling CPU with `root` as its table.
    ///
    /// Enabling while already on swaps the active table and reissues the
    /// architecture sequence; the disabled count is untouched.
    ///
    /// # Safety
    /// `root` must map the code and stack the calling CPU is running on.
    pub unsafe fn enable(&self, root: TableRoot) {
        let ctx = self.platform.current_cpu();
        // SAFETY: forwarded from the caller.
        unsafe { self.platform.mmu_enable(root.base()) };
        ctx.set_active_table(root);
        self.state.mark_enabled(ctx.cpu());
        info!("CPU {}: MMU on, table {:?}", ctx.cpu(), root.base());
    }

    /// Turn translation off for the calling CPU.
    ///
    /// Halts with [`VmemError::StackNotIdentityMapped`] if the current stack
    /// would not survive the switch.
    pub fn disable(&self) {
        let sp = self.platform.current_stack_pointer();
        let pa = self.virt_to_phys(sp);
        if pa.as_u64() != sp.as_u64() {
            fatal(VmemError::StackNotIdentityMapped { sp, pa });
        }

        let cpu = self.platform.current_cpu().cpu();
        self.state.mark_disabled(cpu);
        // SAFETY: the stack is identity mapped (checked above); code is
        // covered by the identity map it was enabled with.
        unsafe { self.platform.mmu_disable() };
        info!("CPU {cpu}: MMU off");
    }

    /// Enable the recorded identity map on the calling CPU (secondary bring-up).
    ///
    /// # Safety
    /// As for [`enable`](Self::enable).
    pub unsafe fn enable_idmap(&self) -> TableRoot {
        let Some(root) = self.state.idmap() else {
            fatal(VmemError::NoIdentityMap);
        };
        debug!("CPU {}: joining identity map", self.platform.current_cpu().cpu());
        // SAFETY: forwarded from the caller.
        unsafe { self.enable(root) };
        root
    }
}
