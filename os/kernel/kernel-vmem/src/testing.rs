//! Host-side [`Platform`] for unit tests.
//!
//! Page-table frames live in a heap buffer presented as physical memory at
//! [`MEM_BASE`]. The "current CPU" is chosen per thread, and every call into
//! the architecture hooks is recorded.

use crate::config::TranslationConfig;
use crate::percpu::CpuContext;
use crate::table::TableRoot;
use crate::{FrameAlloc, PhysMapper, Platform};
use core::cell::Cell;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use std::sync::Mutex;

/// Physical address of the first simulated frame; far above anything the
/// tests identity map.
pub const MEM_BASE: u64 = 0x10_0000_0000;

/// Default stack pointer, inside the RAM the scenarios identity map.
pub const DEFAULT_SP: u64 = 0x4008_0f00;

thread_local! {
    static CURRENT_CPU: Cell<usize> = const { Cell::new(0) };
}

/// Make the calling thread act as `cpu`.
pub fn set_current_cpu(cpu: usize) {
    CURRENT_CPU.with(|c| c.set(cpu));
}

pub struct TestPlatform {
    memory: Box<[AtomicU64]>,
    frame_words: usize,
    frames: usize,
    next_frame: AtomicUsize,
    free: Mutex<Vec<PhysicalAddress>>,
    cpus: Vec<CpuContext>,
    stack_pointer: AtomicU64,
    enables: Mutex<Vec<(usize, PhysicalAddress)>>,
    disables: Mutex<Vec<usize>>,
    flushes: Mutex<Vec<VirtualAddress>>,
}

impl TestPlatform {
    /// `frames` table frames of `config`'s granule, `nr_cpus` CPU contexts.
    pub fn new(config: &TranslationConfig, frames: usize, nr_cpus: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let frame_words = (config.page_size() / 8) as usize;
        Self {
            memory: (0..frames * frame_words).map(|_| AtomicU64::new(0)).collect(),
            frame_words,
            frames,
            next_frame: AtomicUsize::new(0),
            free: Mutex::new(Vec::new()),
            cpus: (0..nr_cpus).map(CpuContext::new).collect(),
            stack_pointer: AtomicU64::new(DEFAULT_SP),
            enables: Mutex::new(Vec::new()),
            disables: Mutex::new(Vec::new()),
            flushes: Mutex::new(Vec::new()),
        }
    }

    /// A fresh, empty root table.
    pub fn new_root(&self) -> TableRoot {
        TableRoot::new(self.alloc_zeroed().expect("frame for root table"))
    }

    /// Distinct frames handed out so far; a released frame handed out
    /// again is counted once.
    pub fn frames_used(&self) -> usize {
        self.next_frame.load(Ordering::Relaxed).min(self.frames)
    }

    /// Frames handed out and not released.
    pub fn frames_live(&self) -> usize {
        self.frames_used() - self.free.lock().unwrap().len()
    }

    pub fn cpu(&self, cpu: usize) -> &CpuContext {
        &self.cpus[cpu]
    }

    pub fn set_stack_pointer(&self, sp: u64) {
        self.stack_pointer.store(sp, Ordering::Relaxed);
    }

    pub fn enables(&self) -> Vec<(usize, PhysicalAddress)> {
        self.enables.lock().unwrap().clone()
    }

    pub fn disables(&self) -> Vec<usize> {
        self.disables.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> Vec<VirtualAddress> {
        self.flushes.lock().unwrap().clone()
    }

    pub fn clear_flushes(&self) {
        self.flushes.lock().unwrap().clear();
    }
}

impl PhysMapper for TestPlatform {
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        let offset = pa.as_u64().checked_sub(MEM_BASE).expect("address below test memory");
        let index = usize::try_from(offset / 8).expect("offset fits usize");
        assert!(index < self.memory.len(), "{pa:?} outside test memory");
        self.memory[index..].as_ptr().cast_mut().cast()
    }
}

impl FrameAlloc for TestPlatform {
    fn alloc_zeroed(&self) -> Option<PhysicalAddress> {
        if let Some(pa) = self.free.lock().unwrap().pop() {
            return Some(pa);
        }
        let frame = self.next_frame.fetch_add(1, Ordering::Relaxed);
        if frame >= self.frames {
            return None;
        }
        let offset = (frame * self.frame_words * 8) as u64;
        Some(PhysicalAddress::new(MEM_BASE + offset))
    }

    fn release(&self, frame: PhysicalAddress) {
        // SAFETY: `frame` came from `alloc_zeroed` and spans `frame_words`.
        let words = unsafe {
            core::slice::from_raw_parts(self.phys_to_ptr::<AtomicU64>(frame).cast_const(), self.frame_words)
        };
        for word in words {
            word.store(0, Ordering::Relaxed);
        }
        self.free.lock().unwrap().push(frame);
    }
}

impl Platform for TestPlatform {
    fn current_cpu(&self) -> &CpuContext {
        &self.cpus[CURRENT_CPU.with(Cell::get)]
    }

    unsafe fn mmu_enable(&self, root: PhysicalAddress) {
        let cpu = CURRENT_CPU.with(Cell::get);
        self.enables.lock().unwrap().push((cpu, root));
    }

    unsafe fn mmu_disable(&self) {
        let cpu = CURRENT_CPU.with(Cell::get);
        self.disables.lock().unwrap().push(cpu);
    }

    fn flush_tlb_page(&self, va: VirtualAddress) {
        self.flushes.lock().unwrap().push(va);
    }

    fn current_stack_pointer(&self) -> VirtualAddress {
        VirtualAddress::new(self.stack_pointer.load(Ordering::Relaxed))
    }
}
