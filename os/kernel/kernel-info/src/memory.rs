//! # Memory Layout

/// Maximum number of CPUs the guest brings up.
pub const NR_CPUS: usize = 8;

/// End of the I/O window that starts at physical address zero.
pub const IO_END: u64 = 1 << 30;

/// Highest physical address covered by the identity map (exclusive).
///
/// Anything above is clamped away; the range up to [`VMALLOC_END`] is left for
/// the dynamic-allocation facility.
pub const IDMAP_END: u64 = 3 << 30;

/// End of the dynamic-allocation window `[IDMAP_END, VMALLOC_END)`.
pub const VMALLOC_END: u64 = 4 << 30;

const _: () = {
    assert!(IO_END < IDMAP_END);
    assert!(IDMAP_END < VMALLOC_END);
    assert!(NR_CPUS <= 64);
};
