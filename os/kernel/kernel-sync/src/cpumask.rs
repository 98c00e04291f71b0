use core::sync::atomic::{AtomicU64, Ordering};

/// Lock-free set of CPU ids, one bit per CPU (up to 64 CPUs).
///
/// Meant for state that each CPU updates only for **itself** (single writer
/// per bit) while any CPU may read. No operation here takes a lock, so the
/// mask can back state that lock primitives themselves consult.
///
/// ### Ordering
/// - [`test`](Self::test) is a plain relaxed load. A CPU always observes its
///   own prior writes; other CPUs' bits may be stale.
/// - [`test_and_set`](Self::test_and_set) / [`test_and_clear`](Self::test_and_clear)
///   are atomic read-modify-writes with `AcqRel` ordering, so concurrent
///   updates of different bits never lose each other.
pub struct CpuMask {
    bits: AtomicU64,
}

impl CpuMask {
    /// Highest number of CPUs a mask can track.
    pub const CAPACITY: usize = u64::BITS as usize;

    /// An empty mask.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// A mask with CPUs `0..n` set.
    ///
    /// # Panics
    /// Panics (at compile time in const context) if `n` exceeds [`CAPACITY`](Self::CAPACITY).
    #[must_use]
    pub const fn first(n: usize) -> Self {
        assert!(n <= Self::CAPACITY, "too many CPUs for CpuMask");
        let bits = if n == Self::CAPACITY {
            u64::MAX
        } else {
            (1u64 << n) - 1
        };
        Self {
            bits: AtomicU64::new(bits),
        }
    }

    #[inline(always)]
    #[track_caller]
    fn bit(cpu: usize) -> u64 {
        assert!(cpu < Self::CAPACITY, "CPU {cpu} exceeds CpuMask capacity");
        1u64 << cpu
    }

    /// Whether `cpu` is in the set.
    ///
    /// # Panics
    /// If `cpu` is not below [`CAPACITY`](Self::CAPACITY); the same holds for
    /// the updates below.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn test(&self, cpu: usize) -> bool {
        self.bits.load(Ordering::Relaxed) & Self::bit(cpu) != 0
    }

    /// Add `cpu`; returns whether it was already present.
    #[inline]
    #[track_caller]
    pub fn test_and_set(&self, cpu: usize) -> bool {
        let bit = Self::bit(cpu);
        self.bits.fetch_or(bit, Ordering::AcqRel) & bit != 0
    }

    /// Remove `cpu`; returns whether it was present.
    #[inline]
    #[track_caller]
    pub fn test_and_clear(&self, cpu: usize) -> bool {
        let bit = Self::bit(cpu);
        self.bits.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Number of CPUs in the set.
    #[inline]
    #[must_use]
    pub fn weight(&self) -> usize {
        self.bits.load(Ordering::Acquire).count_ones() as usize
    }

    /// Raw bitmap snapshot.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CpuMask({:#b})", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sets_low_bits() {
        assert_eq!(CpuMask::first(0).bits(), 0);
        assert_eq!(CpuMask::first(3).bits(), 0b111);
        assert_eq!(CpuMask::first(64).bits(), u64::MAX);
    }

    #[test]
    fn test_and_set_reports_previous_state() {
        let m = CpuMask::new();
        assert!(!m.test_and_set(5));
        assert!(m.test(5));
        assert!(m.test_and_set(5));
        assert_eq!(m.weight(), 1);
    }

    #[test]
    fn test_and_clear_reports_previous_state() {
        let m = CpuMask::first(2);
        assert!(m.test_and_clear(1));
        assert!(!m.test_and_clear(1));
        assert!(m.test(0));
        assert!(!m.test(1));
        assert_eq!(m.weight(), 1);
    }

    #[test]
    fn last_bit_is_usable() {
        let m = CpuMask::new();
        assert!(!m.test_and_set(63));
        assert_eq!(m.bits(), 1 << 63);
    }

    #[test]
    #[should_panic(expected = "CPU 64 exceeds CpuMask capacity")]
    fn cpu_beyond_capacity_is_rejected() {
        let m = CpuMask::first(64);
        let _ = m.test(64);
    }
}
