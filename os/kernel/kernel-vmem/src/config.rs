//! # Translation Configuration
//!
//! The single record describing the translation regime: granule (page size),
//! table depth, input-address width and descriptor format. It is resolved once
//! at startup ([`TranslationConfig::for_target`]) and handed by value to every
//! component; nothing below branches on the target per call.
//!
//! ## Levels
//!
//! Levels are numbered from the **root**: level `0` is the top-level table,
//! level [`leaf_level`](TranslationConfig::leaf_level) holds page descriptors.
//! (The architecture numbers the same tables by their lookup level, e.g. L1–L3
//! for a three-level 4 KiB regime; the numbering here is independent of where
//! the walk starts.)
//!
//! ```text
//! AARCH64_4K / ARM32_LPAE     | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//!                             | top   | mid   | leaf  | offset |
//!
//! AARCH64_64K                 | 41‒29 | 28‒16 | 15‒0   |
//!                             | top   | leaf  | offset |
//! ```

use kernel_memory_addresses::VirtualAddress;

/// Table-entry encoding family.
///
/// Both use 64-bit long descriptors with identical bit positions; they differ
/// in how memory attributes are indexed (see [`CachePolicy`](crate::CachePolicy)).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorFormat {
    /// ARMv7 Large Physical Address Extension (32-bit CPU).
    Arm32Lpae,
    /// ARMv8-A VMSAv8-64.
    Aarch64,
}

/// Granule, depth and format of one translation regime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TranslationConfig {
    page_shift: u32,
    levels: u8,
    input_bits: u32,
    format: DescriptorFormat,
}

impl TranslationConfig {
    /// 32-bit ARM with LPAE: 4 KiB pages, 3 levels, 1 GiB sections, 4-entry root.
    pub const ARM32_LPAE: Self = Self::new(12, 3, 32, DescriptorFormat::Arm32Lpae);

    /// AArch64, 4 KiB granule, 39-bit VA: 3 levels, 1 GiB sections.
    pub const AARCH64_4K: Self = Self::new(12, 3, 39, DescriptorFormat::Aarch64);

    /// AArch64, 64 KiB granule, 42-bit VA: 2 levels, 512 MiB sections.
    pub const AARCH64_64K: Self = Self::new(16, 2, 42, DescriptorFormat::Aarch64);

    /// Build and validate a configuration.
    ///
    /// # Panics
    /// If the granule is not 4/16/64 KiB, the depth is outside `2..=4`, or the
    /// input width does not fit the root level.
    #[must_use]
    pub const fn new(page_shift: u32, levels: u8, input_bits: u32, format: DescriptorFormat) -> Self {
        assert!(
            page_shift == 12 || page_shift == 14 || page_shift == 16,
            "unsupported granule"
        );
        assert!(levels >= 2 && levels <= 4, "unsupported table depth");
        let cfg = Self {
            page_shift,
            levels,
            input_bits,
            format,
        };
        let top = cfg.level_shift(0);
        assert!(
            input_bits > top && input_bits <= top + cfg.bits_per_level(),
            "input width does not fit the root level"
        );
        assert!(input_bits <= 48, "input width beyond 48 bits");
        cfg
    }

    /// The configuration for the compilation target.
    ///
    /// `arm` targets use LPAE; otherwise the `granule-64k` feature selects
    /// [`AARCH64_64K`](Self::AARCH64_64K), falling back to
    /// [`AARCH64_4K`](Self::AARCH64_4K).
    #[must_use]
    pub const fn for_target() -> Self {
        if cfg!(target_arch = "arm") {
            Self::ARM32_LPAE
        } else if cfg!(feature = "granule-64k") {
            Self::AARCH64_64K
        } else {
            Self::AARCH64_4K
        }
    }

    #[inline]
    #[must_use]
    pub const fn format(&self) -> DescriptorFormat {
        self.format
    }

    #[inline]
    #[must_use]
    pub const fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// Base page (granule) size in bytes.
    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    #[inline]
    #[must_use]
    pub const fn levels(&self) -> u8 {
        self.levels
    }

    /// Level holding page descriptors.
    #[inline]
    #[must_use]
    pub const fn leaf_level(&self) -> u8 {
        self.levels - 1
    }

    #[inline]
    #[must_use]
    pub const fn input_bits(&self) -> u32 {
        self.input_bits
    }

    /// VA bits resolved per full-size table (8-byte descriptors per granule).
    #[inline]
    #[must_use]
    pub const fn bits_per_level(&self) -> u32 {
        self.page_shift - 3
    }

    /// Descriptors in a full table frame.
    #[inline]
    #[must_use]
    pub const fn entries_per_table(&self) -> usize {
        1 << self.bits_per_level()
    }

    /// Descriptors actually indexed at `level` (the root may be narrower).
    #[inline]
    #[must_use]
    pub const fn entries_at(&self, level: u8) -> usize {
        if level == 0 {
            1 << (self.input_bits - self.level_shift(0))
        } else {
            self.entries_per_table()
        }
    }

    /// Lowest VA bit indexed at `level`.
    #[inline]
    #[must_use]
    pub const fn level_shift(&self, level: u8) -> u32 {
        debug_assert!(level < self.levels);
        self.page_shift + self.bits_per_level() * (self.levels - 1 - level) as u32
    }

    /// Bytes covered by one descriptor at `level`.
    #[inline]
    #[must_use]
    pub const fn level_size(&self, level: u8) -> u64 {
        1 << self.level_shift(level)
    }

    /// Section (block) size: the span of one top-level descriptor.
    #[inline]
    #[must_use]
    pub const fn section_size(&self) -> u64 {
        self.level_size(0)
    }

    /// Whether `va` lies inside the translated input range.
    ///
    /// Indices are masked per level, so a VA above the range would alias a
    /// lower one.
    #[inline]
    #[must_use]
    pub const fn covers(&self, va: VirtualAddress) -> bool {
        va.as_u64() >> self.input_bits == 0
    }

    /// Index of `va` within the table at `level`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(&self, level: u8, va: VirtualAddress) -> usize {
        let mask = (self.entries_at(level) - 1) as u64;
        ((va.as_u64() >> self.level_shift(level)) & mask) as usize
    }
}
