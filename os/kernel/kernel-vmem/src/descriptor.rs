//! # Table-Entry Codec
//!
//! Bit layout and typed views of the 64-bit long descriptors shared by ARMv7
//! LPAE and ARMv8-A VMSAv8-64.
//!
//! ```text
//! +----+-----+-----+-----+------+----------------+----+----+----+----+----+----+------+----+---+
//! | ig | SW  | UXN | PXN | Cont | res  | OA[47:12] | nG | AF | SH | RO | U  | NS | Attr | T  | V |
//! +----+-----+-----+-----+------+------+-----------+----+----+----+----+----+----+------+----+---+
//!  63 59 58 55  54    53    52   51  48 47       12  11   10  9 8   7    6    5   4   2   1   0
//! ```
//!
//! - `V` (valid) clear: the entry is never walked.
//! - `T` (type) set: **table** descriptor below the leaf level, **page**
//!   descriptor at the leaf level. `T` clear below the leaf level is a
//!   **block** (section) descriptor; at the leaf level it is reserved/invalid.
//! - `U` / `RO` are AP\[1\] / AP\[2\]: unprivileged access and read-only.
//!
//! Writers build complete values ([`TableDescriptor`], [`BlockDescriptor`],
//! [`PageDescriptor`]) and store them with a single 64-bit write, so a
//! partially formed entry is never observable.

use crate::config::{DescriptorFormat, TranslationConfig};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Shareability field value for inner-shareable memory.
pub const INNER_SHAREABLE: u8 = 0b11;

/// Raw long-descriptor bits.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct DescriptorBits {
    /// Valid (bit 0).
    pub valid: bool,
    /// Type (bit 1): table/page when set, block when clear.
    pub table_or_page: bool,
    /// Memory attribute index (bits 2..4).
    #[bits(3)]
    pub attr_index: u8,
    /// Non-secure (bit 5).
    pub non_secure: bool,
    /// AP\[1\] (bit 6): accessible from unprivileged execution.
    pub user: bool,
    /// AP\[2\] (bit 7): read-only.
    pub read_only: bool,
    /// Shareability (bits 8..9).
    #[bits(2)]
    pub shareability: u8,
    /// Access flag (bit 10). Clear entries fault on first access.
    pub access_flag: bool,
    /// Not-global (bit 11).
    pub not_global: bool,
    /// Output address bits 47:12.
    #[bits(36)]
    output_address_47_12: u64,
    #[bits(4)]
    __res_48_51: u8,
    /// Contiguous hint (bit 52).
    pub contiguous: bool,
    /// Privileged execute-never (bit 53).
    pub privileged_execute_never: bool,
    /// (Unprivileged) execute-never (bit 54).
    pub execute_never: bool,
    /// Software-defined (bits 55..58).
    #[bits(4)]
    pub software: u8,
    #[bits(5)]
    __ignored_59_63: u8,
}

impl DescriptorBits {
    /// Output (next-table or mapped) physical address.
    #[inline]
    #[must_use]
    pub const fn output_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.output_address_47_12() << 12)
    }

    /// Set the output address; bits below 12 are dropped.
    #[inline]
    #[must_use]
    pub const fn with_output_address(self, pa: PhysicalAddress) -> Self {
        self.with_output_address_47_12(pa.as_u64() >> 12)
    }
}

/// Cacheability class of a mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CachePolicy {
    /// Device / strongly-ordered memory (uncached).
    Device,
    /// Normal memory, non-cacheable.
    NonCacheable,
    /// Normal memory, write-through.
    WriteThrough,
    /// Normal memory, write-back write-allocate.
    WriteBackWriteAllocate,
}

impl CachePolicy {
    /// Attribute index for this policy under `format`'s attribute layout.
    ///
    /// | Policy | `Aarch64` (MAIR slot) | `Arm32Lpae` |
    /// |--------|-----------------------|-------------|
    /// | `Device` | 1 (nGnRE) | 0 (strongly ordered) |
    /// | `NonCacheable` | 3 | 1 (bufferable) |
    /// | `WriteThrough` | 5 | 2 |
    /// | `WriteBackWriteAllocate` | 4 | 7 |
    #[must_use]
    pub const fn attr_index(self, format: DescriptorFormat) -> u8 {
        match format {
            DescriptorFormat::Aarch64 => match self {
                Self::Device => 1,
                Self::NonCacheable => 3,
                Self::WriteBackWriteAllocate => 4,
                Self::WriteThrough => 5,
            },
            DescriptorFormat::Arm32Lpae => match self {
                Self::Device => 0,
                Self::NonCacheable => 1,
                Self::WriteThrough => 2,
                Self::WriteBackWriteAllocate => 7,
            },
        }
    }

    /// Inverse of [`attr_index`](Self::attr_index); `None` for slots this
    /// layer never programs.
    #[must_use]
    pub const fn from_attr_index(index: u8, format: DescriptorFormat) -> Option<Self> {
        match (format, index) {
            (DescriptorFormat::Aarch64, 1) | (DescriptorFormat::Arm32Lpae, 0) => Some(Self::Device),
            (DescriptorFormat::Aarch64, 3) | (DescriptorFormat::Arm32Lpae, 1) => {
                Some(Self::NonCacheable)
            }
            (DescriptorFormat::Aarch64, 5) | (DescriptorFormat::Arm32Lpae, 2) => {
                Some(Self::WriteThrough)
            }
            (DescriptorFormat::Aarch64, 4) | (DescriptorFormat::Arm32Lpae, 7) => {
                Some(Self::WriteBackWriteAllocate)
            }
            _ => None,
        }
    }
}

/// Protection attributes of a leaf or block mapping (`prot`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Protection {
    pub cache: CachePolicy,
    pub read_only: bool,
    pub user: bool,
}

impl Protection {
    /// Write-back write-allocate, read-write, user accessible.
    pub const DEFAULT: Self = Self::new(CachePolicy::WriteBackWriteAllocate, false, true);

    /// Device memory, privileged only.
    pub const IO: Self = Self::new(CachePolicy::Device, false, false);

    /// Code shared between privileged and unprivileged execution: read-only.
    pub const CODE: Self = Self::new(CachePolicy::WriteBackWriteAllocate, true, true);

    /// Read-write data, user accessible.
    pub const DATA: Self = Self::DEFAULT;

    #[must_use]
    pub const fn new(cache: CachePolicy, read_only: bool, user: bool) -> Self {
        Self {
            cache,
            read_only,
            user,
        }
    }

    #[must_use]
    pub const fn with_user(self, user: bool) -> Self {
        Self { user, ..self }
    }

    /// Merge into `bits` (cache policy, AP\[2\], AP\[1\]).
    #[must_use]
    pub const fn apply(self, bits: DescriptorBits, format: DescriptorFormat) -> DescriptorBits {
        bits.with_attr_index(self.cache.attr_index(format))
            .with_read_only(self.read_only)
            .with_user(self.user)
    }

    /// Read back the protection of `bits`; `None` for an unknown attribute index.
    #[must_use]
    pub const fn decode(bits: DescriptorBits, format: DescriptorFormat) -> Option<Self> {
        match CachePolicy::from_attr_index(bits.attr_index(), format) {
            Some(cache) => Some(Self::new(cache, bits.read_only(), bits.user())),
            None => None,
        }
    }
}

/// Descriptor pointing at the next-level table.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableDescriptor(DescriptorBits);

impl TableDescriptor {
    #[must_use]
    pub const fn new(next_table: PhysicalAddress) -> Self {
        Self(
            DescriptorBits::new()
                .with_valid(true)
                .with_table_or_page(true)
                .with_output_address(next_table),
        )
    }

    #[must_use]
    pub const fn next_table(self) -> PhysicalAddress {
        self.0.output_address()
    }

    #[must_use]
    pub const fn bits(self) -> DescriptorBits {
        self.0
    }
}

/// Block (section) and page descriptors share every accessor except the type bit.
macro_rules! mapping_descriptor {
    ($(#[$meta:meta])* $name:ident, type_bit = $type_bit:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub struct $name(DescriptorBits);

        impl $name {
            /// Compose `phys | TYPE | AF | SHARED | prot`.
            #[must_use]
            pub const fn new(phys: PhysicalAddress, prot: Protection, format: DescriptorFormat) -> Self {
                let bits = DescriptorBits::new()
                    .with_valid(true)
                    .with_table_or_page($type_bit)
                    .with_access_flag(true)
                    .with_shareability(INNER_SHAREABLE)
                    .with_output_address(phys);
                Self(prot.apply(bits, format))
            }

            /// Base of the mapped physical range.
            #[must_use]
            pub const fn output_address(self) -> PhysicalAddress {
                self.0.output_address()
            }

            #[must_use]
            pub const fn is_user(self) -> bool {
                self.0.user()
            }

            #[must_use]
            pub const fn is_read_only(self) -> bool {
                self.0.read_only()
            }

            #[must_use]
            pub const fn protection(self, format: DescriptorFormat) -> Option<Protection> {
                Protection::decode(self.0, format)
            }

            /// Same mapping, reachable from privileged execution only.
            #[must_use]
            pub const fn without_user(self) -> Self {
                Self(self.0.with_user(false))
            }

            #[must_use]
            pub const fn bits(self) -> DescriptorBits {
                self.0
            }
        }
    };
}

mapping_descriptor!(
    /// Large mapping written above the leaf level (a section).
    BlockDescriptor,
    type_bit = false
);

mapping_descriptor!(
    /// Base-page mapping at the leaf level.
    PageDescriptor,
    type_bit = true
);

/// Decoded view of a descriptor at a known level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Descriptor {
    Invalid,
    Table(TableDescriptor),
    Block(BlockDescriptor),
    Page(PageDescriptor),
}

impl Descriptor {
    /// Interpret `bits` as found at `level`.
    #[must_use]
    pub const fn decode(bits: DescriptorBits, level: u8, config: &TranslationConfig) -> Self {
        if !bits.valid() {
            return Self::Invalid;
        }
        let leaf = level == config.leaf_level();
        match (leaf, bits.table_or_page()) {
            (true, true) => Self::Page(PageDescriptor(bits)),
            (true, false) => Self::Invalid,
            (false, true) => Self::Table(TableDescriptor(bits)),
            (false, false) => Self::Block(BlockDescriptor(bits)),
        }
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}
