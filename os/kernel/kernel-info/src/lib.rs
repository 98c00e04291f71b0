//! # Guest Memory Layout and Platform Description
//!
//! This crate is the single source of truth for the memory layout that the
//! translation layer of the test guest assumes, and for the description of
//! physical memory that the platform hands to it.
//!
//! ## Overview
//!
//! The guest runs under a hypervisor on an ARM-family CPU with everything it
//! touches identity mapped. The layout below is fixed at compile time so that
//! the table builder, the boot code and the tests agree on where I/O, RAM and
//! the dynamic-allocation window live.
//!
//! ### Memory Layout ([`memory`])
//!
//! ```text
//! Guest Physical / Virtual Layout (identity):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │         I/O window              │  device sections, privileged only
//! IO_END      ├─────────────────────────────────┤ 0x4000_0000 (1 GiB)
//!             │  RAM: code (read-only) + data   │  page granularity, identity
//! IDMAP_END   ├─────────────────────────────────┤ 0xC000_0000 (3 GiB)
//!             │  dynamic-allocation window      │  reserved, not identity mapped
//! VMALLOC_END └─────────────────────────────────┘ 0x1_0000_0000 (4 GiB)
//! ```
//!
//! ### Memory Regions ([`regions`])
//!
//! The platform describes physical memory as an ordered table of
//! [`MemoryRegion`](regions::MemoryRegion) descriptors, terminated by a
//! sentinel whose `end` is zero. Regions flagged
//! [`io`](regions::RegionFlags::io) are mapped as device memory.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod regions;
