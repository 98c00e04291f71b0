//! # Kernel synchronization primitives
//!
//! Lock-free building blocks only: they are used underneath the lock
//! primitives of the guest and must not depend on them.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod cpumask;
mod sync_once_cell;

pub use cpumask::CpuMask;
pub use sync_once_cell::SyncOnceCell;
