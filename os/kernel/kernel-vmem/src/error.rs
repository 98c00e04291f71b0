//! Failure conditions of the paging layer.
//!
//! Every condition here is a kernel bug or an unrecoverable shortage at
//! bring-up. The `try_*` entry points return them as values; the plain entry
//! points route them through [`fatal`], which logs and halts.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    #[error("out of page-table frames (level {level})")]
    OutOfFrames { level: u8 },
    #[error("{va:?} is outside the translated input range")]
    OutOfRange { va: VirtualAddress },
    #[error("{va:?} is not mapped (walk stopped at level {level})")]
    NotMapped { va: VirtualAddress, level: u8 },
    #[error("{va:?} translates to {pa:?}, not identity mapped")]
    NotIdentityMapped { va: VirtualAddress, pa: PhysicalAddress },
    #[error("stack {sp:?} translates to {pa:?}; cannot disable the MMU")]
    StackNotIdentityMapped { sp: VirtualAddress, pa: PhysicalAddress },
    #[error("CPU {cpu} has the MMU enabled but no active table")]
    NoActiveTable { cpu: usize },
    #[error("no identity map has been built")]
    NoIdentityMap,
}

/// Log `err` and halt.
#[cold]
#[track_caller]
pub fn fatal(err: VmemError) -> ! {
    log::error!("fatal paging error: {err}");
    panic!("{err}");
}

/// Unwrap a paging result, halting on error.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, VmemError> {
    #[inline]
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => fatal(e),
        }
    }
}
