use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;

/// A value written at most once and then shared read-only by every CPU.
///
/// The writer that wins the `EMPTY → WRITING` transition stores the value and
/// publishes it with a release store; readers acquire the `PUBLISHED` state
/// before touching the value.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns `Some(&T)` once a value has been published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == PUBLISHED {
            // SAFETY: PUBLISHED is only stored after the value was written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Publish `value` unless another value was (or is being) published.
    ///
    /// # Errors
    /// Hands `value` back if the cell was already claimed.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY: WRITING makes us the only writer; no reader looks before PUBLISHED.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(PUBLISHED, Ordering::Release);
        Ok(())
    }

    /// Publish the result of `init` at most once and return the published value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        // Losing the race just means waiting for the winner's value.
        let _ = self.set(init());
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            spin_loop();
        }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PUBLISHED {
            // SAFETY: PUBLISHED means the value is initialized; `&mut self` is exclusive.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// SAFETY: the value is written once by a single writer and only shared afterwards.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_set_wins() {
        let cell = SyncOnceCell::new();
        assert!(cell.get().is_none());
        assert_eq!(cell.set(1u32), Ok(()));
        assert_eq!(cell.set(2u32), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn get_or_init_runs_once() {
        let cell = SyncOnceCell::new();
        assert_eq!(*cell.get_or_init(|| 7u8), 7);
        assert_eq!(*cell.get_or_init(|| 9u8), 7);
    }
}
