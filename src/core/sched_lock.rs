//! Scheduler lock
//!
//! [`SchedGuard`] brackets the OSAL's own short atomic sequences with the
//! native reschedule-inhibit pair. [`SchedLockCounter`] tracks the nesting of
//! the application-visible lock so that an unmatched unlock is reported.

use portable_atomic::{AtomicU32, Ordering};

use crate::error::{OsalResult, OsalStatus};
use crate::port::NativeKernel;

/// RAII guard for the native scheduler lock
///
/// The lock is released when the guard is dropped.
pub struct SchedGuard<'k, K: NativeKernel> {
    kernel: &'k K,
}

impl<'k, K: NativeKernel> SchedGuard<'k, K> {
    #[inline]
    pub fn lock(kernel: &'k K) -> Self {
        kernel.sched_lock();
        SchedGuard { kernel }
    }
}

impl<K: NativeKernel> Drop for SchedGuard<'_, K> {
    #[inline]
    fn drop(&mut self) {
        self.kernel.sched_unlock();
    }
}

/// Nesting depth of application scheduler locks
pub struct SchedLockCounter {
    depth: AtomicU32,
}

impl SchedLockCounter {
    pub const fn new() -> Self {
        Self { depth: AtomicU32::new(0) }
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// Record one more lock level
    pub fn enter(&self) -> OsalResult<()> {
        self.depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_add(1))
            .map(|_| ())
            .map_err(|_| OsalStatus::CountOverflow)
    }

    /// Drop one lock level, failing if none is held
    pub fn exit(&self) -> OsalResult<()> {
        self.depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .map(|_| ())
            .map_err(|_| OsalStatus::Failed)
    }
}

impl Default for SchedLockCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_underflow() {
        let counter = SchedLockCounter::new();
        assert_eq!(counter.exit(), Err(OsalStatus::Failed));

        counter.enter().unwrap();
        counter.enter().unwrap();
        assert_eq!(counter.depth(), 2);
        counter.exit().unwrap();
        counter.exit().unwrap();
        assert_eq!(counter.exit(), Err(OsalStatus::Failed));
        assert_eq!(counter.depth(), 0);
    }
}
