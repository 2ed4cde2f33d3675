//! Caller-context guard
//!
//! Classifies the current call site as ordinary thread context, an interrupt
//! handler, or a scheduler-locked region, from the native kernel's nesting
//! counters. Blocking operations refuse the latter two.

use crate::config::VALIDATE;
use crate::critical::is_isr_context;
use crate::error::{OsalResult, OsalStatus};
use crate::port::NativeKernel;

/// Execution context of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerContext {
    /// Ordinary thread code
    Thread,
    /// Interrupt handler
    Isr,
    /// Thread code holding the scheduler lock
    SchedLocked,
}

impl CallerContext {
    /// Query the context of the caller
    #[inline]
    pub fn current<K: NativeKernel>(kernel: &K) -> Self {
        if kernel.int_nesting() > 0 || is_isr_context() {
            CallerContext::Isr
        } else if kernel.sched_lock_nesting() > 0 {
            CallerContext::SchedLocked
        } else {
            CallerContext::Thread
        }
    }

    #[inline]
    pub fn is_isr(self) -> bool {
        self == CallerContext::Isr
    }
}

/// Reject calls from interrupt handlers
#[inline]
pub fn deny_isr<K: NativeKernel>(kernel: &K) -> OsalResult<()> {
    if VALIDATE && CallerContext::current(kernel).is_isr() {
        return Err(OsalStatus::CallerError);
    }
    Ok(())
}

/// Reject calls that could block the scheduler-lock holder
#[inline]
pub fn require_thread<K: NativeKernel>(kernel: &K) -> OsalResult<()> {
    if VALIDATE && CallerContext::current(kernel) != CallerContext::Thread {
        return Err(OsalStatus::CallerError);
    }
    Ok(())
}
