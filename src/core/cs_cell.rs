//! Critical section protected cell
//!
//! Shared OSAL state that interrupt handlers may also reach (handle lookups
//! for semaphore posts, flag updates and queue posts) lives in a [`CsCell`].

use core::cell::{RefCell, RefMut};

use critical_section::{CriticalSection, Mutex};

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(Mutex<RefCell<T>>);

impl<T> CsCell<T> {
    /// Create a new CsCell
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(Mutex::new(RefCell::new(value)))
    }

    /// Borrow the inner value for the lifetime of `cs`
    #[inline(always)]
    pub fn borrow<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, T> {
        self.0.borrow_ref_mut(cs)
    }

    /// Run `f` on the inner value inside a critical section
    ///
    /// `f` must not call into the native kernel.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.borrow(cs)))
    }
}
