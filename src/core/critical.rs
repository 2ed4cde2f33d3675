//! Critical section handling
//!
//! Provides the single-core `critical-section` implementation for Cortex-M
//! targets and the hardware interrupt-context probe.

// ============ Critical Section ============

#[cfg(all(target_arch = "arm", feature = "single-core-cs"))]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

pub use critical_section::CriticalSection;

/// Execute a closure with interrupts disabled
///
/// The closure receives the critical section token, which can be used to
/// borrow [`CsCell`](crate::core::cs_cell::CsCell) protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Check if currently executing in an exception handler
///
/// Always false off target; simulated interrupts are reported by the
/// native kernel's interrupt nesting instead.
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        use cortex_m::peripheral::scb::VectActive;
        !matches!(cortex_m::peripheral::SCB::vect_active(), VectActive::ThreadMode)
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}
