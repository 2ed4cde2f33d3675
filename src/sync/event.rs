//! Event groups
//!
//! Event groups map onto native flag groups. A pend waits for any or all of
//! the requested bits and returns the bits that satisfied it; set and clear
//! share one flag-modify path.

use crate::config::VALIDATE;
use crate::context::{deny_isr, require_thread};
use crate::core::registry::StaticObject;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{DelOpt, FlagOp, FlagWait, NativeKernel};
use crate::timeout::{dispatch, normalize};
use crate::types::{EventFlagOption, EventFlags, EventHandle, Ticks};

use super::{admit, del_error, pend_error, retire, with_record, NativeRecord};

/// Registry record of an event group
pub struct EventRecord<F> {
    native: F,
}

impl<F: Copy> NativeRecord for EventRecord<F> {
    type Native = F;

    fn native(&self) -> F {
        self.native
    }
}

/// Caller-owned storage for [`Osal::event_group_create_static`]
pub type EventGroupObject<K> = StaticObject<EventRecord<<K as NativeKernel>::Flags>>;

impl From<EventFlagOption> for FlagWait {
    fn from(option: EventFlagOption) -> Self {
        match option {
            EventFlagOption::Any => FlagWait::SetAny,
            EventFlagOption::All => FlagWait::SetAll,
        }
    }
}

impl<K: NativeKernel> Osal<K> {
    /// Create an event group with every flag clear
    pub fn event_group_create(&self) -> OsalResult<EventHandle> {
        self.event_group_create_in(None)
    }

    /// Create an event group whose record lives in `storage`
    pub fn event_group_create_static(&self, storage: &'static EventGroupObject<K>) -> OsalResult<EventHandle> {
        if storage.in_use() {
            return Err(OsalStatus::Failed);
        }
        self.event_group_create_in(Some(storage))
    }

    fn event_group_create_in(&self, storage: Option<&'static EventGroupObject<K>>) -> OsalResult<EventHandle> {
        deny_isr(&self.kernel)?;
        let native = self.kernel.flag_create(0).map_err(|_| OsalStatus::MemAllocFailed)?;
        let raw = admit(&self.events, EventRecord { native }, storage, |grp| {
            let _ = self.kernel.flag_del(grp, DelOpt::Always);
        })?;
        crate::debug!("event group {} created", raw.bits());
        Ok(EventHandle(raw))
    }

    pub fn event_group_destroy(&self, group: EventHandle) -> OsalResult<()> {
        self.event_group_retire(group, false)
    }

    pub fn event_group_destroy_static(&self, group: EventHandle) -> OsalResult<()> {
        self.event_group_retire(group, true)
    }

    fn event_group_retire(&self, group: EventHandle, from_static: bool) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        retire(&self.events, group.raw(), from_static, |grp| {
            self.kernel.flag_del(grp, DelOpt::NoPend).map_err(del_error)
        })?;
        crate::debug!("event group {} destroyed", group.raw().bits());
        Ok(())
    }

    /// Wait for flags in `mask`
    ///
    /// Returns the flags that satisfied the wait. A failed pend receives no
    /// flags.
    ///
    /// # Errors
    /// * [`OsalStatus::Failed`] if polling and the condition does not hold
    /// * [`OsalStatus::Timeout`] if the wait expired
    /// * [`OsalStatus::CallerError`] from an interrupt handler or with the
    ///   scheduler locked
    pub fn event_pend(
        &self,
        group: EventHandle,
        mask: EventFlags,
        option: EventFlagOption,
        timeout: Ticks,
    ) -> OsalResult<EventFlags> {
        let wait = normalize(timeout)?;
        require_thread(&self.kernel)?;
        let grp = with_record(&self.events, group.raw(), |rec| rec.native)?;
        let predicate = FlagWait::from(option);

        dispatch(
            wait,
            || self.kernel.flag_accept(grp, mask, predicate).map_err(pend_error),
            |ticks| self.kernel.flag_pend(grp, mask, predicate, ticks).map_err(pend_error),
        )
    }

    /// Set the flags in `mask`; legal from interrupt handlers
    pub fn event_set(&self, group: EventHandle, mask: EventFlags) -> OsalResult<()> {
        self.modify_flags(group, mask, FlagOp::Set)
    }

    /// Clear the flags in `mask`; legal from interrupt handlers
    pub fn event_clear(&self, group: EventHandle, mask: EventFlags) -> OsalResult<()> {
        self.modify_flags(group, mask, FlagOp::Clear)
    }

    fn modify_flags(&self, group: EventHandle, mask: EventFlags, op: FlagOp) -> OsalResult<()> {
        if VALIDATE && group.is_invalid() {
            return Err(OsalStatus::BadHandle);
        }
        let grp = with_record(&self.events, group.raw(), |rec| rec.native)?;
        self.kernel
            .flag_post(grp, mask, op)
            .map(|_| ())
            .map_err(pend_error)
    }

    pub const fn event_group_obj_size() -> usize {
        EventGroupObject::<K>::size()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::core::test_util::{booted, wait_until};
    use crate::port::sim::SimKernel;
    use crate::types::{TIMEOUT_FOREVER, TIMEOUT_NONE};

    #[test]
    fn test_any_and_all() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        osal.event_set(e, 0b0101).unwrap();

        assert_eq!(osal.event_pend(e, 0b0011, EventFlagOption::Any, TIMEOUT_NONE), Ok(0b0001));
        assert_eq!(osal.event_pend(e, 0b0011, EventFlagOption::All, TIMEOUT_NONE), Err(OsalStatus::Failed));
        assert_eq!(osal.event_pend(e, 0b0101, EventFlagOption::All, TIMEOUT_NONE), Ok(0b0101));

        osal.event_clear(e, 0b0100).unwrap();
        assert_eq!(osal.event_pend(e, 0b0100, EventFlagOption::Any, TIMEOUT_NONE), Err(OsalStatus::Failed));
        osal.event_group_destroy(e).unwrap();
    }

    #[test]
    fn test_pend_times_out() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        assert_eq!(osal.event_pend(e, 1, EventFlagOption::Any, 10), Err(OsalStatus::Timeout));
        osal.event_group_destroy(e).unwrap();
    }

    #[test]
    fn test_isr_set_wakes_waiter() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        let waiter = thread::spawn(move || osal.event_pend(e, 0b110, EventFlagOption::All, TIMEOUT_FOREVER));
        assert!(wait_until(|| osal.kernel().pending_count() == 1));

        osal.kernel().isr(|| osal.event_set(e, 0b010)).unwrap();
        assert_eq!(osal.kernel().pending_count(), 1);
        osal.kernel().isr(|| osal.event_set(e, 0b100)).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(0b110));
        osal.event_group_destroy(e).unwrap();
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_pend_context_checks() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        osal.event_set(e, 1).unwrap();

        let from_isr = osal.kernel().isr(|| osal.event_pend(e, 1, EventFlagOption::Any, TIMEOUT_NONE));
        assert_eq!(from_isr, Err(OsalStatus::CallerError));

        osal.sched_lock();
        assert_eq!(
            osal.event_pend(e, 1, EventFlagOption::Any, TIMEOUT_NONE),
            Err(OsalStatus::CallerError)
        );
        osal.sched_unlock().unwrap();

        assert_eq!(osal.event_pend(e, 1, EventFlagOption::Any, 0x1_0000), Err(OsalStatus::BadTime));
        osal.event_group_destroy(e).unwrap();
    }

    #[test]
    fn test_destroy_with_waiter() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        let waiter = thread::spawn(move || osal.event_pend(e, 1, EventFlagOption::Any, TIMEOUT_FOREVER));
        assert!(wait_until(|| osal.kernel().pending_count() == 1));

        assert_eq!(osal.event_group_destroy(e), Err(OsalStatus::ThreadPending));
        osal.event_set(e, 1).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(1));
        osal.event_group_destroy(e).unwrap();
        assert_eq!(osal.event_set(e, 1), Err(OsalStatus::BadHandle));
        assert_eq!(osal.event_set(EventHandle::INVALID, 1), Err(OsalStatus::BadHandle));
    }

    #[test]
    #[cfg(not(feature = "validate"))]
    fn test_pend_from_isr_polls() {
        let osal = booted();
        let e = osal.event_group_create().unwrap();
        osal.event_set(e, 0b11).unwrap();
        let from_isr = osal.kernel().isr(|| osal.event_pend(e, 0b01, EventFlagOption::Any, TIMEOUT_NONE));
        assert_eq!(from_isr, Ok(0b01));
        assert_eq!(osal.event_pend(e, 0b10, EventFlagOption::Any, 0x1_0000), Ok(0b10));
        osal.event_group_destroy(e).unwrap();
    }

    #[test]
    fn test_static_storage() {
        static STORAGE: EventGroupObject<SimKernel> = EventGroupObject::<SimKernel>::new();

        let osal = booted();
        let e = osal.event_group_create_static(&STORAGE).unwrap();
        assert!(STORAGE.in_use());
        osal.event_set(e, 0x80).unwrap();
        assert_eq!(osal.event_pend(e, 0x80, EventFlagOption::All, TIMEOUT_NONE), Ok(0x80));
        assert_eq!(osal.event_group_destroy(e), Err(OsalStatus::BadHandle));
        osal.event_group_destroy_static(e).unwrap();
        assert!(!STORAGE.in_use());
        assert!(Osal::<SimKernel>::event_group_obj_size() > 0);
    }

    #[test]
    fn test_raw_option() {
        assert_eq!(EventFlagOption::try_from(1), Ok(EventFlagOption::Any));
        assert_eq!(EventFlagOption::try_from(3), Err(OsalStatus::BadOption));
        assert_eq!(FlagWait::from(EventFlagOption::All), FlagWait::SetAll);
    }
}
