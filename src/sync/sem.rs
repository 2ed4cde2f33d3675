//! Counting semaphores
//!
//! A thin layer over native semaphores. The native counter is 16 bits wide,
//! so initial counts are checked against [`CFG_SEM_MAX_COUNT`] and posts
//! past the ceiling report [`OsalStatus::CountOverflow`].

use crate::config::{CFG_SEM_MAX_COUNT, VALIDATE};
use crate::context::deny_isr;
use crate::core::registry::StaticObject;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{DelOpt, NativeError, NativeKernel};
use crate::timeout::{dispatch, normalize};
use crate::types::{SemHandle, Ticks};

use super::{admit, del_error, pend_error, retire, with_record, NativeRecord};

/// Registry record of a semaphore
pub struct SemRecord<S> {
    native: S,
}

impl<S: Copy> NativeRecord for SemRecord<S> {
    type Native = S;

    fn native(&self) -> S {
        self.native
    }
}

/// Caller-owned storage for [`Osal::sem_create_static`]
pub type SemObject<K> = StaticObject<SemRecord<<K as NativeKernel>::Sem>>;

impl<K: NativeKernel> Osal<K> {
    /// Create a semaphore holding `initial` tokens
    ///
    /// # Errors
    /// * [`OsalStatus::BadCount`] if `initial` exceeds [`CFG_SEM_MAX_COUNT`]
    /// * [`OsalStatus::MemAllocFailed`] if no native or registry slot is left
    pub fn sem_create(&self, initial: u32) -> OsalResult<SemHandle> {
        self.sem_create_in(initial, None)
    }

    /// Create a semaphore whose record lives in `storage`
    pub fn sem_create_static(&self, storage: &'static SemObject<K>, initial: u32) -> OsalResult<SemHandle> {
        if storage.in_use() {
            return Err(OsalStatus::Failed);
        }
        self.sem_create_in(initial, Some(storage))
    }

    fn sem_create_in(&self, initial: u32, storage: Option<&'static SemObject<K>>) -> OsalResult<SemHandle> {
        deny_isr(&self.kernel)?;
        if VALIDATE && initial > CFG_SEM_MAX_COUNT {
            return Err(OsalStatus::BadCount);
        }
        let native = self
            .kernel
            .sem_create(initial as u16)
            .ok_or(OsalStatus::MemAllocFailed)?;
        let raw = admit(&self.sems, SemRecord { native }, storage, |sem| {
            let _ = self.kernel.sem_del(sem, DelOpt::Always);
        })?;
        crate::debug!("semaphore {} created with {} tokens", raw.bits(), initial);
        Ok(SemHandle(raw))
    }

    pub fn sem_destroy(&self, sem: SemHandle) -> OsalResult<()> {
        self.sem_retire(sem, false)
    }

    pub fn sem_destroy_static(&self, sem: SemHandle) -> OsalResult<()> {
        self.sem_retire(sem, true)
    }

    fn sem_retire(&self, sem: SemHandle, from_static: bool) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        retire(&self.sems, sem.raw(), from_static, |native| {
            self.kernel.sem_del(native, DelOpt::NoPend).map_err(del_error)
        })?;
        crate::debug!("semaphore {} destroyed", sem.raw().bits());
        Ok(())
    }

    /// Take one token, waiting up to `timeout` ticks
    ///
    /// Polling an empty semaphore gives [`OsalStatus::Failed`].
    pub fn sem_pend(&self, sem: SemHandle, timeout: Ticks) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let wait = normalize(timeout)?;
        let native = with_record(&self.sems, sem.raw(), |rec| rec.native)?;
        dispatch(
            wait,
            || match self.kernel.sem_accept(native) {
                0 => Err(OsalStatus::Failed),
                _ => Ok(()),
            },
            |ticks| self.kernel.sem_pend(native, ticks).map_err(pend_error),
        )
    }

    /// Give one token; legal from interrupt handlers
    pub fn sem_post(&self, sem: SemHandle) -> OsalResult<()> {
        let native = with_record(&self.sems, sem.raw(), |rec| rec.native)?;
        self.kernel.sem_post(native).map_err(|err| match err {
            NativeError::SemOvf => OsalStatus::CountOverflow,
            other => pend_error(other),
        })
    }

    pub const fn sem_obj_size() -> usize {
        SemObject::<K>::size()
    }
}
