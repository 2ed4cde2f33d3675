//! Recursive mutex emulation
//!
//! μC/OS-II has no usable owner-tracking mutex here, so a mutex is a native
//! binary semaphore paired with an ownership record:
//!
//! ```text
//! Unlocked --pend--> Locked(owner, 1) --pend by owner--> Locked(owner, n + 1)
//! Locked(owner, n > 1) --post by owner--> Locked(owner, n - 1)
//! Locked(owner, 1) --post by owner--> Unlocked
//! ```
//!
//! Recursive pends and non-final posts only touch the record. The final post
//! clears the record and signals the semaphore under the scheduler lock, so
//! no waiter runs between the two.
//!
//! There is no priority inheritance. Threads sharing a mutex must be
//! prioritized so that inversion cannot starve the owner.

use crate::config::VALIDATE;
use crate::context::deny_isr;
use crate::core::registry::StaticObject;
use crate::core::sched_lock::SchedGuard;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{DelOpt, NativeKernel, SemData, TaskId};
use crate::timeout::{dispatch, normalize};
use crate::types::{MutexHandle, RawHandle, Ticks};

use super::{admit, del_error, pend_error, retire, with_record, NativeRecord};

/// Ownership record of an emulated mutex
pub struct MutexRecord<S> {
    native: S,
    owner: Option<TaskId>,
    count: u32,
}

impl<S> MutexRecord<S> {
    const fn new(native: S) -> Self {
        MutexRecord {
            native,
            owner: None,
            count: 0,
        }
    }
}

impl<S: Copy> NativeRecord for MutexRecord<S> {
    type Native = S;

    fn native(&self) -> S {
        self.native
    }
}

/// Caller-owned storage for [`Osal::mutex_create_static`]
pub type MutexObject<K> = StaticObject<MutexRecord<<K as NativeKernel>::Sem>>;

enum Acquire<S> {
    /// The caller already owned the mutex
    Nested,
    /// The native semaphore must be taken
    Native(S),
}

impl<K: NativeKernel> Osal<K> {
    /// Create a mutex in the registry pool
    pub fn mutex_create(&self) -> OsalResult<MutexHandle> {
        self.mutex_create_in(None)
    }

    /// Create a mutex whose record lives in `storage`
    ///
    /// # Errors
    /// * [`OsalStatus::Failed`] if `storage` already backs a mutex
    pub fn mutex_create_static(&self, storage: &'static MutexObject<K>) -> OsalResult<MutexHandle> {
        if storage.in_use() {
            return Err(OsalStatus::Failed);
        }
        self.mutex_create_in(Some(storage))
    }

    fn mutex_create_in(&self, storage: Option<&'static MutexObject<K>>) -> OsalResult<MutexHandle> {
        deny_isr(&self.kernel)?;
        let native = self.kernel.sem_create(1).ok_or(OsalStatus::MemAllocFailed)?;
        let raw = admit(&self.mutexes, MutexRecord::new(native), storage, |sem| {
            let _ = self.kernel.sem_del(sem, DelOpt::Always);
        })?;
        crate::debug!("mutex {} created", raw.bits());
        Ok(MutexHandle(raw))
    }

    /// Delete a pool mutex
    ///
    /// # Errors
    /// * [`OsalStatus::ThreadPending`] if threads are waiting on it
    /// * [`OsalStatus::Failed`] if it is still held (validating builds)
    pub fn mutex_destroy(&self, mutex: MutexHandle) -> OsalResult<()> {
        self.mutex_retire(mutex, false)
    }

    /// Delete a mutex created with [`mutex_create_static`](Self::mutex_create_static)
    ///
    /// The storage can be reused afterwards.
    pub fn mutex_destroy_static(&self, mutex: MutexHandle) -> OsalResult<()> {
        self.mutex_retire(mutex, true)
    }

    fn mutex_retire(&self, mutex: MutexHandle, from_static: bool) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let _lock = SchedGuard::lock(&self.kernel);
        if VALIDATE {
            self.ensure_released(mutex.raw())?;
        }
        retire(&self.mutexes, mutex.raw(), from_static, |sem| {
            self.kernel.sem_del(sem, DelOpt::NoPend).map_err(del_error)
        })?;
        crate::debug!("mutex {} destroyed", mutex.raw().bits());
        Ok(())
    }

    /// Refuse a held mutex, reporting waiters ahead of the owner
    fn ensure_released(&self, raw: RawHandle) -> OsalResult<()> {
        let (sem, count) = with_record(&self.mutexes, raw, |rec| (rec.native, rec.count))?;
        if count == 0 {
            return Ok(());
        }
        match self.kernel.sem_query(sem).map_err(del_error)? {
            SemData { waiting: true, .. } => Err(OsalStatus::ThreadPending),
            _ => Err(OsalStatus::Failed),
        }
    }

    /// Acquire a mutex, recursively if the caller owns it
    ///
    /// # Arguments
    /// * `mutex` - Mutex handle
    /// * `timeout` - [`TIMEOUT_NONE`](crate::TIMEOUT_NONE),
    ///   [`TIMEOUT_FOREVER`](crate::TIMEOUT_FOREVER) or a tick count
    ///
    /// # Errors
    /// * [`OsalStatus::Failed`] if polling and the mutex is held
    /// * [`OsalStatus::Timeout`] if the wait expired
    /// * [`OsalStatus::CountOverflow`] if the recursion count is exhausted
    /// * [`OsalStatus::CallerError`] from an interrupt handler, or when
    ///   blocking with the scheduler locked
    pub fn mutex_pend(&self, mutex: MutexHandle, timeout: Ticks) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let wait = normalize(timeout)?;
        let me = self.kernel.task_cur();
        let raw = mutex.raw();

        let step = with_record(&self.mutexes, raw, |rec| {
            if rec.owner != Some(me) {
                return Ok(Acquire::Native(rec.native));
            }
            rec.count = rec.count.checked_add(1).ok_or(OsalStatus::CountOverflow)?;
            Ok(Acquire::Nested)
        })??;

        let sem = match step {
            Acquire::Nested => return Ok(()),
            Acquire::Native(sem) => sem,
        };

        dispatch(
            wait,
            || match self.kernel.sem_accept(sem) {
                0 => Err(OsalStatus::Failed),
                _ => Ok(()),
            },
            |ticks| self.kernel.sem_pend(sem, ticks).map_err(pend_error),
        )?;

        with_record(&self.mutexes, raw, |rec| {
            rec.owner = Some(me);
            rec.count = 1;
        })
    }

    /// Release one level of a mutex held by the caller
    ///
    /// # Errors
    /// * [`OsalStatus::NotMutexOwner`] if the caller does not own the mutex
    /// * [`OsalStatus::CallerError`] from an interrupt handler
    pub fn mutex_post(&self, mutex: MutexHandle) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let me = self.kernel.task_cur();
        let raw = mutex.raw();

        let _lock = SchedGuard::lock(&self.kernel);
        let sem = with_record(&self.mutexes, raw, |rec| {
            if rec.owner != Some(me) || rec.count == 0 {
                return Err(OsalStatus::NotMutexOwner);
            }
            rec.count -= 1;
            if rec.count > 0 {
                return Ok(None);
            }
            rec.owner = None;
            Ok(Some(rec.native))
        })??;

        let Some(sem) = sem else {
            return Ok(());
        };
        self.kernel.sem_post(sem).map_err(|err| {
            // the semaphore was not released, keep the caller as owner
            let _ = with_record(&self.mutexes, raw, |rec| {
                rec.owner = Some(me);
                rec.count = 1;
            });
            pend_error(err)
        })
    }

    /// Storage footprint of a caller-owned mutex record
    pub const fn mutex_obj_size() -> usize {
        MutexObject::<K>::size()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::core::test_util::{booted, spawn_thread, wait_until};
    use crate::port::sim::SimKernel;
    use crate::types::{TIMEOUT_FOREVER, TIMEOUT_NONE};

    /// Run `f` on a fresh native task and return its result
    fn on_other_task<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
        thread::spawn(f).join().unwrap()
    }

    #[test]
    fn test_recursive_ownership() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();

        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        assert_eq!(on_other_task(move || osal.mutex_pend(m, TIMEOUT_NONE)), Err(OsalStatus::Failed));

        osal.mutex_post(m).unwrap();
        assert_eq!(on_other_task(move || osal.mutex_pend(m, TIMEOUT_NONE)), Err(OsalStatus::Failed));

        osal.mutex_post(m).unwrap();
        let taken = on_other_task(move || {
            let pend = osal.mutex_pend(m, TIMEOUT_NONE);
            (pend, osal.mutex_post(m))
        });
        assert_eq!(taken, (Ok(()), Ok(())));
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_n_pends_need_n_posts() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        for _ in 0..5 {
            osal.mutex_pend(m, 10).unwrap();
        }
        for _ in 0..4 {
            osal.mutex_post(m).unwrap();
            assert_eq!(on_other_task(move || osal.mutex_pend(m, TIMEOUT_NONE)), Err(OsalStatus::Failed));
        }
        osal.mutex_post(m).unwrap();
        assert_eq!(osal.mutex_post(m), Err(OsalStatus::NotMutexOwner));
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_post_by_non_owner() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        assert_eq!(osal.mutex_post(m), Err(OsalStatus::NotMutexOwner));

        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        assert_eq!(on_other_task(move || osal.mutex_post(m)), Err(OsalStatus::NotMutexOwner));
        osal.mutex_post(m).unwrap();
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        assert_eq!(on_other_task(move || osal.mutex_pend(m, 5)), Err(OsalStatus::Timeout));
        osal.mutex_post(m).unwrap();
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();

        let waiter = thread::spawn(move || {
            osal.mutex_pend(m, TIMEOUT_FOREVER)?;
            osal.mutex_post(m)
        });
        assert!(wait_until(|| osal.kernel().pending_count() == 1));
        osal.mutex_post(m).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_destroy_with_waiter() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();

        let waiter = thread::spawn(move || {
            osal.mutex_pend(m, TIMEOUT_FOREVER)?;
            osal.mutex_post(m)
        });
        assert!(wait_until(|| osal.kernel().pending_count() == 1));
        assert_eq!(osal.mutex_destroy(m), Err(OsalStatus::ThreadPending));

        // still usable after the refused destroy
        osal.mutex_post(m).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        osal.mutex_destroy(m).unwrap();
        assert_eq!(osal.mutex_pend(m, TIMEOUT_NONE), Err(OsalStatus::BadHandle));
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_destroy_held_mutex() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();

        assert_eq!(osal.mutex_destroy(m), Err(OsalStatus::Failed));
        osal.mutex_post(m).unwrap();
        assert_eq!(osal.mutex_destroy(m), Err(OsalStatus::Failed));

        // still usable after the refused destroys
        osal.mutex_post(m).unwrap();
        let taken = on_other_task(move || {
            let pend = osal.mutex_pend(m, TIMEOUT_NONE);
            (pend, osal.mutex_post(m))
        });
        assert_eq!(taken, (Ok(()), Ok(())));
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_isr_rejected() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        assert_eq!(osal.kernel().isr(|| osal.mutex_post(m)), Err(OsalStatus::CallerError));
        assert_eq!(osal.kernel().isr(|| osal.mutex_pend(m, TIMEOUT_NONE)), Err(OsalStatus::CallerError));
        assert_eq!(osal.kernel().isr(|| osal.mutex_create()), Err(OsalStatus::CallerError));
        osal.mutex_post(m).unwrap();
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_blocking_with_scheduler_locked() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        on_other_task(move || osal.mutex_pend(m, TIMEOUT_FOREVER)).unwrap();

        osal.sched_lock();
        assert_eq!(osal.mutex_pend(m, 5), Err(OsalStatus::CallerError));
        osal.sched_unlock().unwrap();
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_bad_timeout() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        assert_eq!(osal.mutex_pend(m, 0x1_0000), Err(OsalStatus::BadTime));
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    #[cfg(not(feature = "validate"))]
    fn test_long_timeout_is_clamped() {
        let osal = booted();
        let m = osal.mutex_create().unwrap();
        osal.mutex_pend(m, 0x1_0000).unwrap();
        osal.mutex_post(m).unwrap();
        osal.mutex_destroy(m).unwrap();
    }

    #[test]
    fn test_static_storage() {
        static STORAGE: MutexObject<SimKernel> = MutexObject::<SimKernel>::new();

        let osal = booted();
        let m = osal.mutex_create_static(&STORAGE).unwrap();
        assert!(STORAGE.in_use());
        assert_eq!(osal.mutex_create_static(&STORAGE), Err(OsalStatus::Failed));

        osal.mutex_pend(m, TIMEOUT_FOREVER).unwrap();
        osal.mutex_post(m).unwrap();

        assert_eq!(osal.mutex_destroy(m), Err(OsalStatus::BadHandle));
        osal.mutex_destroy_static(m).unwrap();
        assert!(!STORAGE.in_use());
        assert!(Osal::<SimKernel>::mutex_obj_size() > 0);
    }

    #[test]
    fn test_release_is_atomic_with_bookkeeping() {
        const ROUNDS: u32 = 200;

        let osal = booted();
        let m = osal.mutex_create().unwrap();
        let inside = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();

        for prio in [30, 31, 32] {
            let inside = Arc::clone(&inside);
            let tx = tx.clone();
            spawn_thread(osal, prio, move || {
                let mut result = Ok(());
                for _ in 0..ROUNDS {
                    if let Err(err) = osal.mutex_pend(m, TIMEOUT_FOREVER) {
                        result = Err(err);
                        break;
                    }
                    // nested pend must see this thread as owner
                    let nested = osal.mutex_pend(m, TIMEOUT_NONE).and_then(|()| osal.mutex_post(m));
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 || nested.is_err() {
                        result = Err(OsalStatus::Failed);
                    }
                    inside.fetch_sub(1, Ordering::SeqCst);
                    if let Err(err) = osal.mutex_post(m) {
                        result = Err(err);
                        break;
                    }
                }
                tx.send(result).unwrap();
            });
        }
        drop(tx);

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results, vec![Ok(()); 3]);
        osal.mutex_destroy(m).unwrap();
    }
}
