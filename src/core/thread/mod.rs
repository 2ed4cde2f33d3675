//! Thread lifecycle
//!
//! OSAL threads are native tasks whose control block carries the thread's
//! raw handle as its extension word. Portable priorities are offset into a
//! band above the kernel's reserved priorities; because the native kernel
//! identifies tasks by priority, two threads can never share one and a
//! priority change through native calls would orphan the handle.

mod record;

pub use record::{ThreadAttr, ThreadRecord};

use core::fmt::Write;

use crate::config::{CFG_BASE_PRIO, CFG_MAX_TIMEOUT, CFG_STARTUP_PRIO, VALIDATE};
use crate::context::{deny_isr, require_thread};
use crate::core::sched_lock::SchedGuard;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{NativeError, NativeKernel, TaskId, TaskSpec};
use crate::types::{OsalPriority, RawHandle, ThreadHandle, Ticks};

/// Thread entry point
pub type ThreadFn = fn(usize);

/// Map a portable priority into the native band
#[inline]
pub fn to_native_prio(prio: OsalPriority) -> OsalResult<u8> {
    prio.checked_add(CFG_BASE_PRIO as u32)
        .and_then(|p| u8::try_from(p).ok())
        .ok_or(OsalStatus::BadPriority)
}

/// Map a native priority back to the portable range
#[inline]
pub fn from_native_prio(native: u8) -> OsalResult<OsalPriority> {
    native
        .checked_sub(CFG_BASE_PRIO)
        .map(OsalPriority::from)
        .ok_or(OsalStatus::Failed)
}

fn create_error(err: NativeError) -> OsalStatus {
    match err {
        NativeError::PrioExist => OsalStatus::PriorityInUse,
        NativeError::PrioInvalid => OsalStatus::BadPriority,
        NativeError::TaskCreateIsr => OsalStatus::CallerError,
        NativeError::TaskNoMoreTcb => OsalStatus::MemAllocFailed,
        _ => OsalStatus::Failed,
    }
}

fn destroy_error(err: NativeError) -> OsalStatus {
    match err {
        NativeError::TaskDelIsr => OsalStatus::CallerError,
        NativeError::PrioInvalid | NativeError::TaskDel | NativeError::TaskNotExist => {
            OsalStatus::BadHandle
        }
        _ => OsalStatus::Failed,
    }
}

/// Buffer writer that fails instead of truncating
struct NameBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for NameBuf<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let end = self.len + s.len();
        let dst = self.buf.get_mut(self.len..end).ok_or(core::fmt::Error)?;
        dst.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl<K: NativeKernel> Osal<K> {
    /// Create a thread
    ///
    /// The native task is created, named and tagged with the new handle
    /// while the scheduler is locked, so the thread cannot run before its
    /// handle resolves. A task the kernel refuses to name is deleted again.
    ///
    /// # Arguments
    /// * `attr` - Entry point, argument, priority, stack and name
    ///
    /// # Errors
    /// * [`OsalStatus::BadPriority`] if the priority falls outside the native band
    /// * [`OsalStatus::PriorityInUse`] if another task holds the priority
    /// * [`OsalStatus::CallerError`] from an interrupt handler
    /// * [`OsalStatus::MemAllocFailed`] if no handle or task control block is left
    /// * [`OsalStatus::Failed`] if the native kernel rejects the name
    pub fn thread_create(&self, attr: ThreadAttr) -> OsalResult<ThreadHandle> {
        if VALIDATE {
            attr.validate()?;
            deny_isr(&self.kernel)?;
        }
        let native_prio = to_native_prio(attr.priority)?;
        let ThreadAttr { name, entry, arg, stack, .. } = attr;
        let entry = entry.ok_or(OsalStatus::BadThreadFunc)?;

        let raw = self
            .threads
            .with(|reg| reg.reserve(ThreadRecord::new(native_prio, name)))?;

        let created = {
            let _lock = SchedGuard::lock(&self.kernel);
            let result = self
                .kernel
                .task_create(TaskSpec {
                    entry,
                    arg,
                    prio: native_prio,
                    stack,
                    ext: raw.bits() as usize,
                })
                .map_err(create_error)
                .and_then(|()| self.name_native_task(native_prio, name));
            if result.is_ok() {
                self.threads.with(|reg| reg.publish(raw));
            }
            result
        };

        match created {
            Ok(()) => {
                crate::debug!("thread {} created at native prio {}", raw.bits(), native_prio);
                Ok(ThreadHandle(raw))
            }
            Err(status) => {
                self.threads.with(|reg| reg.release(raw));
                Err(status)
            }
        }
    }

    /// Name a freshly created native task, deleting it on failure
    fn name_native_task(&self, native_prio: u8, name: &'static str) -> OsalResult<()> {
        if self.kernel.task_name_set(native_prio, name).is_ok() {
            return Ok(());
        }
        if self.kernel.task_del(native_prio).is_err() {
            crate::warn!("unnamed task at native prio {} was not deleted", native_prio);
        }
        Err(OsalStatus::Failed)
    }

    /// Delete a thread and free its handle
    ///
    /// The handle stops resolving before the native task is deleted. A
    /// thread destroying itself releases its handle first, since the
    /// native delete does not return to it.
    pub fn thread_destroy(&self, thread: ThreadHandle) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        if thread.is_startup() {
            return Err(OsalStatus::BadHandle);
        }

        let raw = thread.raw();
        let prio = self.threads.with(|reg| {
            let prio = reg.get(raw)?.native_prio;
            reg.poison(raw);
            Ok::<_, OsalStatus>(prio)
        })?;

        let is_self = self.kernel.is_running() && self.kernel.task_cur_ext() == raw.bits() as usize;
        if is_self {
            self.threads.with(|reg| reg.release(raw));
        }

        match self.kernel.task_del(prio) {
            Ok(()) => {
                self.threads.with(|reg| reg.release(raw));
                crate::debug!("thread {} destroyed", raw.bits());
                Ok(())
            }
            Err(err) => {
                if !is_self {
                    self.threads.with(|reg| reg.publish(raw));
                }
                Err(destroy_error(err))
            }
        }
    }

    /// Handle of the calling thread
    ///
    /// Before the scheduler starts this is [`ThreadHandle::STARTUP`].
    pub fn thread_get_handle(&self) -> OsalResult<ThreadHandle> {
        if !self.kernel.is_running() {
            return Ok(ThreadHandle::STARTUP);
        }
        let ext = self.kernel.task_cur_ext();
        let raw = u32::try_from(ext)
            .map(RawHandle::from_bits)
            .map_err(|_| OsalStatus::BadHandle)?;
        if ext == 0 || raw.is_invalid() {
            return Err(OsalStatus::BadHandle);
        }
        if VALIDATE && !self.threads.with(|reg| reg.contains(raw)) {
            return Err(OsalStatus::BadHandle);
        }
        Ok(ThreadHandle(raw))
    }

    /// Native identity of the calling task
    pub fn thread_get_native_handle(&self) -> OsalResult<TaskId> {
        if !self.kernel.is_running() {
            return Err(OsalStatus::Failed);
        }
        Ok(self.kernel.task_cur())
    }

    /// Write a printable name for the calling thread into `buf`
    ///
    /// The name is `OSAL_0x` or `RTOS_0x` followed by the native task identity
    /// in hex. Smaller buffers get the digits without the prefix (11 bytes)
    /// or without `0x` (9 bytes).
    pub fn thread_get_name<'b>(&self, buf: &'b mut [u8]) -> OsalResult<&'b str> {
        if buf.len() < 9 {
            return Err(OsalStatus::Failed);
        }
        let id = self.kernel.task_cur() as u32;
        let cap = buf.len();
        let mut out = NameBuf { buf, len: 0 };

        let written = (|| -> core::fmt::Result {
            if cap >= 16 {
                let prefix = if self.thread_get_handle().is_ok() { "OSAL_" } else { "RTOS_" };
                out.write_str(prefix)?;
            }
            if cap >= 11 {
                out.write_str("0x")?;
            }
            write!(out, "{:08x}", id)
        })();
        written.map_err(|_| OsalStatus::Failed)?;

        let NameBuf { buf, len } = out;
        core::str::from_utf8(&buf[..len]).map_err(|_| OsalStatus::Failed)
    }

    /// Name given to a thread at creation
    pub fn thread_name_of(&self, thread: ThreadHandle) -> OsalResult<&'static str> {
        self.threads.with(|reg| reg.get(thread.raw()).map(|rec| rec.name))
    }

    /// Portable priority of a thread
    ///
    /// Fails for the startup thread, which sits below the OSAL band.
    pub fn thread_get_prio(&self, thread: ThreadHandle) -> OsalResult<OsalPriority> {
        let native = if thread.is_startup() {
            CFG_STARTUP_PRIO
        } else {
            self.threads.with(|reg| reg.get(thread.raw()).map(|rec| rec.native_prio))?
        };
        from_native_prio(native)
    }

    /// Move a thread to another portable priority
    pub fn thread_set_prio(&self, thread: ThreadHandle, prio: OsalPriority) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let new = to_native_prio(prio)?;
        let raw = thread.raw();

        let _lock = SchedGuard::lock(&self.kernel);
        let old = self.threads.with(|reg| reg.get(raw).map(|rec| rec.native_prio))?;
        self.kernel.task_change_prio(old, new).map_err(|err| match err {
            NativeError::PrioExist => OsalStatus::PriorityInUse,
            NativeError::PrioInvalid => OsalStatus::BadPriority,
            NativeError::Prio => OsalStatus::BadHandle,
            _ => OsalStatus::Failed,
        })?;
        self.threads.with(|reg| {
            if let Ok(rec) = reg.get_mut(raw) {
                rec.native_prio = new;
            }
        });
        Ok(())
    }

    /// Suspend the calling thread for `ticks` ticks
    pub fn thread_sleep(&self, ticks: Ticks) -> OsalResult<()> {
        require_thread(&self.kernel)?;
        if ticks > CFG_MAX_TIMEOUT {
            return Err(OsalStatus::BadTime);
        }
        if ticks > 0 {
            self.kernel.time_dly(ticks as u16);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;

    use super::*;
    use crate::config::OsalConfig;
    use crate::core::test_util::{attr_for, booted, sim_osal, spawn_thread, stack, wait_until, Flag};
    use crate::port::sim::SIM_LOWEST_PRIO;

    fn noop(_: usize) {}

    #[test]
    fn test_thread_create_and_get_handle() {
        let osal = booted();
        let (tx, rx) = mpsc::channel();
        let h = spawn_thread(osal, 10, move || {
            tx.send(osal.thread_get_handle()).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), Ok(h));
        assert_eq!(osal.thread_get_prio(h), Ok(10));
        assert_eq!(osal.thread_name_of(h), Ok("worker"));
        assert_eq!(osal.kernel().task_name(10 + CFG_BASE_PRIO), Some("worker"));
        osal.thread_destroy(h).unwrap();
    }

    #[test]
    fn test_thread_destroy_invalidates_handle() {
        let osal = booted();
        let h = spawn_thread(osal, 3, || {});
        osal.thread_destroy(h).unwrap();
        assert_eq!(osal.thread_destroy(h), Err(OsalStatus::BadHandle));
        assert_eq!(osal.thread_get_prio(h), Err(OsalStatus::BadHandle));

        // the priority is free again
        let again = spawn_thread(osal, 3, || {});
        assert_ne!(again, h);
        osal.thread_destroy(again).unwrap();
    }

    #[test]
    fn test_priority_collision() {
        let osal = booted();
        let h = spawn_thread(osal, 7, || {});
        let err = osal.thread_create(attr_for("twin", 7, || {})).unwrap_err();
        assert_eq!(err, OsalStatus::PriorityInUse);
        osal.thread_destroy(h).unwrap();
    }

    #[test]
    fn test_priority_out_of_band() {
        let osal = booted();
        let idle = u32::from(SIM_LOWEST_PRIO - CFG_BASE_PRIO);
        let err = osal.thread_create(attr_for("idle", idle, || {})).unwrap_err();
        assert_eq!(err, OsalStatus::PriorityInUse);

        let err = osal.thread_create(attr_for("low", idle + 1, || {})).unwrap_err();
        assert_eq!(err, OsalStatus::BadPriority);

        let err = osal.thread_create(attr_for("huge", u32::MAX, || {})).unwrap_err();
        assert_eq!(err, OsalStatus::BadPriority);
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_attr_validation() {
        let osal = booted();
        let bad_entry = ThreadAttr {
            name: "t",
            entry: None,
            arg: 0,
            priority: 1,
            stack: stack(),
        };
        assert_eq!(osal.thread_create(bad_entry).unwrap_err(), OsalStatus::BadThreadFunc);

        let long_name = ThreadAttr {
            name: "a-name-well-beyond-limit",
            entry: Some(noop),
            arg: 0,
            priority: 1,
            stack: stack(),
        };
        assert_eq!(osal.thread_create(long_name).unwrap_err(), OsalStatus::BadThreadName);

        let odd_size = ThreadAttr {
            name: "t",
            entry: Some(noop),
            arg: 0,
            priority: 1,
            stack: &mut stack()[..1001],
        };
        assert_eq!(osal.thread_create(odd_size).unwrap_err(), OsalStatus::BadStackSize);

        let misaligned = ThreadAttr {
            name: "t",
            entry: Some(noop),
            arg: 0,
            priority: 1,
            stack: &mut stack()[1..1001],
        };
        assert_eq!(osal.thread_create(misaligned).unwrap_err(), OsalStatus::BadStackAddr);
    }

    #[test]
    fn test_create_from_isr_rejected() {
        let osal = booted();
        let err = osal.kernel().isr(|| osal.thread_create(attr_for("isr", 2, || {})));
        assert_eq!(err.unwrap_err(), OsalStatus::CallerError);
    }

    #[test]
    fn test_startup_thread_before_start() {
        let osal = sim_osal(OsalConfig::new());
        let h = osal.thread_get_handle().unwrap();
        assert!(h.is_startup());
        assert_eq!(osal.thread_get_prio(h), Err(OsalStatus::Failed));
        assert_eq!(osal.thread_get_native_handle(), Err(OsalStatus::Failed));
        assert_eq!(osal.thread_destroy(h), Err(OsalStatus::BadHandle));
    }

    #[test]
    fn test_thread_created_before_start_waits() {
        let osal = sim_osal(OsalConfig::new());
        let ran = Arc::new(Flag::new());
        let seen = Arc::clone(&ran);
        let h = spawn_thread(osal, 5, move || seen.set());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!ran.is_set());
        osal.kernel().start();
        assert!(wait_until(|| ran.is_set()));
        osal.thread_destroy(h).unwrap();
    }

    #[test]
    fn test_foreign_thread_has_no_handle() {
        let osal = booted();
        assert_eq!(osal.thread_get_handle(), Err(OsalStatus::BadHandle));
        assert!(osal.thread_get_native_handle().is_ok());
    }

    #[test]
    fn test_set_prio() {
        let osal = booted();
        let a = spawn_thread(osal, 20, || {});
        let b = spawn_thread(osal, 21, || {});
        assert_eq!(osal.thread_set_prio(a, 21), Err(OsalStatus::PriorityInUse));
        osal.thread_set_prio(a, 22).unwrap();
        assert_eq!(osal.thread_get_prio(a), Ok(22));
        // the old slot is free
        osal.thread_set_prio(b, 20).unwrap();
        osal.thread_destroy(a).unwrap();
        osal.thread_destroy(b).unwrap();
    }

    #[test]
    fn test_thread_name_formats() {
        let osal = booted();
        let (tx, rx) = mpsc::channel();
        let h = spawn_thread(osal, 12, move || {
            let mut long = [0u8; 16];
            let mut mid = [0u8; 11];
            let mut short = [0u8; 9];
            let mut tiny = [0u8; 8];
            let names = (
                osal.thread_get_name(&mut long).map(str::to_owned),
                osal.thread_get_name(&mut mid).map(str::to_owned),
                osal.thread_get_name(&mut short).map(str::to_owned),
                osal.thread_get_name(&mut tiny).map(str::to_owned),
            );
            tx.send(names).unwrap();
        });
        let (long, mid, short, tiny) = rx.recv().unwrap();
        let long = long.unwrap();
        assert!(long.starts_with("OSAL_0x"));
        assert_eq!(long.len(), 15);
        assert!(mid.unwrap().starts_with("0x"));
        assert_eq!(short.unwrap().len(), 8);
        assert_eq!(tiny, Err(OsalStatus::Failed));
        osal.thread_destroy(h).unwrap();

        let mut buf = [0u8; 32];
        assert!(osal.thread_get_name(&mut buf).unwrap().starts_with("RTOS_"));
    }

    #[test]
    fn test_sleep() {
        let osal = booted();
        assert_eq!(osal.thread_sleep(CFG_MAX_TIMEOUT + 1), Err(OsalStatus::BadTime));
        osal.thread_sleep(0).unwrap();
        osal.thread_sleep(2).unwrap();
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_sleep_with_scheduler_locked() {
        let osal = booted();
        osal.sched_lock();
        assert_eq!(osal.thread_sleep(1), Err(OsalStatus::CallerError));
        osal.sched_unlock().unwrap();
    }

    #[test]
    #[cfg(not(feature = "validate"))]
    fn test_native_name_rejected() {
        let osal = booted();
        let attr = attr_for("a-thread-name-the-kernel-cannot-hold", 12, || {});
        assert_eq!(osal.thread_create(attr).unwrap_err(), OsalStatus::Failed);

        // the task was removed, so its priority is free again
        let h = spawn_thread(osal, 12, || {});
        assert_eq!(osal.thread_get_prio(h), Ok(12));
        osal.thread_destroy(h).unwrap();
    }

    #[test]
    fn test_native_prio_mapping() {
        assert_eq!(to_native_prio(0), Ok(CFG_BASE_PRIO));
        assert_eq!(from_native_prio(CFG_BASE_PRIO + 3), Ok(3));
        assert_eq!(from_native_prio(CFG_BASE_PRIO - 1), Err(OsalStatus::Failed));
    }
}
