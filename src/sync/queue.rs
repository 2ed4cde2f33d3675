//! Message queues
//!
//! Fixed-capacity queues of pointer-sized messages, passed straight through
//! to the native queue. The caller supplies the ring storage.

use crate::config::CFG_MAX_QUEUE_ENTRIES;
use crate::context::deny_isr;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{DelOpt, NativeError, NativeKernel};
use crate::timeout::{dispatch, normalize};
use crate::types::{QueueHandle, QueueMsg, Ticks};

use super::{del_error, pend_error};

/// Registry record of a message queue
pub struct QueueRecord<Q> {
    native: Q,
}

impl<K: NativeKernel> Osal<K> {
    /// Create a queue over `storage`, one entry per element
    ///
    /// # Errors
    /// * [`OsalStatus::BadCount`] if `storage` is empty or longer than
    ///   [`CFG_MAX_QUEUE_ENTRIES`]
    /// * [`OsalStatus::MemAllocFailed`] if no native or registry slot is left
    pub fn msg_queue_create(&self, storage: &'static mut [QueueMsg]) -> OsalResult<QueueHandle> {
        deny_isr(&self.kernel)?;
        let capacity = storage.len();
        if capacity == 0 || capacity > CFG_MAX_QUEUE_ENTRIES {
            return Err(OsalStatus::BadCount);
        }
        let native = self.kernel.q_create(storage).ok_or(OsalStatus::MemAllocFailed)?;
        let raw = match self.queues.with(|reg| reg.try_insert(QueueRecord { native })) {
            Ok(raw) => raw,
            Err(_) => {
                let _ = self.kernel.q_del(native, DelOpt::Always);
                return Err(OsalStatus::MemAllocFailed);
            }
        };
        crate::debug!("queue {} created with {} entries", raw.bits(), capacity);
        Ok(QueueHandle(raw))
    }

    /// Delete a queue
    ///
    /// # Errors
    /// * [`OsalStatus::ThreadPending`] if threads are waiting on it
    pub fn msg_queue_destroy(&self, queue: QueueHandle) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let raw = queue.raw();
        let native = self.queues.with(|reg| {
            let native = reg.get(raw)?.native;
            reg.poison(raw);
            Ok::<_, OsalStatus>(native)
        })?;

        if let Err(err) = self.kernel.q_del(native, DelOpt::NoPend) {
            self.queues.with(|reg| reg.publish(raw));
            return Err(del_error(err));
        }
        self.queues.with(|reg| reg.release(raw));
        crate::debug!("queue {} destroyed", raw.bits());
        Ok(())
    }

    /// Append a message; legal from interrupt handlers
    pub fn msg_queue_post(&self, queue: QueueHandle, msg: QueueMsg) -> OsalResult<()> {
        let native = self.queues.with(|reg| reg.get(queue.raw()).map(|rec| rec.native))?;
        self.kernel.q_post(native, msg).map_err(|err| match err {
            NativeError::QFull => OsalStatus::QueueFull,
            other => pend_error(other),
        })
    }

    /// Remove the oldest message, waiting up to `timeout` ticks
    ///
    /// Polling an empty queue gives [`OsalStatus::QueueEmpty`].
    pub fn msg_queue_pend(&self, queue: QueueHandle, timeout: Ticks) -> OsalResult<QueueMsg> {
        deny_isr(&self.kernel)?;
        let wait = normalize(timeout)?;
        let native = self.queues.with(|reg| reg.get(queue.raw()).map(|rec| rec.native))?;
        dispatch(
            wait,
            || {
                self.kernel.q_accept(native).map_err(|err| match err {
                    NativeError::QEmpty => OsalStatus::QueueEmpty,
                    other => pend_error(other),
                })
            },
            |ticks| self.kernel.q_pend(native, ticks).map_err(pend_error),
        )
    }
}
