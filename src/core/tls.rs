//! Thread-local storage slots
//!
//! Slots are a process-wide resource backed by the native TLS id space.
//!
//! ## Design highlights
//! 1. **Self-validating keys** A [`TlsKey`] carries the slot index in its low
//!    byte and [`TLS_SIGNATURE`] above it, so a key is checked without a table
//!    lookup.
//! 2. **Allocation mask** One bit per slot in a `u32`, plus a parallel table of
//!    optional destructors, both mutated under the scheduler lock.
//! 3. **Teardown hook** When a destructor is supplied the [`Osal`] itself is
//!    installed as the native per-id teardown hook; the kernel calls it with the
//!    dying task's value and it forwards to the recorded destructor.
//! 4. **No release** The native kernel never returns TLS ids, so
//!    [`Osal::slot_release`] only validates the key.

use crate::config::CFG_MAX_TLS_SLOTS;
use crate::context::deny_isr;
use crate::core::sched_lock::SchedGuard;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::{NativeError, NativeKernel, TlsId, TlsTeardown};
use crate::types::SlotValue;

/// Signature carried in the high bytes of every allocated key
pub const TLS_SIGNATURE: u32 = 0x544C_5300;

const MASK_SIG: u32 = 0xFFFF_FF00;
const MASK_NUM: u32 = 0x0000_00FF;

/// Destructor called with a thread's last slot value when it is destroyed
pub type TlsDestructor = fn(SlotValue);

/// Key identifying a TLS slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TlsKey(u32);

impl TlsKey {
    /// Initial value of a key that has not been acquired
    pub const UNALLOCATED: TlsKey = TlsKey(0xFFFF_FFFF);

    /// Written by a failed [`Osal::slot_acquire`]
    pub const INVALID: TlsKey = TlsKey(0xFFFF_FFFE);

    #[inline]
    pub const fn encode(index: u8) -> Self {
        TlsKey(TLS_SIGNATURE | index as u32)
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        TlsKey(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> u8 {
        (self.0 & MASK_NUM) as u8
    }

    /// Whether the key carries the slot signature
    #[inline]
    pub const fn has_signature(self) -> bool {
        self.0 & MASK_SIG == TLS_SIGNATURE
    }
}

impl Default for TlsKey {
    fn default() -> Self {
        Self::UNALLOCATED
    }
}

/// Allocation state of every slot
pub struct TlsTable {
    used: u32,
    destructors: [Option<TlsDestructor>; CFG_MAX_TLS_SLOTS as usize],
}

impl TlsTable {
    pub const fn new() -> Self {
        TlsTable {
            used: 0,
            destructors: [None; CFG_MAX_TLS_SLOTS as usize],
        }
    }

    #[inline]
    pub fn is_allocated(&self, index: u8) -> bool {
        u32::from(index) < CFG_MAX_TLS_SLOTS && self.used & (1 << index) != 0
    }

    fn install(&mut self, index: u8, destructor: Option<TlsDestructor>) {
        self.destructors[index as usize] = destructor;
        self.used |= 1 << index;
    }

    fn destructor(&self, index: u8) -> Option<TlsDestructor> {
        self.destructors.get(index as usize).copied().flatten()
    }

    pub fn count(&self) -> u32 {
        self.used.count_ones()
    }
}

impl Default for TlsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: NativeKernel> Osal<K> {
    /// Index of `key` if it is well formed and within the configured slot count
    fn slot_index(&self, key: TlsKey) -> OsalResult<TlsId> {
        if !key.has_signature() || u32::from(key.index()) >= self.config.num_tls_slots {
            return Err(OsalStatus::BadSlotKey);
        }
        Ok(key.index())
    }

    /// Allocate a TLS slot, or confirm one that `key` already names
    ///
    /// On failure `key` is set to [`TlsKey::INVALID`].
    ///
    /// # Errors
    /// * [`OsalStatus::MemAllocFailed`] if every slot is taken
    /// * [`OsalStatus::CallerError`] from an interrupt handler
    pub fn slot_acquire(&'static self, key: &mut TlsKey, destructor: Option<TlsDestructor>) -> OsalResult<()> {
        deny_isr(&self.kernel)?;

        if let Ok(index) = self.slot_index(*key) {
            if self.tls.with(|t| t.is_allocated(index)) {
                return Ok(());
            }
        }

        let acquired = {
            let _lock = SchedGuard::lock(&self.kernel);
            self.acquire_locked(destructor)
        };

        match acquired {
            Ok(index) => {
                *key = TlsKey::encode(index);
                crate::debug!("tls slot {} acquired", index);
                Ok(())
            }
            Err(err) => {
                *key = TlsKey::INVALID;
                Err(err)
            }
        }
    }

    fn acquire_locked(&'static self, destructor: Option<TlsDestructor>) -> OsalResult<TlsId> {
        let index = self.kernel.tls_get_id().map_err(|err| match err {
            NativeError::TlsNoMoreAvail => OsalStatus::MemAllocFailed,
            _ => OsalStatus::Failed,
        })?;
        if u32::from(index) >= self.config.num_tls_slots {
            return Err(OsalStatus::MemAllocFailed);
        }
        if destructor.is_some() {
            self.kernel
                .tls_set_destruct(index, self)
                .map_err(|_| OsalStatus::Failed)?;
        }
        self.tls.with(|t| t.install(index, destructor));
        Ok(index)
    }

    /// Validate a key being given up
    ///
    /// The slot stays allocated.
    pub fn slot_release(&self, key: TlsKey) -> OsalResult<()> {
        deny_isr(&self.kernel)?;
        let index = self.slot_index(key)?;
        if !self.tls.with(|t| t.is_allocated(index)) {
            return Err(OsalStatus::BadSlotKey);
        }
        Ok(())
    }

    /// Store `value` in the calling thread's copy of the slot
    pub fn slot_set_value(&self, key: TlsKey, value: SlotValue) -> OsalResult<()> {
        let index = self.slot_access(key)?;
        self.kernel.tls_set_value(index, value).map_err(tls_value_error)
    }

    /// Load the calling thread's copy of the slot
    pub fn slot_get_value(&self, key: TlsKey) -> OsalResult<SlotValue> {
        let index = self.slot_access(key)?;
        self.kernel.tls_get_value(index).map_err(tls_value_error)
    }

    fn slot_access(&self, key: TlsKey) -> OsalResult<TlsId> {
        deny_isr(&self.kernel)?;
        if !self.kernel.is_running() {
            return Err(OsalStatus::CallerError);
        }
        self.slot_index(key)
    }

    /// Number of allocated slots
    pub fn tls_slots_in_use(&self) -> u32 {
        self.tls.with(|t| t.count())
    }
}

fn tls_value_error(err: NativeError) -> OsalStatus {
    match err {
        NativeError::TlsIdInvalid => OsalStatus::BadSlotKey,
        NativeError::OsNotRunning => OsalStatus::CallerError,
        _ => OsalStatus::Failed,
    }
}

impl<K: NativeKernel> TlsTeardown for Osal<K> {
    fn teardown(&self, id: TlsId, value: SlotValue) {
        // tasks deleted before the scheduler starts own no values
        if !self.kernel.is_running() {
            return;
        }
        if let Some(destructor) = self.tls.with(|t| t.destructor(id)) {
            destructor(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;
    use crate::config::OsalConfig;
    use crate::core::test_util::{booted, sim_osal, spawn_thread};
    use crate::port::sim::{SimConfig, SimKernel};

    #[test]
    fn test_key_encoding() {
        let key = TlsKey::encode(5);
        assert!(key.has_signature());
        assert_eq!(key.index(), 5);
        assert!(!TlsKey::UNALLOCATED.has_signature());
        assert!(!TlsKey::INVALID.has_signature());
        assert_eq!(TlsKey::default(), TlsKey::UNALLOCATED);
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let osal = booted();
        let mut key = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut key, None).unwrap();
        let first = key;
        assert_eq!(osal.tls_slots_in_use(), 1);

        osal.slot_acquire(&mut key, None).unwrap();
        assert_eq!(key, first);
        assert_eq!(osal.tls_slots_in_use(), 1);
    }

    #[test]
    fn test_exhaustion_writes_invalid_key() {
        let osal = sim_osal(OsalConfig::new().with_tls_slots(2));
        osal.kernel().start();
        let mut a = TlsKey::UNALLOCATED;
        let mut b = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut a, None).unwrap();
        osal.slot_acquire(&mut b, None).unwrap();

        let mut c = TlsKey::UNALLOCATED;
        assert_eq!(osal.slot_acquire(&mut c, None), Err(OsalStatus::MemAllocFailed));
        assert_eq!(c, TlsKey::INVALID);
        assert_eq!(osal.tls_slots_in_use(), 2);
    }

    #[test]
    fn test_native_ids_exhausted() {
        let kernel = SimKernel::with_config(SimConfig {
            tls_ids: 2,
            ..SimConfig::default()
        });
        let osal = Box::leak(Box::new(Osal::new(kernel, OsalConfig::new()).unwrap()));
        osal.kernel().start();

        let mut keys = [TlsKey::UNALLOCATED; 2];
        for key in &mut keys {
            osal.slot_acquire(key, None).unwrap();
        }
        let mut extra = TlsKey::UNALLOCATED;
        assert_eq!(osal.slot_acquire(&mut extra, None), Err(OsalStatus::MemAllocFailed));
        assert_eq!(extra, TlsKey::INVALID);
        assert_eq!(osal.tls_slots_in_use(), 2);
    }

    #[test]
    fn test_values_are_per_thread() {
        let osal = booted();
        let mut key = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut key, None).unwrap();
        osal.slot_set_value(key, 0xAA).unwrap();

        let (tx, rx) = mpsc::channel();
        let h = spawn_thread(osal, 9, move || {
            let before = osal.slot_get_value(key);
            osal.slot_set_value(key, 0xBB).unwrap();
            tx.send((before, osal.slot_get_value(key))).unwrap();
        });
        let (before, after) = rx.recv().unwrap();
        assert_eq!(before, Ok(0));
        assert_eq!(after, Ok(0xBB));
        assert_eq!(osal.slot_get_value(key), Ok(0xAA));
        osal.thread_destroy(h).unwrap();
    }

    #[test]
    fn test_destructor_runs_on_destroy() {
        static LAST: AtomicUsize = AtomicUsize::new(0);
        fn record(value: SlotValue) {
            LAST.store(value, Ordering::SeqCst);
        }

        let osal = booted();
        let mut key = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut key, Some(record)).unwrap();

        let (tx, rx) = mpsc::channel();
        let h = spawn_thread(osal, 11, move || {
            osal.slot_set_value(key, 42).unwrap();
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
        osal.thread_destroy(h).unwrap();
        assert_eq!(LAST.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_values_need_running_scheduler() {
        let osal = sim_osal(OsalConfig::new());
        let mut key = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut key, None).unwrap();
        assert_eq!(osal.slot_set_value(key, 1), Err(OsalStatus::CallerError));
        assert_eq!(osal.slot_get_value(key), Err(OsalStatus::CallerError));
    }

    #[test]
    fn test_bad_keys_rejected() {
        let osal = sim_osal(OsalConfig::new().with_tls_slots(4));
        osal.kernel().start();
        assert_eq!(osal.slot_release(TlsKey::UNALLOCATED), Err(OsalStatus::BadSlotKey));
        assert_eq!(osal.slot_set_value(TlsKey::from_bits(3), 1), Err(OsalStatus::BadSlotKey));
        // signed, but past the configured ceiling
        assert_eq!(osal.slot_get_value(TlsKey::encode(4)), Err(OsalStatus::BadSlotKey));
        // signed and in range, never acquired
        assert_eq!(osal.slot_release(TlsKey::encode(1)), Err(OsalStatus::BadSlotKey));

        let mut key = TlsKey::UNALLOCATED;
        osal.slot_acquire(&mut key, None).unwrap();
        osal.slot_release(key).unwrap();
        assert_eq!(osal.tls_slots_in_use(), 1);
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_acquire_from_isr_rejected() {
        let osal = booted();
        let mut key = TlsKey::UNALLOCATED;
        let result = osal.kernel().isr(|| osal.slot_acquire(&mut key, None));
        assert_eq!(result, Err(OsalStatus::CallerError));
    }
}
