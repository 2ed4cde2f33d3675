//! OSAL registry object and initialization
//!
//! [`Osal`] owns the native kernel binding and every piece of process-wide
//! OSAL state: the handle registries, the TLS allocation table and the
//! scheduler-lock nesting counter. It is constructed once at start-up and
//! then shared, typically from a `static` or a leaked box.

use crate::config::{
    OsalConfig, CFG_COMPATIBLE_OS_VERSION, CFG_MAX_THREADS,
};
use crate::context::CallerContext;
use crate::core::cs_cell::CsCell;
use crate::core::registry::Registry;
use crate::core::sched_lock::SchedLockCounter;
use crate::critical::critical_section;
use crate::error::{OsalResult, OsalStatus};
use crate::port::NativeKernel;
use crate::thread::ThreadRecord;
use crate::tls::TlsTable;

#[cfg(any(feature = "mutex", feature = "sem", feature = "event"))]
use crate::core::registry::Backing;
#[cfg(feature = "event")]
use crate::config::CFG_MAX_EVENT_GROUPS;
#[cfg(feature = "mutex")]
use crate::config::CFG_MAX_MUTEXES;
#[cfg(feature = "queue")]
use crate::config::CFG_MAX_QUEUES;
#[cfg(feature = "sem")]
use crate::config::CFG_MAX_SEMAPHORES;
#[cfg(feature = "event")]
use crate::event::EventRecord;
#[cfg(feature = "mutex")]
use crate::mutex::MutexRecord;
#[cfg(feature = "queue")]
use crate::queue::QueueRecord;
#[cfg(feature = "sem")]
use crate::sem::SemRecord;

// ============ Version ============

/// OSAL version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

const OSAL_VERSION: Version = Version {
    major: 2,
    minor: 1,
    patch: 0,
    build: 1,
};

/// Version of this OSAL
pub const fn version() -> Version {
    OSAL_VERSION
}

// ============ Registry object ============

/// The OSAL state bound to one native kernel
pub struct Osal<K: NativeKernel> {
    pub(crate) kernel: K,
    pub(crate) config: OsalConfig,
    pub(crate) tick_period_us: u32,
    pub(crate) sched_depth: SchedLockCounter,
    pub(crate) threads: CsCell<Registry<ThreadRecord, CFG_MAX_THREADS>>,
    pub(crate) tls: CsCell<TlsTable>,
    #[cfg(feature = "mutex")]
    pub(crate) mutexes: CsCell<Registry<Backing<MutexRecord<K::Sem>>, CFG_MAX_MUTEXES>>,
    #[cfg(feature = "sem")]
    pub(crate) sems: CsCell<Registry<Backing<SemRecord<K::Sem>>, CFG_MAX_SEMAPHORES>>,
    #[cfg(feature = "event")]
    pub(crate) events: CsCell<Registry<Backing<EventRecord<K::Flags>>, CFG_MAX_EVENT_GROUPS>>,
    #[cfg(feature = "queue")]
    pub(crate) queues: CsCell<Registry<QueueRecord<K::Queue>, CFG_MAX_QUEUES>>,
}

impl<K: NativeKernel> Osal<K> {
    /// Bind the OSAL to a native kernel
    ///
    /// # Arguments
    /// * `kernel` - Native kernel binding
    /// * `config` - Start-up configuration
    ///
    /// # Errors
    /// * [`OsalStatus::OsError`] if the kernel is older than the supported version
    /// * [`OsalStatus::BadSlotKey`] if more TLS slots are requested than exist
    pub fn new(kernel: K, config: OsalConfig) -> OsalResult<Self> {
        if kernel.version() < CFG_COMPATIBLE_OS_VERSION {
            return Err(OsalStatus::OsError);
        }
        config.validate()?;

        crate::info!(
            "OSAL {}.{} on native kernel {}",
            OSAL_VERSION.major,
            OSAL_VERSION.minor,
            kernel.version()
        );

        Ok(Osal {
            tick_period_us: config.stored_tick_period(),
            config,
            sched_depth: SchedLockCounter::new(),
            threads: CsCell::new(Registry::new()),
            tls: CsCell::new(TlsTable::new()),
            #[cfg(feature = "mutex")]
            mutexes: CsCell::new(Registry::new()),
            #[cfg(feature = "sem")]
            sems: CsCell::new(Registry::new()),
            #[cfg(feature = "event")]
            events: CsCell::new(Registry::new()),
            #[cfg(feature = "queue")]
            queues: CsCell::new(Registry::new()),
            kernel,
        })
    }

    /// Native kernel binding
    #[inline]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Active configuration
    #[inline]
    pub fn config(&self) -> &OsalConfig {
        &self.config
    }

    /// Execution context of the caller
    #[inline]
    pub fn caller_context(&self) -> CallerContext {
        CallerContext::current(&self.kernel)
    }

    // ============ Scheduler lock ============

    /// Inhibit rescheduling until the matching [`sched_unlock`](Self::sched_unlock)
    pub fn sched_lock(&self) {
        self.kernel.sched_lock();
        if crate::VALIDATE {
            let entered = self.sched_depth.enter();
            debug_assert!(entered.is_ok(), "scheduler lock depth overflow");
        }
    }

    /// Re-enable rescheduling
    ///
    /// # Errors
    /// * [`OsalStatus::Failed`] if the scheduler is not locked (validating builds)
    pub fn sched_unlock(&self) -> OsalResult<()> {
        if crate::VALIDATE {
            self.sched_depth.exit()?;
        }
        self.kernel.sched_unlock();
        Ok(())
    }

    /// Current application lock depth (validating builds only)
    pub fn sched_lock_depth(&self) -> u32 {
        self.sched_depth.depth()
    }

    /// Lock protecting runtime-library globals
    pub fn rtl_globals_lock(&self) {
        self.sched_lock();
    }

    pub fn rtl_globals_unlock(&self) -> OsalResult<()> {
        self.sched_unlock()
    }

    /// Whether the native scheduler has started
    #[inline]
    pub fn is_scheduler_active(&self) -> bool {
        self.kernel.is_running()
    }

    /// Run `f` with interrupts masked
    ///
    /// `f` must not call blocking OSAL operations.
    pub fn critical_region<R>(&self, f: impl FnOnce() -> R) -> R {
        critical_section(|_cs| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_util::{booted, sim_osal};
    use crate::port::sim::SimKernel;

    #[test]
    fn test_rejects_old_kernel() {
        let kernel = SimKernel::with_version(28600);
        assert!(matches!(
            Osal::new(kernel, OsalConfig::new()),
            Err(OsalStatus::OsError)
        ));
    }

    #[test]
    fn test_rejects_too_many_tls_slots() {
        let config = OsalConfig::new().with_tls_slots(crate::config::CFG_MAX_TLS_SLOTS + 1);
        assert!(matches!(
            Osal::new(SimKernel::new(), config),
            Err(OsalStatus::BadSlotKey)
        ));
    }

    #[test]
    #[cfg(feature = "validate")]
    fn test_sched_unlock_without_lock() {
        let osal = booted();
        assert_eq!(osal.sched_unlock(), Err(OsalStatus::Failed));

        osal.sched_lock();
        osal.sched_lock();
        assert_eq!(osal.sched_lock_depth(), 2);
        assert_eq!(osal.caller_context(), CallerContext::SchedLocked);
        osal.sched_unlock().unwrap();
        osal.sched_unlock().unwrap();
        assert_eq!(osal.caller_context(), CallerContext::Thread);
        assert_eq!(osal.sched_unlock(), Err(OsalStatus::Failed));
    }

    #[test]
    fn test_rtl_globals_lock_nests() {
        let osal = booted();
        osal.rtl_globals_lock();
        osal.sched_lock();
        osal.sched_unlock().unwrap();
        osal.rtl_globals_unlock().unwrap();
        assert_eq!(osal.sched_lock_depth(), 0);
    }

    #[test]
    fn test_scheduler_active() {
        let osal = sim_osal(OsalConfig::new());
        assert!(!osal.is_scheduler_active());
        osal.kernel().start();
        assert!(osal.is_scheduler_active());
    }

    #[test]
    fn test_isr_context_reported() {
        let osal = booted();
        let ctx = osal.kernel().isr(|| osal.caller_context());
        assert_eq!(ctx, CallerContext::Isr);
        assert_eq!(osal.critical_region(|| 5), 5);
    }

    #[test]
    fn test_version() {
        let v = version();
        assert_eq!(v.major, 2);
    }
}
