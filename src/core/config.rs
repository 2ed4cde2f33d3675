//! Compile-time and start-up configuration for the OSAL
//!
//! The constants control resource limits and the mapping onto the native
//! kernel. [`OsalConfig`] carries the values chosen at start-up.

use static_assertions::const_assert;

use crate::error::{OsalResult, OsalStatus};

/// Whether the validating layer is compiled in.
///
/// With the `validate` feature disabled, caller-context, handle-generation
/// and argument checks are skipped and callers are trusted.
pub const VALIDATE: bool = cfg!(feature = "validate");

/// Maximum number of live OSAL threads
pub const CFG_MAX_THREADS: usize = 16;

/// Maximum number of live mutexes
pub const CFG_MAX_MUTEXES: usize = 16;

/// Maximum number of live semaphores
pub const CFG_MAX_SEMAPHORES: usize = 16;

/// Maximum number of live event groups
pub const CFG_MAX_EVENT_GROUPS: usize = 8;

/// Maximum number of live message queues
pub const CFG_MAX_QUEUES: usize = 8;

/// Maximum number of TLS slots (one bit each in the allocation mask)
pub const CFG_MAX_TLS_SLOTS: u32 = 32;

/// First native priority available to OSAL threads.
///
/// The kernel keeps priorities below this for its own tasks.
pub const CFG_BASE_PRIO: u8 = 4;

/// Native priority reported for the virtual startup thread
pub const CFG_STARTUP_PRIO: u8 = 0;

/// Maximum thread name length in bytes
pub const CFG_MAX_THREAD_NAME: usize = 16;

/// Required alignment of thread stacks, in bytes
pub const CFG_STACK_ALIGN: usize = core::mem::align_of::<u32>();

/// Largest finite timeout the native kernel accepts (16-bit ticks)
pub const CFG_MAX_TIMEOUT: u32 = u16::MAX as u32;

/// Largest initial semaphore count (16-bit native counter)
pub const CFG_SEM_MAX_COUNT: u32 = u16::MAX as u32;

/// Largest message queue capacity (16-bit native entry count)
pub const CFG_MAX_QUEUE_ENTRIES: usize = u16::MAX as usize;

/// Oldest native kernel version the OSAL runs on (2.92.00)
pub const CFG_COMPATIBLE_OS_VERSION: u16 = 29200;

/// Tick period value meaning "not configured"
pub const TICK_PERIOD_UNKNOWN: u32 = u32::MAX;

const_assert!(CFG_MAX_TLS_SLOTS <= u32::BITS);
const_assert!(CFG_MAX_THREADS < 0xFFFF);
const_assert!(CFG_MAX_MUTEXES < 0xFFFF);
const_assert!(CFG_MAX_SEMAPHORES < 0xFFFF);
const_assert!(CFG_MAX_EVENT_GROUPS < 0xFFFF);
const_assert!(CFG_MAX_QUEUES < 0xFFFF);
const_assert!(CFG_STARTUP_PRIO < CFG_BASE_PRIO);

/// Start-up configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsalConfig {
    /// Number of TLS slots the application may use
    pub num_tls_slots: u32,
    /// Duration of one kernel tick in microseconds, or 0 if unknown
    pub tick_period_us: u32,
}

impl OsalConfig {
    /// Configuration with every TLS slot available and no tick period
    pub const fn new() -> Self {
        Self {
            num_tls_slots: CFG_MAX_TLS_SLOTS,
            tick_period_us: 0,
        }
    }

    pub const fn with_tls_slots(mut self, slots: u32) -> Self {
        self.num_tls_slots = slots;
        self
    }

    pub const fn with_tick_period_us(mut self, period: u32) -> Self {
        self.tick_period_us = period;
        self
    }

    /// Check the configuration against the compile-time limits
    pub fn validate(&self) -> OsalResult<()> {
        if self.num_tls_slots > CFG_MAX_TLS_SLOTS {
            return Err(OsalStatus::BadSlotKey);
        }
        Ok(())
    }

    /// Tick period as stored by the registry
    pub(crate) fn stored_tick_period(&self) -> u32 {
        if self.tick_period_us == 0 {
            TICK_PERIOD_UNKNOWN
        } else {
            self.tick_period_us
        }
    }
}

impl Default for OsalConfig {
    fn default() -> Self {
        Self::new()
    }
}
