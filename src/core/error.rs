//! Portable status codes
//!
//! Every OSAL entry point reports failures with one of these codes. Native
//! kernel results are translated at the boundary, see [`crate::port::NativeError`].

use core::fmt;

/// OSAL status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OsalStatus {
    /// No error
    Success = 0,
    /// Generic failure
    Failed = 1,

    // ============ Caller-context errors ============
    /// Called from an interrupt handler or a scheduler-locked region
    CallerError = 10,

    // ============ Handle errors ============
    /// Null, sentinel, destroyed or foreign handle
    BadHandle = 20,
    /// TLS key without a valid signature or out of the configured range
    BadSlotKey = 21,

    // ============ Argument errors ============
    /// Timeout outside `{NONE, FOREVER, 1..=MAX}`
    BadTime = 30,
    /// Priority outside the native band
    BadPriority = 31,
    /// Stack base is not aligned
    BadStackAddr = 32,
    /// Stack size is zero or not a multiple of the alignment
    BadStackSize = 33,
    /// Thread entry function missing
    BadThreadFunc = 34,
    /// Thread name too long
    BadThreadName = 35,
    /// Count exceeds the native counter width
    BadCount = 36,
    /// Unsupported wait option
    BadOption = 37,
    /// Caller-supplied memory is not usable
    BadMemory = 38,
    /// Invalid argument
    InvalidArgs = 39,

    // ============ Resource errors ============
    /// Native priority already taken
    PriorityInUse = 40,
    /// Registry pool or native object pool exhausted
    MemAllocFailed = 41,
    /// Counter would overflow
    CountOverflow = 42,
    /// Queue has no free entry
    QueueFull = 43,
    /// Queue has no message
    QueueEmpty = 44,

    // ============ Ownership errors ============
    /// Mutex released by a thread that does not own it
    NotMutexOwner = 50,

    // ============ Wait errors ============
    /// Bounded wait expired
    Timeout = 60,
    /// Object destroyed while threads were pending on it
    ThreadPending = 61,

    // ============ Kernel errors ============
    /// Native kernel incompatible or in an unexpected state
    OsError = 70,
}

/// Result type alias for OSAL operations
pub type OsalResult<T> = Result<T, OsalStatus>;

impl OsalStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == OsalStatus::Success
    }

    #[inline]
    pub fn is_err(self) -> bool {
        self != OsalStatus::Success
    }

    /// Numeric status code
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Collapse a result into a status code
    #[inline]
    pub fn from_result<T>(result: &OsalResult<T>) -> Self {
        match result {
            Ok(_) => OsalStatus::Success,
            Err(status) => *status,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OsalStatus::Success => "success",
            OsalStatus::Failed => "failed",
            OsalStatus::CallerError => "illegal caller context",
            OsalStatus::BadHandle => "bad handle",
            OsalStatus::BadSlotKey => "bad TLS slot key",
            OsalStatus::BadTime => "bad timeout",
            OsalStatus::BadPriority => "bad priority",
            OsalStatus::BadStackAddr => "misaligned stack",
            OsalStatus::BadStackSize => "bad stack size",
            OsalStatus::BadThreadFunc => "missing thread function",
            OsalStatus::BadThreadName => "thread name too long",
            OsalStatus::BadCount => "bad count",
            OsalStatus::BadOption => "bad option",
            OsalStatus::BadMemory => "bad memory",
            OsalStatus::InvalidArgs => "invalid arguments",
            OsalStatus::PriorityInUse => "priority in use",
            OsalStatus::MemAllocFailed => "allocation failed",
            OsalStatus::CountOverflow => "count overflow",
            OsalStatus::QueueFull => "queue full",
            OsalStatus::QueueEmpty => "queue empty",
            OsalStatus::NotMutexOwner => "not mutex owner",
            OsalStatus::Timeout => "timeout",
            OsalStatus::ThreadPending => "thread pending",
            OsalStatus::OsError => "native kernel error",
        }
    }
}

impl fmt::Display for OsalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for OsalStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}
