//! Core type definitions for the OSAL
//!
//! Handles are opaque 32-bit values: a registry index in the low half and a
//! generation count in the high half. A handle stops matching its slot as
//! soon as the object is destroyed.

/// Tick count and timeout type
pub type Ticks = u32;

/// Portable thread priority (0 = highest)
pub type OsalPriority = u32;

/// Event flag word
pub type EventFlags = u32;

/// Message queue element, usually a pointer cast to `usize`
pub type QueueMsg = usize;

/// Value stored in a TLS slot
pub type SlotValue = usize;

/// Return immediately if the object is unavailable
pub const TIMEOUT_NONE: Ticks = 0;

/// Wait without bound
pub const TIMEOUT_FOREVER: Ticks = u32::MAX;

/// Event group wait predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventFlagOption {
    /// Any bit of the mask set
    Any = 1,
    /// Every bit of the mask set
    All = 2,
}

impl TryFrom<u8> for EventFlagOption {
    type Error = crate::error::OsalStatus;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(EventFlagOption::Any),
            2 => Ok(EventFlagOption::All),
            _ => Err(crate::error::OsalStatus::BadOption),
        }
    }
}

/// Raw handle encoding shared by all handle kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawHandle(u32);

impl RawHandle {
    /// Sentinel written on failed creation
    pub const INVALID: RawHandle = RawHandle(u32::MAX);

    #[inline]
    pub(crate) const fn new(index: u16, gen: u16) -> Self {
        RawHandle(((gen as u32) << 16) | index as u32)
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        RawHandle(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.0 == u32::MAX || self.generation() == 0
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(pub(crate) RawHandle);

        impl $name {
            /// Sentinel for "no object"
            pub const INVALID: $name = $name(RawHandle::INVALID);

            #[inline]
            pub const fn raw(self) -> RawHandle {
                self.0
            }

            #[inline]
            pub const fn from_raw(raw: RawHandle) -> Self {
                $name(raw)
            }

            #[inline]
            pub const fn is_invalid(self) -> bool {
                self.0.is_invalid()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

define_handle!(
    /// Handle to an OSAL thread
    ThreadHandle
);
define_handle!(
    /// Handle to a recursive mutex
    MutexHandle
);
define_handle!(
    /// Handle to a counting semaphore
    SemHandle
);
define_handle!(
    /// Handle to an event group
    EventHandle
);
define_handle!(
    /// Handle to a message queue
    QueueHandle
);

impl ThreadHandle {
    /// Identity of the code running before the scheduler starts
    pub const STARTUP: ThreadHandle = ThreadHandle(RawHandle(0xFFFF_FFFE));

    #[inline]
    pub const fn is_startup(self) -> bool {
        self.0.bits() == Self::STARTUP.0.bits()
    }
}
