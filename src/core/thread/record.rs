//! Thread creation attributes and registry record

use crate::config::{CFG_MAX_THREAD_NAME, CFG_STACK_ALIGN};
use crate::error::{OsalResult, OsalStatus};
use crate::types::OsalPriority;

use super::ThreadFn;

/// Attributes for [`Osal::thread_create`](crate::Osal::thread_create)
pub struct ThreadAttr {
    /// Thread name, at most [`CFG_MAX_THREAD_NAME`] bytes
    pub name: &'static str,
    /// Entry point
    pub entry: Option<ThreadFn>,
    /// Argument passed to `entry`
    pub arg: usize,
    /// Portable priority (0 = highest)
    pub priority: OsalPriority,
    /// Stack memory handed to the native kernel
    pub stack: &'static mut [u8],
}

impl ThreadAttr {
    /// Check stack placement, entry point and name
    pub fn validate(&self) -> OsalResult<()> {
        if self.stack.as_ptr() as usize % CFG_STACK_ALIGN != 0 {
            return Err(OsalStatus::BadStackAddr);
        }
        if self.entry.is_none() {
            return Err(OsalStatus::BadThreadFunc);
        }
        if self.stack.is_empty() || self.stack.len() % CFG_STACK_ALIGN != 0 {
            return Err(OsalStatus::BadStackSize);
        }
        if self.name.len() > CFG_MAX_THREAD_NAME {
            return Err(OsalStatus::BadThreadName);
        }
        Ok(())
    }
}

/// Registry entry of an OSAL thread
#[derive(Debug, Clone, Copy)]
pub struct ThreadRecord {
    /// Native priority, which is also the native task identifier
    pub(crate) native_prio: u8,
    pub(crate) name: &'static str,
}

impl ThreadRecord {
    pub(crate) const fn new(native_prio: u8, name: &'static str) -> Self {
        ThreadRecord { native_prio, name }
    }
}
