//! Operating-system abstraction layer over μC/OS-II
//!
//! A portable threading and synchronization API providing:
//! - Generation-checked handles for threads and kernel objects
//! - Recursive, ownership-tracked mutexes on top of native semaphores
//! - Process-wide thread-local storage slots with teardown callbacks
//! - Uniform timeout semantics over 16-bit native tick timeouts
//! - Caller-context checks for interrupt and scheduler-locked regions

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Modules ============

pub mod log;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::{OsalConfig, VALIDATE};
pub use crate::core::context;
pub use crate::core::critical;
pub use crate::core::error;
pub use crate::core::error::{OsalResult, OsalStatus};
pub use crate::core::kernel;
pub use crate::core::kernel::{version, Osal, Version};
pub use crate::core::thread;
pub use crate::core::thread::{ThreadAttr, ThreadFn};
pub use crate::core::time;
pub use crate::core::timeout;
pub use crate::core::tls;
pub use crate::core::tls::{TlsDestructor, TlsKey};
pub use crate::core::types;
pub use crate::core::types::*;

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "event")]
pub use sync::event;
#[cfg(feature = "queue")]
pub use sync::queue;

pub use port::NativeKernel;
