//! Core OSAL modules
//!
//! Contains the registry object, handle registry, caller-context checks,
//! thread lifecycle, thread-local storage and timing.

pub mod config;
pub mod context;
pub mod critical;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod sched_lock;
pub mod thread;
pub mod time;
pub mod timeout;
pub mod tls;
pub mod types;
pub mod cs_cell;

#[cfg(test)]
pub(crate) mod test_util;
