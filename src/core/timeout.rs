//! Timeout normalization
//!
//! The portable timeout domain is `{TIMEOUT_NONE, TIMEOUT_FOREVER, 1..=CFG_MAX_TIMEOUT}`.
//! The native kernel takes 16-bit tick counts where 0 means "forever" and has
//! a separate non-blocking accept call, so every wait is mapped onto one of
//! three native variants.

use crate::config::{CFG_MAX_TIMEOUT, VALIDATE};
use crate::error::{OsalResult, OsalStatus};
use crate::port::NATIVE_WAIT_FOREVER;
use crate::types::{Ticks, TIMEOUT_FOREVER, TIMEOUT_NONE};

/// Native form of a portable timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeWait {
    /// Non-blocking accept
    Poll,
    /// Unbounded pend
    Forever,
    /// Pend bounded by a non-zero tick count
    Ticks(u16),
}

impl NativeWait {
    /// Timeout argument for the native pend call
    #[inline]
    pub fn native_ticks(self) -> u16 {
        match self {
            NativeWait::Poll | NativeWait::Forever => NATIVE_WAIT_FOREVER,
            NativeWait::Ticks(t) => t,
        }
    }
}

/// Map a portable timeout onto its native variant
///
/// Finite values above [`CFG_MAX_TIMEOUT`] are rejected with
/// [`OsalStatus::BadTime`], or clamped when validation is compiled out.
pub fn normalize(timeout: Ticks) -> OsalResult<NativeWait> {
    match timeout {
        TIMEOUT_NONE => Ok(NativeWait::Poll),
        TIMEOUT_FOREVER => Ok(NativeWait::Forever),
        t if t <= CFG_MAX_TIMEOUT => Ok(NativeWait::Ticks(t as u16)),
        _ if VALIDATE => Err(OsalStatus::BadTime),
        _ => Ok(NativeWait::Ticks(CFG_MAX_TIMEOUT as u16)),
    }
}

/// Run the native call matching `wait`
///
/// `poll` is the accept variant, `pend` receives the native tick argument.
#[inline]
pub fn dispatch<T>(
    wait: NativeWait,
    poll: impl FnOnce() -> OsalResult<T>,
    pend: impl FnOnce(u16) -> OsalResult<T>,
) -> OsalResult<T> {
    match wait {
        NativeWait::Poll => poll(),
        NativeWait::Forever | NativeWait::Ticks(_) => pend(wait.native_ticks()),
    }
}
