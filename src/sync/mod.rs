//! Synchronization primitives
//!
//! Contains the mutex emulation and the semaphore, event group and message
//! queue pass-throughs. Records that may live in caller storage share the
//! admit/retire plumbing below.

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "event")]
pub mod event;

#[cfg(feature = "queue")]
pub mod queue;

use crate::error::OsalStatus;
use crate::port::NativeError;

#[cfg(any(feature = "mutex", feature = "sem", feature = "event"))]
use crate::{
    core::cs_cell::CsCell,
    core::registry::{Backing, Registry, StaticObject},
    error::OsalResult,
    types::RawHandle,
};

/// A record wrapping one native kernel object
pub(crate) trait NativeRecord {
    type Native: Copy;

    fn native(&self) -> Self::Native;
}

/// Register a record whose native object already exists
///
/// With `storage` the record is placed in caller memory. On failure `delete`
/// disposes of the native object.
#[cfg(any(feature = "mutex", feature = "sem", feature = "event"))]
pub(crate) fn admit<T: NativeRecord + 'static, const N: usize>(
    registry: &CsCell<Registry<Backing<T>, N>>,
    record: T,
    storage: Option<&'static StaticObject<T>>,
    delete: impl FnOnce(T::Native),
) -> OsalResult<RawHandle> {
    let native = record.native();
    let backing = match storage {
        None => Backing::Pool(record),
        Some(storage) => match Backing::claim(storage, record) {
            Ok(backing) => backing,
            Err(err) => {
                delete(native);
                return Err(err);
            }
        },
    };
    match registry.with(|reg| reg.try_insert(backing)) {
        Ok(raw) => Ok(raw),
        Err(backing) => {
            backing.vacate();
            delete(native);
            Err(OsalStatus::MemAllocFailed)
        }
    }
}

/// Run `f` on the record behind `raw`
#[cfg(any(feature = "mutex", feature = "sem", feature = "event"))]
pub(crate) fn with_record<T: 'static, R, const N: usize>(
    registry: &CsCell<Registry<Backing<T>, N>>,
    raw: RawHandle,
    f: impl FnOnce(&mut T) -> R,
) -> OsalResult<R> {
    registry.with(|reg| reg.get_mut(raw)?.with(f))
}

/// Unregister a record and delete its native object
///
/// The handle stops resolving while `delete` runs and resolves again if it
/// fails. Pool records may only be retired by the plain destroy call and
/// caller-storage records only by the static one.
#[cfg(any(feature = "mutex", feature = "sem", feature = "event"))]
pub(crate) fn retire<T: NativeRecord + 'static, const N: usize>(
    registry: &CsCell<Registry<Backing<T>, N>>,
    raw: RawHandle,
    from_static: bool,
    delete: impl FnOnce(T::Native) -> OsalResult<()>,
) -> OsalResult<()> {
    let native = registry.with(|reg| {
        let backing = reg.get_mut(raw)?;
        if backing.is_static() != from_static {
            return Err(OsalStatus::BadHandle);
        }
        let native = backing.with(|record| record.native())?;
        reg.poison(raw);
        Ok(native)
    })?;

    if let Err(err) = delete(native) {
        registry.with(|reg| reg.publish(raw));
        return Err(err);
    }
    if let Some(backing) = registry.with(|reg| reg.release(raw)) {
        backing.vacate();
    }
    Ok(())
}

/// Translate a native pend or accept failure
pub(crate) fn pend_error(err: NativeError) -> OsalStatus {
    match err {
        NativeError::Timeout => OsalStatus::Timeout,
        NativeError::PendIsr | NativeError::PendLocked => OsalStatus::CallerError,
        NativeError::EventType | NativeError::PeventNull | NativeError::FlagInvalidPgrp => {
            OsalStatus::BadHandle
        }
        NativeError::FlagWaitType | NativeError::InvalidOpt => OsalStatus::BadOption,
        _ => OsalStatus::Failed,
    }
}

/// Translate a native delete failure
pub(crate) fn del_error(err: NativeError) -> OsalStatus {
    match err {
        NativeError::TaskWaiting => OsalStatus::ThreadPending,
        NativeError::DelIsr => OsalStatus::CallerError,
        NativeError::EventType | NativeError::PeventNull | NativeError::FlagInvalidPgrp => {
            OsalStatus::BadHandle
        }
        _ => OsalStatus::Failed,
    }
}
