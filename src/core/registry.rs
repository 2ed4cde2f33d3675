//! Handle registry
//!
//! A fixed-capacity arena that hands out [`RawHandle`]s made of a slot index
//! and a generation count. Releasing a slot bumps its generation, so a handle
//! kept past `destroy` never resolves to whatever later reuses the slot.
//!
//! Slots go through three states:
//! - `Free`: available for allocation
//! - `Reserved`: allocated but not visible to lookups (being created or
//!   being destroyed)
//! - `Live`: resolvable by its handle

use crate::config::VALIDATE;
use crate::core::cs_cell::CsCell;
use crate::error::{OsalResult, OsalStatus};
use crate::types::RawHandle;

enum SlotState<T> {
    Free,
    Reserved(T),
    Live(T),
}

struct Slot<T> {
    gen: u16,
    state: SlotState<T>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Slot { gen: 1, state: SlotState::Free }
    }
}

/// Generation-counted object arena
pub struct Registry<T, const N: usize> {
    slots: [Slot<T>; N],
    live: usize,
}

impl<T, const N: usize> Registry<T, N> {
    pub fn new() -> Self {
        Registry {
            slots: core::array::from_fn(|_| Slot::new()),
            live: 0,
        }
    }

    /// Number of allocated slots, live or reserved
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_full(&self) -> bool {
        self.live == N
    }

    /// Allocate a slot that lookups do not see yet
    pub fn reserve(&mut self, value: T) -> OsalResult<RawHandle> {
        self.occupy(value, SlotState::Reserved)
            .map_err(|_| OsalStatus::MemAllocFailed)
    }

    /// Allocate a slot and make it resolvable immediately
    pub fn insert(&mut self, value: T) -> OsalResult<RawHandle> {
        let handle = self.reserve(value)?;
        self.publish(handle);
        Ok(handle)
    }

    /// Like [`insert`](Self::insert), but hands `value` back when full
    pub fn try_insert(&mut self, value: T) -> Result<RawHandle, T> {
        self.occupy(value, SlotState::Live)
    }

    fn occupy(&mut self, value: T, state: fn(T) -> SlotState<T>) -> Result<RawHandle, T> {
        let Some(index) = self.slots.iter().position(|s| matches!(s.state, SlotState::Free)) else {
            return Err(value);
        };
        let slot = &mut self.slots[index];
        slot.state = state(value);
        self.live += 1;
        Ok(RawHandle::new(index as u16, slot.gen))
    }

    /// Make a reserved slot resolvable
    pub fn publish(&mut self, handle: RawHandle) {
        self.transition(handle, |state| match state {
            SlotState::Reserved(v) => SlotState::Live(v),
            other => other,
        });
    }

    /// Hide a live slot from lookups without freeing it
    pub fn poison(&mut self, handle: RawHandle) {
        self.transition(handle, |state| match state {
            SlotState::Live(v) => SlotState::Reserved(v),
            other => other,
        });
    }

    /// Free a slot, returning its value
    pub fn release(&mut self, handle: RawHandle) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        match core::mem::replace(&mut slot.state, SlotState::Free) {
            SlotState::Free => None,
            SlotState::Reserved(v) | SlotState::Live(v) => {
                slot.gen = next_generation(slot.gen);
                self.live -= 1;
                Some(v)
            }
        }
    }

    /// Resolve a live handle
    pub fn get(&self, handle: RawHandle) -> OsalResult<&T> {
        let slot = self.slots.get(handle.index()).ok_or(OsalStatus::BadHandle)?;
        match &slot.state {
            SlotState::Live(v) if !VALIDATE || slot.gen == handle.generation() => Ok(v),
            SlotState::Reserved(v) if !VALIDATE => Ok(v),
            _ => Err(OsalStatus::BadHandle),
        }
    }

    /// Resolve a live handle mutably
    pub fn get_mut(&mut self, handle: RawHandle) -> OsalResult<&mut T> {
        let slot = self.slots.get_mut(handle.index()).ok_or(OsalStatus::BadHandle)?;
        let gen_ok = !VALIDATE || slot.gen == handle.generation();
        match &mut slot.state {
            SlotState::Live(v) if gen_ok => Ok(v),
            SlotState::Reserved(v) if !VALIDATE => Ok(v),
            _ => Err(OsalStatus::BadHandle),
        }
    }

    /// Check whether `handle` currently resolves
    pub fn contains(&self, handle: RawHandle) -> bool {
        self.get(handle).is_ok()
    }

    fn slot_mut(&mut self, handle: RawHandle) -> Option<&mut Slot<T>> {
        let slot = self.slots.get_mut(handle.index())?;
        (slot.gen == handle.generation()).then_some(slot)
    }

    fn transition(&mut self, handle: RawHandle, f: impl FnOnce(SlotState<T>) -> SlotState<T>) {
        if let Some(slot) = self.slot_mut(handle) {
            let state = core::mem::replace(&mut slot.state, SlotState::Free);
            slot.state = f(state);
        }
    }
}

impl<T, const N: usize> Default for Registry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Generations skip 0 so that a zeroed handle never resolves
#[inline]
fn next_generation(gen: u16) -> u16 {
    match gen.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

// ============ Caller-owned storage ============

/// Caller-owned storage for an object record
///
/// Used by the `*_create_static` variants. The storage must outlive every
/// handle created on it, hence the `'static` borrow.
pub struct StaticObject<T>(CsCell<Option<T>>);

impl<T> StaticObject<T> {
    pub const fn new() -> Self {
        StaticObject(CsCell::new(None))
    }

    /// Whether the storage currently backs a live object
    pub fn in_use(&self) -> bool {
        self.0.with(|slot| slot.is_some())
    }

    /// Storage footprint in bytes
    pub const fn size() -> usize {
        core::mem::size_of::<Self>()
    }
}

impl<T> Default for StaticObject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a registry entry keeps its record
pub enum Backing<T: 'static> {
    /// Record lives in the registry pool
    Pool(T),
    /// Record lives in caller-owned storage
    Caller(&'static StaticObject<T>),
}

impl<T: 'static> Backing<T> {
    /// Place `record` in caller storage, failing if the storage is taken
    pub fn claim(storage: &'static StaticObject<T>, record: T) -> OsalResult<Self> {
        storage.0.with(|slot| {
            if slot.is_some() {
                return Err(OsalStatus::Failed);
            }
            *slot = Some(record);
            Ok(())
        })?;
        Ok(Backing::Caller(storage))
    }

    /// Run `f` on the record
    pub fn with<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> OsalResult<R> {
        match self {
            Backing::Pool(record) => Ok(f(record)),
            Backing::Caller(storage) => storage
                .0
                .with(|slot| slot.as_mut().map(f))
                .ok_or(OsalStatus::BadHandle),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Backing::Caller(_))
    }

    /// Hand caller storage back, returning the record
    pub fn vacate(self) -> Option<T> {
        match self {
            Backing::Pool(record) => Some(record),
            Backing::Caller(storage) => storage.0.with(|slot| slot.take()),
        }
    }
}
