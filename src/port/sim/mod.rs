//! Host simulation of the native kernel
//!
//! Native tasks run on std threads. Kernel state lives behind one mutex and
//! every state change wakes all waiters through one condition variable. The
//! model follows μC/OS-II where the OSAL can observe the difference:
//! - priorities 0..=63, the idle task holds 63
//! - tasks created before [`SimKernel::start`] do not run until it is called
//! - 16-bit semaphore counts, pend timeouts in ticks with 0 meaning forever
//! - the scheduler lock is reentrant and only honoured once the kernel runs;
//!   a thread that does not hold it stalls at its next kernel entry, and
//!   pending while holding it fails with [`NativeError::PendLocked`]
//! - interrupt context is per thread and entered with [`SimKernel::isr`]
//! - std threads the kernel did not create are adopted as foreign tasks
//!   without an extension word, and dropped again when the thread exits
//! - freed semaphore, flag group and queue blocks are reused
//!
//! A deleted task's std thread cannot be stopped. It runs until its entry
//! function returns and its blocking calls fail with [`NativeError::PendAbort`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::{
    DelOpt, FlagOp, FlagWait, NativeError, NativeKernel, NativeResult, SemData, TaskFn, TaskId,
    TaskSpec, TlsId, TlsTeardown, NATIVE_WAIT_FOREVER,
};
use crate::types::{EventFlags, QueueMsg, SlotValue};

/// Lowest native priority, reserved for the idle task
pub const SIM_LOWEST_PRIO: u8 = 63;

/// Task name capacity including the terminator, as `OS_TASK_NAME_SIZE`
pub const SIM_TASK_NAME_SIZE: usize = 32;

/// Version reported by default (2.92.13)
pub const SIM_VERSION: u16 = 29213;

const IDLE_TASK: TaskId = 1;

/// Simulation limits
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Task control blocks available to created tasks
    pub max_tasks: usize,
    /// Event control blocks shared by semaphores and queues
    pub max_events: usize,
    pub max_flag_groups: usize,
    /// Size of the TLS id space
    pub tls_ids: u8,
    /// Wall-clock length of one tick
    pub tick: Duration,
    pub version: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            max_tasks: 32,
            max_events: 64,
            max_flag_groups: 16,
            tls_ids: 32,
            tick: Duration::from_millis(1),
            version: SIM_VERSION,
        }
    }
}

/// Simulated semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimSem(usize);

/// Simulated flag group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimFlags(usize);

/// Simulated message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimQueue(usize);

// ============ Kernel state ============

struct Task {
    prio: Option<u8>,
    ext: usize,
    name: &'static str,
    tls: Vec<SlotValue>,
}

struct Waitable<T> {
    state: T,
    waiters: usize,
}

impl<T> Waitable<T> {
    fn new(state: T) -> Self {
        Waitable { state, waiters: 0 }
    }
}

struct Ring {
    storage: &'static mut [QueueMsg],
    head: usize,
    len: usize,
}

impl Ring {
    fn push(&mut self, msg: QueueMsg) -> bool {
        let cap = self.storage.len();
        if self.len == cap {
            return false;
        }
        self.storage[(self.head + self.len) % cap] = msg;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<QueueMsg> {
        if self.len == 0 {
            return None;
        }
        let msg = self.storage[self.head];
        self.head = (self.head + 1) % self.storage.len();
        self.len -= 1;
        Some(msg)
    }
}

#[derive(Clone, Copy)]
enum Obj {
    Sem(usize),
    Flags(usize),
    Queue(usize),
}

struct State {
    running: bool,
    next_task: TaskId,
    tasks: HashMap<TaskId, Task>,
    bound: HashMap<ThreadId, TaskId>,
    prio_tbl: HashMap<u8, TaskId>,
    isr: HashMap<ThreadId, u8>,
    lock_owner: Option<ThreadId>,
    lock_nesting: u8,
    sems: Vec<Option<Waitable<u16>>>,
    flags: Vec<Option<Waitable<EventFlags>>>,
    queues: Vec<Option<Waitable<Ring>>>,
    tls_next: TlsId,
    tls_hooks: Vec<Option<&'static dyn TlsTeardown>>,
    ticks: u32,
}

impl State {
    fn new(config: &SimConfig) -> Self {
        let mut prio_tbl = HashMap::new();
        prio_tbl.insert(SIM_LOWEST_PRIO, IDLE_TASK);
        State {
            running: false,
            next_task: IDLE_TASK + 1,
            tasks: HashMap::new(),
            bound: HashMap::new(),
            prio_tbl,
            isr: HashMap::new(),
            lock_owner: None,
            lock_nesting: 0,
            sems: Vec::new(),
            flags: Vec::new(),
            queues: Vec::new(),
            tls_next: 0,
            tls_hooks: vec![None; config.tls_ids as usize],
            ticks: 0,
        }
    }

    fn in_isr(&self, me: ThreadId) -> bool {
        self.isr.get(&me).copied().unwrap_or(0) > 0
    }

    /// Whether another thread holds the scheduler lock
    fn locked_out(&self, me: ThreadId) -> bool {
        matches!(self.lock_owner, Some(owner) if owner != me) && !self.in_isr(me)
    }

    fn alloc_task(&mut self, prio: Option<u8>, ext: usize, tls_ids: u8) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;
        self.tasks.insert(
            id,
            Task {
                prio,
                ext,
                name: "",
                tls: vec![0; tls_ids as usize],
            },
        );
        id
    }

    /// Forget a foreign task whose thread has exited
    fn drop_adopted(&mut self, id: TaskId) {
        self.tasks.remove(&id);
        self.bound.retain(|_, bound| *bound != id);
    }

    fn live_events(&self) -> usize {
        self.sems.iter().flatten().count() + self.queues.iter().flatten().count()
    }

    fn exists(&self, obj: Obj) -> bool {
        match obj {
            Obj::Sem(i) => matches!(self.sems.get(i), Some(Some(_))),
            Obj::Flags(i) => matches!(self.flags.get(i), Some(Some(_))),
            Obj::Queue(i) => matches!(self.queues.get(i), Some(Some(_))),
        }
    }

    fn waiters_mut(&mut self, obj: Obj) -> Option<&mut usize> {
        match obj {
            Obj::Sem(i) => self.sems.get_mut(i)?.as_mut().map(|w| &mut w.waiters),
            Obj::Flags(i) => self.flags.get_mut(i)?.as_mut().map(|w| &mut w.waiters),
            Obj::Queue(i) => self.queues.get_mut(i)?.as_mut().map(|w| &mut w.waiters),
        }
    }

    fn add_waiter(&mut self, obj: Obj) {
        if let Some(w) = self.waiters_mut(obj) {
            *w += 1;
        }
    }

    fn remove_waiter(&mut self, obj: Obj) {
        if let Some(w) = self.waiters_mut(obj) {
            *w = w.saturating_sub(1);
        }
    }

    fn is_bound_task_gone(&self, me: ThreadId, was: Option<TaskId>) -> bool {
        match was {
            Some(id) => !self.tasks.contains_key(&id) || self.bound.get(&me) != Some(&id),
            None => false,
        }
    }
}

/// Place `value` in the first free block
fn insert_free<T>(blocks: &mut Vec<Option<T>>, value: T) -> usize {
    match blocks.iter().position(Option::is_none) {
        Some(i) => {
            blocks[i] = Some(value);
            i
        }
        None => {
            blocks.push(Some(value));
            blocks.len() - 1
        }
    }
}

/// Foreign tasks adopted on this thread, dropped when it exits
#[derive(Default)]
struct Adopted(Vec<(Weak<Shared>, TaskId)>);

impl Drop for Adopted {
    fn drop(&mut self) {
        for (shared, id) in self.0.drain(..) {
            if let Some(shared) = shared.upgrade() {
                shared.lock().drop_adopted(id);
            }
        }
    }
}

thread_local! {
    static ADOPTED: RefCell<Adopted> = RefCell::new(Adopted::default());
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    config: SimConfig,
    epoch: Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state once no other thread holds the scheduler lock
    fn enter(&self) -> MutexGuard<'_, State> {
        let me = thread::current().id();
        let mut st = self.lock();
        while st.locked_out(me) {
            st = self.wait(st);
        }
        st
    }

    fn notify(&self) {
        self.cond.notify_all();
    }

    /// Task bound to the calling thread, adopting the thread if it is unknown
    fn current(self: &Arc<Self>, st: &mut State) -> TaskId {
        let me = thread::current().id();
        if let Some(&id) = st.bound.get(&me) {
            return id;
        }
        let id = st.alloc_task(None, 0, self.config.tls_ids);
        st.bound.insert(me, id);
        let entry = (Arc::downgrade(self), id);
        ADOPTED.try_with(|adopted| adopted.borrow_mut().0.push(entry)).ok();
        id
    }

    /// Block until `take` yields a value, the timeout expires or the object goes away
    fn pend<T>(
        &self,
        obj: Obj,
        timeout: u16,
        mut take: impl FnMut(&mut State) -> Option<T>,
    ) -> NativeResult<T> {
        let me = thread::current().id();
        let mut st = self.enter();
        if st.in_isr(me) {
            return Err(NativeError::PendIsr);
        }
        if st.lock_owner == Some(me) {
            return Err(NativeError::PendLocked);
        }
        if !st.exists(obj) {
            return Err(NativeError::EventType);
        }
        if let Some(value) = take(&mut st) {
            return Ok(value);
        }

        let task = st.bound.get(&me).copied();
        let deadline = (timeout != NATIVE_WAIT_FOREVER)
            .then(|| Instant::now() + self.config.tick * u32::from(timeout));
        st.add_waiter(obj);
        loop {
            st = match deadline {
                None => self.wait(st),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        st.remove_waiter(obj);
                        return Err(NativeError::Timeout);
                    }
                    self.cond
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
            if !st.exists(obj) {
                return Err(NativeError::PendAbort);
            }
            if st.is_bound_task_gone(me, task) {
                st.remove_waiter(obj);
                return Err(NativeError::PendAbort);
            }
            if st.locked_out(me) {
                continue;
            }
            if let Some(value) = take(&mut st) {
                st.remove_waiter(obj);
                return Ok(value);
            }
        }
    }

    fn run_task(&self, id: TaskId, entry: TaskFn, arg: usize) {
        let me = thread::current().id();
        {
            let mut st = self.lock();
            st.bound.insert(me, id);
            loop {
                if !st.tasks.contains_key(&id) {
                    return;
                }
                if st.running && !st.locked_out(me) {
                    break;
                }
                st = self.wait(st);
            }
        }
        entry(arg);
    }
}

/// Simulated μC/OS-II kernel
#[derive(Clone)]
pub struct SimKernel {
    shared: Arc<Shared>,
}

impl SimKernel {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        SimKernel {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(&config)),
                cond: Condvar::new(),
                config,
                epoch: Instant::now(),
            }),
        }
    }

    /// Kernel reporting a different version number
    pub fn with_version(version: u16) -> Self {
        Self::with_config(SimConfig {
            version,
            ..SimConfig::default()
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Start multitasking
    pub fn start(&self) {
        let mut st = self.shared.lock();
        st.running = true;
        drop(st);
        self.shared.notify();
    }

    /// Run `f` as if from an interrupt handler
    pub fn isr<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Exit<'a>(&'a Shared, ThreadId);

        impl Drop for Exit<'_> {
            fn drop(&mut self) {
                let mut st = self.0.lock();
                if let Some(n) = st.isr.get_mut(&self.1) {
                    *n = n.saturating_sub(1);
                }
            }
        }

        let me = thread::current().id();
        *self.shared.lock().isr.entry(me).or_insert(0) += 1;
        let _exit = Exit(&self.shared, me);
        f()
    }

    /// Number of tasks pending on any object
    pub fn pending_count(&self) -> usize {
        let st = self.shared.lock();
        let sems = st.sems.iter().flatten().map(|w| w.waiters);
        let flags = st.flags.iter().flatten().map(|w| w.waiters);
        let queues = st.queues.iter().flatten().map(|w| w.waiters);
        sems.chain(flags).chain(queues).sum()
    }

    /// Name given to the task at `prio`
    pub fn task_name(&self, prio: u8) -> Option<&'static str> {
        let st = self.shared.lock();
        let id = st.prio_tbl.get(&prio)?;
        st.tasks.get(id).map(|t| t.name)
    }

    /// Native priority of the calling task
    pub fn current_prio(&self) -> Option<u8> {
        let me = thread::current().id();
        let st = self.shared.lock();
        let id = st.bound.get(&me)?;
        st.tasks.get(id).and_then(|t| t.prio)
    }

    fn me() -> ThreadId {
        thread::current().id()
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeKernel for SimKernel {
    type Sem = SimSem;
    type Flags = SimFlags;
    type Queue = SimQueue;

    // ============ Kernel state ============

    fn version(&self) -> u16 {
        self.shared.config.version
    }

    fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    fn int_nesting(&self) -> u8 {
        self.shared.lock().isr.get(&Self::me()).copied().unwrap_or(0)
    }

    fn sched_lock_nesting(&self) -> u8 {
        let st = self.shared.lock();
        if st.lock_owner == Some(Self::me()) {
            st.lock_nesting
        } else {
            0
        }
    }

    fn sched_lock(&self) {
        let me = Self::me();
        let mut st = self.shared.lock();
        if !st.running || st.in_isr(me) {
            return;
        }
        while st.locked_out(me) {
            st = self.shared.wait(st);
        }
        if st.lock_nesting < u8::MAX {
            st.lock_owner = Some(me);
            st.lock_nesting += 1;
        }
    }

    fn sched_unlock(&self) {
        let me = Self::me();
        let mut st = self.shared.lock();
        if !st.running || st.in_isr(me) || st.lock_owner != Some(me) {
            return;
        }
        st.lock_nesting = st.lock_nesting.saturating_sub(1);
        if st.lock_nesting == 0 {
            st.lock_owner = None;
            drop(st);
            self.shared.notify();
        }
    }

    // ============ Time ============

    fn time_get(&self) -> u32 {
        let elapsed = self.shared.epoch.elapsed().as_nanos() / self.shared.config.tick.as_nanos().max(1);
        (elapsed as u32).wrapping_add(self.shared.lock().ticks)
    }

    fn time_tick(&self) {
        let mut st = self.shared.lock();
        st.ticks = st.ticks.wrapping_add(1);
    }

    fn time_dly(&self, ticks: u16) {
        let me = Self::me();
        {
            let st = self.shared.enter();
            if ticks == 0 || st.in_isr(me) || st.lock_owner == Some(me) {
                return;
            }
        }
        thread::sleep(self.shared.config.tick * u32::from(ticks));
    }

    // ============ Tasks ============

    fn task_create(&self, spec: TaskSpec) -> NativeResult<()> {
        let me = Self::me();
        let TaskSpec { entry, arg, prio, stack, ext } = spec;
        let id = {
            let mut st = self.shared.enter();
            if st.in_isr(me) {
                return Err(NativeError::TaskCreateIsr);
            }
            if prio > SIM_LOWEST_PRIO {
                return Err(NativeError::PrioInvalid);
            }
            if st.prio_tbl.contains_key(&prio) {
                return Err(NativeError::PrioExist);
            }
            let created = st.tasks.values().filter(|t| t.prio.is_some()).count();
            if created >= self.shared.config.max_tasks {
                return Err(NativeError::TaskNoMoreTcb);
            }
            let id = st.alloc_task(Some(prio), ext, self.shared.config.tls_ids);
            st.prio_tbl.insert(prio, id);
            id
        };

        // The host thread has its own stack; the caller's is only reserved.
        let _ = stack;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("task-{prio}"))
            .spawn(move || shared.run_task(id, entry, arg));

        if spawned.is_err() {
            let mut st = self.shared.lock();
            st.prio_tbl.remove(&prio);
            st.tasks.remove(&id);
            return Err(NativeError::TaskNoMoreTcb);
        }
        crate::trace!("sim: task {} created at prio {}", id, prio);
        Ok(())
    }

    fn task_del(&self, prio: u8) -> NativeResult<()> {
        let me = Self::me();
        let hooks: Vec<(&'static dyn TlsTeardown, TlsId, SlotValue)> = {
            let mut st = self.shared.enter();
            if st.in_isr(me) {
                return Err(NativeError::TaskDelIsr);
            }
            if prio == SIM_LOWEST_PRIO {
                return Err(NativeError::TaskDelIdle);
            }
            if prio > SIM_LOWEST_PRIO {
                return Err(NativeError::PrioInvalid);
            }
            let id = st.prio_tbl.remove(&prio).ok_or(NativeError::TaskNotExist)?;
            let task = st.tasks.remove(&id).ok_or(NativeError::TaskNotExist)?;
            st.bound.retain(|_, bound| *bound != id);
            st.tls_hooks
                .iter()
                .enumerate()
                .filter_map(|(i, hook)| hook.map(|h| (h, i as TlsId, task.tls[i])))
                .collect()
        };
        self.shared.notify();

        for (hook, id, value) in hooks {
            hook.teardown(id, value);
        }
        Ok(())
    }

    fn task_change_prio(&self, old: u8, new: u8) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if old >= SIM_LOWEST_PRIO || new >= SIM_LOWEST_PRIO {
            return Err(NativeError::PrioInvalid);
        }
        if st.prio_tbl.contains_key(&new) {
            return Err(NativeError::PrioExist);
        }
        let id = st.prio_tbl.remove(&old).ok_or(NativeError::Prio)?;
        st.prio_tbl.insert(new, id);
        if let Some(task) = st.tasks.get_mut(&id) {
            task.prio = Some(new);
        }
        Ok(())
    }

    fn task_name_set(&self, prio: u8, name: &'static str) -> NativeResult<()> {
        if name.len() >= SIM_TASK_NAME_SIZE {
            return Err(NativeError::TaskNameTooLong);
        }
        let mut st = self.shared.enter();
        let id = *st.prio_tbl.get(&prio).ok_or(NativeError::TaskNotExist)?;
        let task = st.tasks.get_mut(&id).ok_or(NativeError::TaskNotExist)?;
        task.name = name;
        Ok(())
    }

    fn task_cur(&self) -> TaskId {
        let mut st = self.shared.lock();
        self.shared.current(&mut st)
    }

    fn task_cur_ext(&self) -> usize {
        let mut st = self.shared.lock();
        let id = self.shared.current(&mut st);
        st.tasks.get(&id).map_or(0, |t| t.ext)
    }

    // ============ Semaphores ============

    fn sem_create(&self, count: u16) -> Option<SimSem> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) || st.live_events() >= self.shared.config.max_events {
            return None;
        }
        Some(SimSem(insert_free(&mut st.sems, Waitable::new(count))))
    }

    fn sem_accept(&self, sem: SimSem) -> u16 {
        let mut st = self.shared.enter();
        match st.sems.get_mut(sem.0).and_then(Option::as_mut) {
            Some(w) if w.state > 0 => {
                let before = w.state;
                w.state -= 1;
                before
            }
            _ => 0,
        }
    }

    fn sem_pend(&self, sem: SimSem, timeout: u16) -> NativeResult<()> {
        self.shared.pend(Obj::Sem(sem.0), timeout, |st| {
            let w = st.sems.get_mut(sem.0)?.as_mut()?;
            (w.state > 0).then(|| w.state -= 1)
        })
    }

    fn sem_post(&self, sem: SimSem) -> NativeResult<()> {
        let mut st = self.shared.enter();
        let w = st
            .sems
            .get_mut(sem.0)
            .and_then(Option::as_mut)
            .ok_or(NativeError::EventType)?;
        if w.state == u16::MAX {
            return Err(NativeError::SemOvf);
        }
        w.state += 1;
        drop(st);
        self.shared.notify();
        Ok(())
    }

    fn sem_del(&self, sem: SimSem, opt: DelOpt) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) {
            return Err(NativeError::DelIsr);
        }
        let slot = st.sems.get_mut(sem.0).ok_or(NativeError::PeventNull)?;
        let w = slot.as_ref().ok_or(NativeError::EventType)?;
        if opt == DelOpt::NoPend && w.waiters > 0 {
            return Err(NativeError::TaskWaiting);
        }
        *slot = None;
        drop(st);
        self.shared.notify();
        Ok(())
    }

    fn sem_query(&self, sem: SimSem) -> NativeResult<SemData> {
        let st = self.shared.enter();
        let w = st
            .sems
            .get(sem.0)
            .and_then(Option::as_ref)
            .ok_or(NativeError::EventType)?;
        Ok(SemData {
            count: w.state,
            waiting: w.waiters > 0,
        })
    }

    // ============ Flag groups ============

    fn flag_create(&self, flags: EventFlags) -> NativeResult<SimFlags> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) {
            return Err(NativeError::CreateIsr);
        }
        if st.flags.iter().flatten().count() >= self.shared.config.max_flag_groups {
            return Err(NativeError::FlagGrpDepleted);
        }
        Ok(SimFlags(insert_free(&mut st.flags, Waitable::new(flags))))
    }

    fn flag_accept(&self, grp: SimFlags, mask: EventFlags, wait: FlagWait) -> NativeResult<EventFlags> {
        let st = self.shared.enter();
        let w = st
            .flags
            .get(grp.0)
            .and_then(Option::as_ref)
            .ok_or(NativeError::FlagInvalidPgrp)?;
        flags_ready(w.state, mask, wait).ok_or(NativeError::FlagNotRdy)
    }

    fn flag_pend(
        &self,
        grp: SimFlags,
        mask: EventFlags,
        wait: FlagWait,
        timeout: u16,
    ) -> NativeResult<EventFlags> {
        self.shared.pend(Obj::Flags(grp.0), timeout, |st| {
            let w = st.flags.get(grp.0)?.as_ref()?;
            flags_ready(w.state, mask, wait)
        })
    }

    fn flag_post(&self, grp: SimFlags, mask: EventFlags, op: FlagOp) -> NativeResult<EventFlags> {
        let mut st = self.shared.enter();
        let w = st
            .flags
            .get_mut(grp.0)
            .and_then(Option::as_mut)
            .ok_or(NativeError::FlagInvalidPgrp)?;
        match op {
            FlagOp::Set => w.state |= mask,
            FlagOp::Clear => w.state &= !mask,
        }
        let flags = w.state;
        drop(st);
        self.shared.notify();
        Ok(flags)
    }

    fn flag_del(&self, grp: SimFlags, opt: DelOpt) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) {
            return Err(NativeError::DelIsr);
        }
        let slot = st.flags.get_mut(grp.0).ok_or(NativeError::FlagInvalidPgrp)?;
        let w = slot.as_ref().ok_or(NativeError::EventType)?;
        if opt == DelOpt::NoPend && w.waiters > 0 {
            return Err(NativeError::TaskWaiting);
        }
        *slot = None;
        drop(st);
        self.shared.notify();
        Ok(())
    }

    // ============ Message queues ============

    fn q_create(&self, storage: &'static mut [QueueMsg]) -> Option<SimQueue> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) || st.live_events() >= self.shared.config.max_events {
            return None;
        }
        let ring = Ring { storage, head: 0, len: 0 };
        Some(SimQueue(insert_free(&mut st.queues, Waitable::new(ring))))
    }

    fn q_post(&self, q: SimQueue, msg: QueueMsg) -> NativeResult<()> {
        let mut st = self.shared.enter();
        let w = st
            .queues
            .get_mut(q.0)
            .and_then(Option::as_mut)
            .ok_or(NativeError::EventType)?;
        if !w.state.push(msg) {
            return Err(NativeError::QFull);
        }
        drop(st);
        self.shared.notify();
        Ok(())
    }

    fn q_accept(&self, q: SimQueue) -> NativeResult<QueueMsg> {
        let mut st = self.shared.enter();
        let w = st
            .queues
            .get_mut(q.0)
            .and_then(Option::as_mut)
            .ok_or(NativeError::EventType)?;
        w.state.pop().ok_or(NativeError::QEmpty)
    }

    fn q_pend(&self, q: SimQueue, timeout: u16) -> NativeResult<QueueMsg> {
        self.shared.pend(Obj::Queue(q.0), timeout, |st| {
            st.queues.get_mut(q.0)?.as_mut()?.state.pop()
        })
    }

    fn q_del(&self, q: SimQueue, opt: DelOpt) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if st.in_isr(Self::me()) {
            return Err(NativeError::DelIsr);
        }
        let slot = st.queues.get_mut(q.0).ok_or(NativeError::PeventNull)?;
        let w = slot.as_ref().ok_or(NativeError::EventType)?;
        if opt == DelOpt::NoPend && w.waiters > 0 {
            return Err(NativeError::TaskWaiting);
        }
        *slot = None;
        drop(st);
        self.shared.notify();
        Ok(())
    }

    // ============ Thread-local storage ============

    fn tls_get_id(&self) -> NativeResult<TlsId> {
        let mut st = self.shared.enter();
        if st.tls_next >= self.shared.config.tls_ids {
            return Err(NativeError::TlsNoMoreAvail);
        }
        let id = st.tls_next;
        st.tls_next += 1;
        Ok(id)
    }

    fn tls_set_destruct(&self, id: TlsId, hook: &'static dyn TlsTeardown) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if id >= st.tls_next {
            return Err(NativeError::TlsIdInvalid);
        }
        let slot = &mut st.tls_hooks[id as usize];
        if slot.is_some() {
            return Err(NativeError::TlsDestructAssigned);
        }
        *slot = Some(hook);
        Ok(())
    }

    fn tls_set_value(&self, id: TlsId, value: SlotValue) -> NativeResult<()> {
        let mut st = self.shared.enter();
        if !st.running {
            return Err(NativeError::OsNotRunning);
        }
        if id >= st.tls_next {
            return Err(NativeError::TlsIdInvalid);
        }
        let cur = self.shared.current(&mut st);
        if let Some(task) = st.tasks.get_mut(&cur) {
            task.tls[id as usize] = value;
        }
        Ok(())
    }

    fn tls_get_value(&self, id: TlsId) -> NativeResult<SlotValue> {
        let mut st = self.shared.enter();
        if !st.running {
            return Err(NativeError::OsNotRunning);
        }
        if id >= st.tls_next {
            return Err(NativeError::TlsIdInvalid);
        }
        let cur = self.shared.current(&mut st);
        Ok(st.tasks.get(&cur).map_or(0, |t| t.tls[id as usize]))
    }
}

/// Flags satisfying `wait` on `mask`, if any
fn flags_ready(flags: EventFlags, mask: EventFlags, wait: FlagWait) -> Option<EventFlags> {
    let ready = flags & mask;
    let satisfied = match wait {
        FlagWait::SetAll => ready == mask,
        FlagWait::SetAny => ready != 0,
    };
    satisfied.then_some(ready)
}
