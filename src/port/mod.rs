//! Port layer - the native kernel boundary
//!
//! [`NativeKernel`] mirrors the fixed μC/OS-II API the OSAL is built on:
//! priority-keyed tasks, counting semaphores, flag groups, message queues,
//! a per-task extension word, TLS ids with teardown hooks, the tick counter
//! and the scheduler lock. Blocking calls take native 16-bit timeouts where
//! 0 means "wait forever".

use core::fmt::Debug;

use crate::types::{EventFlags, QueueMsg, SlotValue};

#[cfg(any(test, feature = "sim"))]
pub mod sim;

/// Native pend timeout meaning "no bound"
pub const NATIVE_WAIT_FOREVER: u16 = 0;

/// Identity of a native task (its TCB address on target)
pub type TaskId = usize;

/// Native TLS index
pub type TlsId = u8;

/// Native task entry point
pub type TaskFn = fn(usize);

/// Native result type
pub type NativeResult<T> = Result<T, NativeError>;

/// Native kernel error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NativeError {
    EventType = 1,
    PendIsr = 2,
    PeventNull = 4,
    InvalidOpt = 7,
    Timeout = 10,
    PendLocked = 13,
    PendAbort = 14,
    DelIsr = 15,
    CreateIsr = 16,
    QFull = 30,
    QEmpty = 31,
    PrioExist = 40,
    Prio = 41,
    PrioInvalid = 42,
    SemOvf = 51,
    TaskCreateIsr = 60,
    TaskDel = 61,
    TaskDelIdle = 62,
    TaskDelIsr = 64,
    TaskNameTooLong = 65,
    TaskNoMoreTcb = 66,
    TaskNotExist = 67,
    TaskWaiting = 73,
    FlagInvalidPgrp = 110,
    FlagWaitType = 111,
    FlagNotRdy = 112,
    FlagGrpDepleted = 114,
    OsNotRunning = 150,
    TlsIdInvalid = 160,
    TlsNoMoreAvail = 161,
    TlsDestructAssigned = 162,
}

/// Deletion policy for native objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelOpt {
    /// Fail with [`NativeError::TaskWaiting`] if any task is pending
    NoPend,
    /// Delete and ready every pending task
    Always,
}

/// Flag group wait predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWait {
    SetAll,
    SetAny,
}

/// Flag group post operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Set,
    Clear,
}

/// Semaphore state as reported by the native query call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemData {
    pub count: u16,
    /// Whether any task is on the wait list
    pub waiting: bool,
}

/// Arguments for native task creation
pub struct TaskSpec {
    pub entry: TaskFn,
    pub arg: usize,
    pub prio: u8,
    pub stack: &'static mut [u8],
    /// Opaque word stored in the task control block
    pub ext: usize,
}

/// Receiver of per-slot TLS teardown callbacks
///
/// The kernel calls [`TlsTeardown::teardown`] for each TLS id that has a hook
/// installed when a task is deleted, passing that task's stored value.
pub trait TlsTeardown: Sync {
    fn teardown(&self, id: TlsId, value: SlotValue);
}

/// Fixed native kernel API
pub trait NativeKernel: Sync + 'static {
    /// Native semaphore reference
    type Sem: Copy + Eq + Debug + Send + Sync + 'static;
    /// Native flag group reference
    type Flags: Copy + Eq + Debug + Send + Sync + 'static;
    /// Native message queue reference
    type Queue: Copy + Eq + Debug + Send + Sync + 'static;

    // ============ Kernel state ============

    /// Kernel version, e.g. 29213 for 2.92.13
    fn version(&self) -> u16;
    fn is_running(&self) -> bool;
    /// Interrupt nesting as seen by the caller
    fn int_nesting(&self) -> u8;
    /// Scheduler lock nesting as seen by the caller
    fn sched_lock_nesting(&self) -> u8;
    fn sched_lock(&self);
    fn sched_unlock(&self);

    // ============ Time ============

    fn time_get(&self) -> u32;
    fn time_tick(&self);
    fn time_dly(&self, ticks: u16);

    // ============ Tasks ============

    fn task_create(&self, spec: TaskSpec) -> NativeResult<()>;
    fn task_del(&self, prio: u8) -> NativeResult<()>;
    fn task_change_prio(&self, old: u8, new: u8) -> NativeResult<()>;
    fn task_name_set(&self, prio: u8, name: &'static str) -> NativeResult<()>;
    fn task_cur(&self) -> TaskId;
    /// Extension word of the calling task, 0 if none was attached
    fn task_cur_ext(&self) -> usize;

    // ============ Semaphores ============

    /// Returns `None` if the kernel is out of event control blocks
    fn sem_create(&self, count: u16) -> Option<Self::Sem>;
    /// Returns the count before the decrement, 0 if unavailable
    fn sem_accept(&self, sem: Self::Sem) -> u16;
    fn sem_pend(&self, sem: Self::Sem, timeout: u16) -> NativeResult<()>;
    fn sem_post(&self, sem: Self::Sem) -> NativeResult<()>;
    fn sem_del(&self, sem: Self::Sem, opt: DelOpt) -> NativeResult<()>;
    fn sem_query(&self, sem: Self::Sem) -> NativeResult<SemData>;

    // ============ Flag groups ============

    fn flag_create(&self, flags: EventFlags) -> NativeResult<Self::Flags>;
    /// Returns the flags that satisfied the wait
    fn flag_accept(&self, grp: Self::Flags, mask: EventFlags, wait: FlagWait) -> NativeResult<EventFlags>;
    fn flag_pend(
        &self,
        grp: Self::Flags,
        mask: EventFlags,
        wait: FlagWait,
        timeout: u16,
    ) -> NativeResult<EventFlags>;
    /// Returns the flag word after the update
    fn flag_post(&self, grp: Self::Flags, mask: EventFlags, op: FlagOp) -> NativeResult<EventFlags>;
    fn flag_del(&self, grp: Self::Flags, opt: DelOpt) -> NativeResult<()>;

    // ============ Message queues ============

    /// Returns `None` if the kernel is out of queue control blocks
    fn q_create(&self, storage: &'static mut [QueueMsg]) -> Option<Self::Queue>;
    fn q_post(&self, q: Self::Queue, msg: QueueMsg) -> NativeResult<()>;
    fn q_accept(&self, q: Self::Queue) -> NativeResult<QueueMsg>;
    fn q_pend(&self, q: Self::Queue, timeout: u16) -> NativeResult<QueueMsg>;
    fn q_del(&self, q: Self::Queue, opt: DelOpt) -> NativeResult<()>;

    // ============ Thread-local storage ============

    fn tls_get_id(&self) -> NativeResult<TlsId>;
    fn tls_set_destruct(&self, id: TlsId, hook: &'static dyn TlsTeardown) -> NativeResult<()>;
    /// Store a value for the calling task
    fn tls_set_value(&self, id: TlsId, value: SlotValue) -> NativeResult<()>;
    /// Load the calling task's value
    fn tls_get_value(&self, id: TlsId) -> NativeResult<SlotValue>;
}
