//! Shared helpers for host tests against the simulation kernel

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::OsalConfig;
use crate::kernel::Osal;
use crate::port::sim::SimKernel;
use crate::thread::ThreadAttr;
use crate::types::{OsalPriority, ThreadHandle};

#[repr(C, align(8))]
struct Stack([u8; 1024]);

/// A leaked, aligned thread stack
pub fn stack() -> &'static mut [u8] {
    &mut Box::leak(Box::new(Stack([0; 1024]))).0
}

/// An OSAL over a fresh simulation kernel that has not been started
pub fn sim_osal(config: OsalConfig) -> &'static Osal<SimKernel> {
    let osal = Osal::new(SimKernel::new(), config).expect("osal init");
    Box::leak(Box::new(osal))
}

/// An OSAL over a started simulation kernel
pub fn booted() -> &'static Osal<SimKernel> {
    let osal = sim_osal(OsalConfig::new().with_tick_period_us(1000));
    osal.kernel().start();
    osal
}

type Job = Box<dyn FnOnce() + Send + 'static>;

fn trampoline(arg: usize) {
    // SAFETY: `arg` comes from `Box::into_raw` in `spawn_thread`
    let job = unsafe { Box::from_raw(arg as *mut Job) };
    job();
}

/// Attributes running `job` at portable priority `prio`
pub fn attr_for(name: &'static str, prio: OsalPriority, job: impl FnOnce() + Send + 'static) -> ThreadAttr {
    let job: Job = Box::new(job);
    ThreadAttr {
        name,
        entry: Some(trampoline),
        arg: Box::into_raw(Box::new(job)) as usize,
        priority: prio,
        stack: stack(),
    }
}

/// Create an OSAL thread running `job`
pub fn spawn_thread(
    osal: &'static Osal<SimKernel>,
    prio: OsalPriority,
    job: impl FnOnce() + Send + 'static,
) -> ThreadHandle {
    osal.thread_create(attr_for("worker", prio, job)).expect("thread create")
}

/// Spin until `cond` holds or a generous deadline passes
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// One-shot flag shared between a test and its threads
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Flag(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
