// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Processing unit of a thread.
//!
//! Keeps the teacher's shape: a thread-local current-processor lookup, a
//! `ProcessorHandle` wrapper that forces a fresh lookup after every suspend
//! point, and a `park_with` bridge for handing a parked coroutine to an
//! external callback. The owner-push/pop queue and cross-thread delivery now
//! go through [`crate::queue`] and [`crate::scheduler`] instead of the
//! teacher's `deque` crate plus per-processor channel gossip (see
//! DESIGN.md); `park_with`'s data carrier is a thin `Box<Box<dyn FnOnce>>`
//! rather than the teacher's raw function-pointer trick, since a boxed trait
//! object can be called directly in current Rust.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread::{self, Builder};
use std::time::Duration;

use log::trace;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::coroutine::{Coroutine, Handle, State};
use crate::options::Options;
use crate::queue::WorkStealQueue;
use crate::scheduler::Scheduler;
use crate::task::{ExecutorState, Task};

thread_local!(static PROCESSOR: UnsafeCell<Option<Processor>> = UnsafeCell::new(None));

/// How long an idle processor blocks before re-checking for shutdown. Chosen
/// to bound worst-case shutdown latency without busy-spinning; real wakeups
/// (`Parker::unpark`) always arrive sooner than this.
const PARK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Join handle plus bookkeeping returned to the owning executor.
pub struct Machine {
    pub thread_handle: thread::JoinHandle<()>,
    pub id: usize,
}

/// Control handle for the processor running on the current OS thread.
///
/// This wrapper exists for the same reason the teacher's does: `park_with`
/// may suspend the current coroutine and hand it off to be resumed by a
/// *different* processor later. Code must reacquire `Processor::current()`
/// after any suspend point rather than holding a handle across one.
pub struct ProcessorHandle(&'static mut Processor);

impl ProcessorHandle {
    #[inline]
    pub fn id(&self) -> usize {
        self.0.id()
    }

    #[inline]
    pub fn sched(self) {
        self.0.sched()
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.0.scheduler()
    }

    pub fn spawn_opts<F>(&mut self, f: F, opts: Options)
    where
        F: FnOnce() + Send + 'static,
    {
        let coro = Coroutine::spawn_opts(f, opts);
        self.spawn_handle(coro);
    }

    /// Pins `coro` to this processor and enqueues it locally. Used by
    /// `crate::rt`'s coroutine-spawning entry point, which needs to set
    /// `on_panic` on the `Handle` before it is ever run.
    pub fn spawn_handle(&mut self, mut coro: Handle) {
        coro.pin = ExecutorState {
            processor_hint: Some(self.0.id()),
            ..ExecutorState::default()
        };
        self.0.ready_local(coro);
    }

    /// Suspends the coroutine currently running on this processor (marking
    /// it `Parked`) and hands it, along with a fresh `&mut Processor`, to
    /// `f` once control returns here.
    ///
    /// # Safety contract
    /// `f` must not call back into `Processor`/`Scheduler` methods that
    /// themselves suspend, and must not drop the coroutine handle silently —
    /// either resume it or re-post it via `Processor::ready_local`/
    /// `Scheduler::post`.
    pub fn park_with<F>(self, f: F)
    where
        F: FnOnce(&mut Processor, Handle) + Send + 'static,
    {
        self.0.park_with(f)
    }
}

impl Eq for ProcessorHandle {}
impl PartialEq for ProcessorHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.inner.as_ref(), other.0.inner.as_ref())
    }
}

/// Processing unit of a thread.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<ProcessorInner>,
}

unsafe impl Send for Processor {}
unsafe impl Sync for ProcessorInner {}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Processor(#{})", self.id())
    }
}

pub struct ProcessorInner {
    id: usize,
    /// Logical CPU this processor's OS thread pins itself to at startup, if
    /// the executor was given one (`Executor::start` leaves this `None`;
    /// `Runtime::new` always supplies one from `topology::enumerate_nodes`).
    cpu_id: Option<usize>,
    weak_self: UnsafeCell<WeakProcessor>,
    scheduler: Arc<Scheduler>,

    // Only ever touched from this processor's own `resume_coroutine`/
    // `park_with`; never observed concurrently.
    current_coro: UnsafeCell<Option<Handle>>,

    rng: UnsafeCell<SmallRng>,
    local: WorkStealQueue<Task>,
}

impl Processor {
    /// Constructs a processor bound to `scheduler`, without spawning its OS
    /// thread yet. Returns the `Stealer` half of its queue so the executor
    /// can register it in the scheduler's processor table *before* any
    /// thread starts running — otherwise an early steal attempt against a
    /// not-yet-registered processor would have nothing to find.
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        processor_id: usize,
        cpu_id: Option<usize>,
    ) -> (Processor, crossbeam_deque::Stealer<Task>) {
        let local = WorkStealQueue::new();
        let stealer = local.stealer();

        let p = Processor {
            inner: Arc::new(ProcessorInner {
                id: processor_id,
                cpu_id,
                weak_self: UnsafeCell::new(WeakProcessor { inner: Weak::new() }),
                scheduler,
                current_coro: UnsafeCell::new(None),
                rng: UnsafeCell::new(SmallRng::from_entropy()),
                local,
            }),
        };

        let weak_self = WeakProcessor {
            inner: Arc::downgrade(&p.inner),
        };
        // SAFETY: `p` is not yet shared with any other thread.
        unsafe {
            *p.weak_self.get() = weak_self;
        }

        (p, stealer)
    }

    /// Spawns the OS thread that runs this processor's `schedule()` loop.
    pub(crate) fn start(self) -> Machine {
        let id = self.id;
        let cpu_id = self.cpu_id;
        let thread_handle = Builder::new()
            .name(format!("processor-{id}"))
            .spawn(move || {
                if let Some(cpu_id) = cpu_id {
                    bind_current_thread_to_cpu(cpu_id);
                }
                PROCESSOR.with(|cell| unsafe {
                    *cell.get() = Some(self.clone());
                });
                let mut p = self;
                p.schedule();
            })
            .expect("failed to spawn processor thread");

        Machine { thread_handle, id }
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The processor running on the current OS thread, if any.
    pub fn current() -> Option<ProcessorHandle> {
        PROCESSOR.with(|cell| unsafe { (*cell.get()).as_mut().map(ProcessorHandle) })
    }

    #[inline]
    pub fn weak_self(&self) -> WeakProcessor {
        unsafe { (*self.weak_self.get()).clone() }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    fn current_coro(&self) -> &mut Option<Handle> {
        unsafe { &mut *self.current_coro.get() }
    }

    fn rng(&self) -> &mut SmallRng {
        unsafe { &mut *self.rng.get() }
    }

    /// Main loop: local queue, then this processor's own inbox, then a
    /// random busiest-peer steal, then park. Mirrors the teacher's
    /// `schedule()` except routing through the scheduler instead of raw
    /// channel messages.
    fn schedule(&mut self) {
        trace!("{:?}: starts", self);

        loop {
            if self.scheduler.is_shutdown() {
                break;
            }

            if let Some(task) = self.local.pop() {
                self.run_task(task);
                continue;
            }

            if let Some(task) = self.scheduler.drain_inbox_for(self.id, &self.local) {
                self.run_task(task);
                continue;
            }

            // A small random jitter before stealing avoids a thundering herd
            // of idle processors all targeting the same busiest peer.
            let _ = self.rng().gen::<u8>();
            if let Some(task) = self.scheduler.steal_for(self.id) {
                trace!("{:?}: stole a task", self);
                self.run_task(task);
                continue;
            }

            if let Some(parker) = self.scheduler.parker_for(self.id) {
                parker.park_timeout(PARK_POLL_INTERVAL);
            } else {
                thread::sleep(PARK_POLL_INTERVAL);
            }
        }

        trace!("{:?}: shutting down, dropping {} queued task(s)", self, self.local.len());
        while self.local.pop().is_some() {}
    }

    fn run_task(&mut self, task: Task) {
        task.run();
    }

    /// Resumes `coro` on this processor, then routes it onward depending on
    /// how it yielded: re-posted if merely `Suspended`, handed to the
    /// registered `park_with` callback if `Parked`, dropped (after firing
    /// its panic callback) if `Finished`.
    pub(crate) fn resume_coroutine(&mut self, mut coro: Handle) {
        debug_assert!(!coro.is_finished(), "cannot resume a finished coroutine");
        trace!("{:?}: resuming `{}`", self, coro.debug_name());

        *self.current_coro() = Some(coro);
        let data = self.current_coro().as_mut().unwrap().resume(0);

        let mut coro = match self.current_coro().take() {
            Some(c) => c,
            None => return,
        };

        if coro.is_finished() {
            trace!("{:?}: `{}` finished", self, coro.debug_name());
            coro.fire_on_panic();
            return;
        }

        match coro.state() {
            State::Suspended => {
                trace!("{:?}: `{}` yielded", self, coro.debug_name());
                self.ready(coro);
            }
            State::Parked => {
                if data != 0 {
                    let carrier = unsafe {
                        Box::from_raw(data as *mut Box<dyn FnOnce(&mut Processor, Handle) + Send>)
                    };
                    let f = *carrier;
                    f(self, coro);
                }
            }
            s => panic!("coroutine yielded with invalid state {s:?}"),
        }
    }

    /// Pushes `coro` onto this processor's own local queue, bypassing the
    /// scheduler (used for same-thread handoffs: spawning a child coroutine,
    /// or re-posting a merely-`Suspended` one).
    pub(crate) fn ready(&mut self, coro: Handle) {
        self.ready_local(coro);
    }

    fn ready_local(&mut self, coro: Handle) {
        let task = drive_task(coro);
        if task.executor_state().processor_hint == Some(self.id) {
            self.local.push(task);
        } else {
            self.scheduler.post(task);
        }
    }

    fn park_with<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Processor, Handle) + Send + 'static,
    {
        let boxed: Box<dyn FnOnce(&mut Processor, Handle) + Send> = Box::new(f);
        let carrier: Box<Box<dyn FnOnce(&mut Processor, Handle) + Send>> = Box::new(boxed);
        let data = Box::into_raw(carrier) as usize;

        if let Some(coro) = self.current_coro() {
            trace!("{:?}: `{}` parking", self, coro.debug_name());
            coro.yield_with(State::Parked, data);
        }
    }

    /// Suspends the current running coroutine, equivalent to a plain yield.
    pub fn sched(&mut self) {
        self.yield_with(State::Suspended)
    }

    fn yield_with(&mut self, r: State) {
        if let Some(coro) = self.current_coro() {
            coro.yield_with(r, 0);
        }
    }
}

impl Deref for Processor {
    type Target = ProcessorInner;
    #[inline]
    fn deref(&self) -> &ProcessorInner {
        self.inner.deref()
    }
}

impl DerefMut for Processor {
    #[inline]
    fn deref_mut(&mut self) -> &mut ProcessorInner {
        // SAFETY: a `Processor` only ever mutates its own inner state from
        // the single OS thread it runs on; `Arc` is used here purely so
        // `WeakProcessor` can observe liveness, never for cross-thread
        // mutable aliasing.
        unsafe { &mut *(self.inner.deref() as *const ProcessorInner as *mut ProcessorInner) }
    }
}

impl Eq for Processor {}
impl PartialEq for Processor {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner.as_ref(), other.inner.as_ref())
    }
}

/// Pins the calling OS thread to `cpu_id`, best-effort. A failure here is
/// not fatal to the processor — it still runs, just without the NUMA
/// locality a bound thread would get — so errors are logged and swallowed
/// rather than propagated.
#[cfg(target_os = "linux")]
fn bind_current_thread_to_cpu(cpu_id: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu_id, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            log::warn!("processor: failed to bind to cpu {cpu_id} (errno {})", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn bind_current_thread_to_cpu(_cpu_id: usize) {}

/// Builds the self-contained task that resumes `coro` wherever it lands.
/// Shared by `Processor::ready_local` (same-thread repost of a merely
/// suspended coroutine) and `crate::awaiter` (cross-thread repost once an
/// awaited result completes).
pub(crate) fn drive_task(coro: Handle) -> Task {
    let state = coro.pin.clone();
    Task::new(move || {
        let mut handler = Processor::current().expect("drive task ran outside a processor");
        handler.0.resume_coroutine(coro);
    })
    .with_executor_state(state)
}

/// Non-owning reference to a `Processor`, handed to a coroutine so it can
/// remember "which processor last ran me" without keeping it alive.
#[derive(Clone)]
pub struct WeakProcessor {
    inner: Weak<ProcessorInner>,
}

impl WeakProcessor {
    pub fn upgrade(&self) -> Option<Processor> {
        self.inner.upgrade().map(|p| Processor { inner: p })
    }
}

#[cfg(test)]
mod test {
    // `Processor::spawn` requires a live `Scheduler`/`Executor`; the
    // run-loop and `park_with` bridge are exercised end-to-end by
    // `tests/runtime.rs` instead of in isolation here.
}
