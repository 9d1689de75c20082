//! Scheduler: accepts posted tasks, routes them to processors, and drives
//! the delayed-task priority queue.
//!
//! Each [`crate::runtime::executor::Executor`] owns exactly one `Scheduler`.
//! A processor's work-stealing queue (`crossbeam_deque::Worker`) is
//! intentionally `!Sync` — only its owner may push or pop it. To target a
//! *specific* processor from any thread (needed for entity-tag/processor-hint
//! locality and for resuming a pinned coroutine), this rewrite gives every
//! processor a dedicated `Injector` inbox alongside its private `Worker`: a
//! processor drains its own inbox into its local queue as the first step of
//! its run loop, which preserves single-owner push semantics on the hot local
//! path while still allowing cross-thread targeted delivery. This is the
//! detail the spec's "push onto that processor's WSQ; if push fails, push
//! onto the overflow run-queue" leaves to the implementation (§4.2, §4.4).

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_deque::{Injector, Stealer};
use log::trace;
use slab::Slab;

use crate::coroutine::Handle;
use crate::queue::{steal_from_injector, steal_one, WorkStealQueue};
use crate::task::{DelayedTask, Task};

/// Lets a processor block until the scheduler has more work for it, and lets
/// the scheduler (or a peer) wake it back up.
#[derive(Default)]
pub(crate) struct Parker {
    woken: Mutex<bool>,
    cv: Condvar,
}

impl Parker {
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        let mut woken = self.woken.lock().unwrap();
        if *woken {
            *woken = false;
            return;
        }
        let (guard, _) = self.cv.wait_timeout(woken, timeout).unwrap();
        woken = guard;
        *woken = false;
    }

    pub(crate) fn unpark(&self) {
        let mut woken = self.woken.lock().unwrap();
        *woken = true;
        self.cv.notify_one();
    }
}

/// What the scheduler knows about one of its processors, from the outside.
pub(crate) struct ProcessorLink {
    pub(crate) id: usize,
    pub(crate) inbox: Arc<Injector<Task>>,
    pub(crate) stealer: Stealer<Task>,
    pub(crate) parker: Arc<Parker>,
}

pub struct Scheduler {
    // Written once by `Executor::new` before any processor thread starts,
    // then only ever read concurrently; `RwLock` over a plain `Vec` keeps
    // that one-time setup from needing unsafe or an `Arc::get_mut` dance
    // against the helper thread's own clone of this `Arc`.
    processors: RwLock<Vec<ProcessorLink>>,
    overflow: Injector<Task>,
    delayed: Mutex<BinaryHeap<DelayedTask>>,
    delayed_cv: Condvar,
    notify_inc: AtomicUsize,
    shutdown: AtomicBool,
    helper_thread: Mutex<Option<JoinHandle<()>>>,
    /// Coroutines parked on an `AsyncResult` they don't yet have an answer
    /// for. Owned here, not by the `AsyncResult` itself: `awaiter::await_result`
    /// registers a continuation that only captures this slab key, so a
    /// coroutine awaiting a result never keeps that same result's `Inner`
    /// alive through the coroutine's own suspended stack — see DESIGN.md's
    /// note on breaking that cycle. Also gives `shutdown` a place to reach in
    /// and cancel every still-parked coroutine directly, rather than relying
    /// on reference counting to ever reach zero for a result nobody else
    /// drops.
    parked: Mutex<Slab<Handle>>,
}

impl Scheduler {
    /// Constructs a scheduler with no processors yet; `set_processors` wires
    /// them up once they have been spawned (an executor needs a live
    /// `&Scheduler` to hand to each processor before any processor exists).
    pub(crate) fn new() -> Arc<Scheduler> {
        let scheduler = Arc::new(Scheduler {
            processors: RwLock::new(Vec::new()),
            overflow: Injector::new(),
            delayed: Mutex::new(BinaryHeap::new()),
            delayed_cv: Condvar::new(),
            notify_inc: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            helper_thread: Mutex::new(None),
            parked: Mutex::new(Slab::new()),
        });
        scheduler.spawn_helper_thread();
        scheduler
    }

    pub(crate) fn set_processors(&self, processors: Vec<ProcessorLink>) {
        *self.processors.write().unwrap() = processors;
    }

    fn spawn_helper_thread(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("scheduler-delayed".into())
            .spawn(move || scheduler.delayed_task_loop())
            .expect("failed to spawn scheduler helper thread");
        *self.helper_thread.lock().unwrap() = Some(handle);
    }

    /// Accepts a task: routes it immediately, or holds it in the delayed
    /// queue until its deadline.
    pub fn post(&self, task: Task) {
        if task.is_delayed() {
            let mut heap = self.delayed.lock().unwrap();
            heap.push(DelayedTask::new(task));
            drop(heap);
            self.delayed_cv.notify_one();
            return;
        }
        self.post_now(task);
    }

    fn post_now(&self, task: Task) {
        let processors = self.processors.read().unwrap();
        if processors.is_empty() {
            self.overflow.push(task);
            return;
        }

        let state = task.executor_state().clone();
        let index = if let Some(hint) = state.processor_hint {
            hint % processors.len()
        } else if let Some(tag) = state.entity_tag {
            (tag as usize) % processors.len()
        } else {
            // TODO: bias this toward processors serving a higher-weight work
            // group once `rt::work_group_share` feeds into placement, instead
            // of treating every unhinted task as equally weighted.
            self.notify_inc.fetch_add(1, Ordering::Relaxed) % processors.len()
        };

        let link = &processors[index];
        link.inbox.push(task);
        link.parker.unpark();
    }

    /// Returns one task stolen from the busiest peer (by queue length, ties
    /// broken by lowest id), skipping `requesting_id` itself.
    pub(crate) fn steal_for(&self, requesting_id: usize) -> Option<Task> {
        let processors = self.processors.read().unwrap();
        let busiest = processors
            .iter()
            .filter(|link| link.id != requesting_id)
            .max_by(|a, b| {
                a.stealer
                    .len()
                    .cmp(&b.stealer.len())
                    .then_with(|| b.id.cmp(&a.id))
            })?;

        if busiest.stealer.len() == 0 {
            return None;
        }
        steal_one(&busiest.stealer)
    }

    /// Drains this processor's own inbox (and, failing that, the shared
    /// overflow queue) into its local worker, returning one task if any
    /// arrived.
    pub(crate) fn drain_inbox_for(
        &self,
        processor_id: usize,
        local: &WorkStealQueue<Task>,
    ) -> Option<Task> {
        let processors = self.processors.read().unwrap();
        let link = processors.iter().find(|l| l.id == processor_id)?;
        steal_from_injector(&link.inbox, local_worker(local))
            .or_else(|| steal_from_injector(&self.overflow, local_worker(local)))
    }

    pub(crate) fn parker_for(&self, processor_id: usize) -> Option<Arc<Parker>> {
        self.processors
            .read()
            .unwrap()
            .iter()
            .find(|l| l.id == processor_id)
            .map(|l| Arc::clone(&l.parker))
    }

    /// Parks `coro`, returning the key `take_parked` later needs to get it
    /// back out.
    pub(crate) fn park(&self, coro: Handle) -> usize {
        self.parked.lock().unwrap().insert(coro)
    }

    /// Removes and returns the coroutine at `key`, if it is still parked.
    /// Returns `None` if `cancel_all_parked` already swept it out from under
    /// a racing completion.
    pub(crate) fn take_parked(&self, key: usize) -> Option<Handle> {
        let mut parked = self.parked.lock().unwrap();
        if parked.contains(key) {
            Some(parked.remove(key))
        } else {
            None
        }
    }

    /// Drains every still-parked coroutine and fires its cancel hook, which
    /// fails whatever `AsyncResult` it was awaiting with `Cancelled`. The
    /// drain happens with the lock released before any hook runs: a hook's
    /// `fail` call synchronously fires the result's own continuations,
    /// including the wake continuation that calls back into `take_parked` —
    /// holding the lock across that would deadlock.
    pub(crate) fn cancel_all_parked(&self) {
        let drained: Vec<Handle> = {
            let mut parked = self.parked.lock().unwrap();
            parked.drain().collect()
        };
        for mut coro in drained {
            coro.fire_on_cancel();
        }
    }

    pub(crate) fn wake_any(&self) {
        if let Some(link) = self.processors.read().unwrap().first() {
            link.parker.unpark();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the delayed-task helper thread and wakes every parked
    /// processor so executor shutdown can join them.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.delayed_cv.notify_all();
        for link in self.processors.read().unwrap().iter() {
            link.parker.unpark();
        }
        if let Some(handle) = self.helper_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.cancel_all_parked();
    }

    fn delayed_task_loop(&self) {
        let mut heap = self.delayed.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            match heap.peek() {
                None => {
                    heap = self.delayed_cv.wait(heap).unwrap();
                }
                Some(next) => {
                    let now = Instant::now();
                    if next.deadline <= now {
                        let due = heap.pop().unwrap();
                        drop(heap);
                        trace!("scheduler: delayed task became due");
                        self.post_now(due.task);
                        heap = self.delayed.lock().unwrap();
                    } else {
                        let wait_for = next.deadline - now;
                        let (guard, _) = self.delayed_cv.wait_timeout(heap, wait_for).unwrap();
                        heap = guard;
                    }
                }
            }
        }
    }
}

/// `crossbeam_deque::Injector::steal_batch_and_pop` wants a `&Worker<T>`; our
/// own wrapper hides the `Worker` behind `WorkStealQueue`, so this exposes it
/// back out for the one caller (the scheduler draining a processor's inbox)
/// that legitimately needs it.
fn local_worker<T>(queue: &WorkStealQueue<T>) -> &crossbeam_deque::Worker<T> {
    queue.as_worker()
}
