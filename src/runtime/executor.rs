//! Executor: a named scheduler instance plus the processors it drives.
//!
//! Grounded on the teacher's `Scheduler::new().with_workers(n).run(...)`
//! entry point (`examples/kingxsp-coio-rs/examples/ring.rs`), generalized so
//! a `Runtime` can own several of these — one per NUMA node — instead of a
//! single process-wide instance.

use std::sync::Arc;

use crossbeam_deque::Injector;
use log::info;

use crate::runtime::processor::{Machine, Processor};
use crate::scheduler::{Parker, ProcessorLink, Scheduler};
use crate::task::Task;

/// A running set of processor threads sharing one scheduler.
pub struct Executor {
    name: String,
    scheduler: Arc<Scheduler>,
    machines: Vec<Machine>,
}

impl Executor {
    /// Spawns `worker_count` processor threads under `name`, none bound to a
    /// particular CPU. Processors are linked into the scheduler's table
    /// before any of their threads start, so the very first steal attempt
    /// already sees every peer.
    pub fn start(name: impl Into<String>, worker_count: usize) -> Executor {
        Self::start_with_cpu_ids(name, worker_count, &[])
    }

    /// Like [`Executor::start`], but binds processor `i`'s OS thread to
    /// `cpu_ids[i]` (best-effort; see `Processor::new`). `cpu_ids` shorter
    /// than `worker_count` leaves the remaining processors unbound.
    pub fn start_with_cpu_ids(name: impl Into<String>, worker_count: usize, cpu_ids: &[usize]) -> Executor {
        let name = name.into();
        let scheduler = Scheduler::new();

        let mut processors = Vec::with_capacity(worker_count);
        let mut links = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let cpu_id = cpu_ids.get(id).copied();
            let (processor, stealer) = Processor::new(Arc::clone(&scheduler), id, cpu_id);
            let inbox = Arc::new(Injector::new());
            let parker = Arc::new(Parker::default());
            links.push(ProcessorLink {
                id,
                inbox,
                stealer,
                parker,
            });
            processors.push(processor);
        }

        scheduler.set_processors(links);

        let machines = processors.into_iter().map(Processor::start).collect();

        info!("executor `{name}`: started {worker_count} processor(s)");

        Executor { name, scheduler, machines }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.machines.len()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Routes a task to this executor's scheduler. Placement (explicit hint,
    /// entity tag, or round-robin fallback) is entirely `Scheduler::post_now`'s
    /// call — this is a thin pass-through.
    pub fn post(&self, task: Task) {
        self.scheduler.post(task);
    }

    /// Signals every processor to stop and joins their threads. Any task
    /// still queued when a processor observes shutdown is dropped; if that
    /// task was driving a coroutine, dropping its `AsyncResult` fails every
    /// waiter with `RuntimeError::Cancelled` (see `crate::result::Inner`'s
    /// `Drop` impl).
    pub fn shutdown(mut self) {
        info!("executor `{}`: shutting down", self.name);
        self.scheduler.shutdown();
        for machine in self.machines.drain(..) {
            let _ = machine.thread_handle.join();
        }
    }
}
