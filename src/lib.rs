//! A NUMA-aware, work-stealing coroutine scheduler.
//!
//! Work comes in two shapes: a [`task::Task`] is a plain one-shot callable;
//! a coroutine (spawned through [`rt::spawn`]) is a stackful cooperative
//! routine that can suspend mid-body on a [`result::AsyncResult`] without
//! blocking the processor thread running it ([`awaiter::await_result`]).
//! Both are routed by a [`scheduler::Scheduler`] onto a pool of
//! [`runtime::processor::Processor`] threads, one [`runtime::executor::Executor`]
//! per NUMA node, all owned by the process-wide [`rt`] singleton. Producers
//! and suspended consumers meet through [`channel::Channel`] (broadcast to
//! every watcher) or [`sync::mpsc`] (point-to-point).
//!
//! ```no_run
//! use async_rt::{options::RuntimeOptions, rt};
//!
//! rt::setup(RuntimeOptions::new()).unwrap();
//! let result = rt::spawn(|| 1 + 1);
//! assert_eq!(result.get().unwrap(), 2);
//! rt::terminate();
//! ```

pub mod awaiter;
pub mod channel;
pub mod coroutine;
pub mod error;
pub mod io_executor;
pub mod metrics;
pub mod options;
pub mod profiler;
pub mod queue;
pub mod result;
pub mod rt;
pub mod runtime;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod topology;

/// The commonly needed names, re-exported for `use async_rt::prelude::*;`.
pub mod prelude {
    pub use crate::awaiter::await_result;
    pub use crate::channel::{Channel, Watcher};
    pub use crate::error::{Result, RuntimeError};
    pub use crate::options::{Options, Priority, RuntimeOptions, WorkGroupOption};
    pub use crate::result::AsyncResult;
    pub use crate::rt::{self, spawn};
    pub use crate::task::{EntityTag, ExecutorState, Task};
}
