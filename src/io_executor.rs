//! Minimal thread-backed I/O executor.
//!
//! A full reactor (epoll/kqueue/IOCP) is out of scope; this collaborator
//! only needs to satisfy the generic contract the runtime depends on:
//! accept a blocking unit of I/O work, run it off the CPU executors, and
//! deliver its outcome as an `AsyncResult` transition. Because a submitting
//! coroutine's `pin` already carries its originating processor id, the
//! generic `AsyncResult`/`awaiter` machinery routes the wakeup back to the
//! right processor without this module needing to know about processors at
//! all — grounded on keeping blocking work off the coroutine-driving
//! threads the same way the teacher's `deque`-based processors never run a
//! task longer than one coroutine slice.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use log::{trace, warn};

use crate::result::AsyncResult;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small pool of OS threads dedicated to blocking I/O work.
pub struct IoExecutor {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl IoExecutor {
    pub fn start(thread_count: usize) -> IoExecutor {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));

        let workers = (0..thread_count)
            .map(|id| {
                let receiver = std::sync::Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("io-executor-{id}"))
                    .spawn(move || loop {
                        let job = {
                            let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
                            receiver.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn io-executor thread")
            })
            .collect();

        trace!("io executor: started {thread_count} thread(s)");
        IoExecutor { sender, workers }
    }

    /// Runs `f` on an I/O thread and completes the returned `AsyncResult`
    /// with its outcome. A panic inside `f` fails the result with
    /// `RuntimeError::Internal` instead of poisoning the worker thread.
    pub fn submit<T, F>(&self, f: F) -> AsyncResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let result = AsyncResult::pending();
        let result_for_job = result.clone();

        let job: Job = Box::new(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
            match outcome {
                Ok(value) => {
                    let _ = result_for_job.complete(value);
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "io task panicked".to_string());
                    let _ = result_for_job.fail(crate::error::RuntimeError::Internal(message));
                }
            }
        });

        if self.sender.send(job).is_err() {
            warn!("io executor: submission after shutdown, failing immediately");
            let _ = result.fail(crate::error::RuntimeError::NotInitialized);
        }

        result
    }

    pub fn shutdown(mut self) {
        drop(self.sender);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn submitted_closure_completes_the_result() {
        let io = IoExecutor::start(1);
        let result = io.submit(|| 7);
        assert_eq!(result.get().unwrap(), 7);
        io.shutdown();
    }

    #[test]
    fn panicking_closure_fails_the_result_instead_of_propagating() {
        let io = IoExecutor::start(1);
        let result: AsyncResult<()> = io.submit(|| panic!("boom"));
        assert!(matches!(
            result.get(),
            Err(crate::error::RuntimeError::Internal(_))
        ));
        io.shutdown();
    }
}
