//! `AsyncResult<T>` — a one-shot future with registered continuations.
//!
//! Named `AsyncResult` rather than `Result` to avoid colliding with
//! `std::result::Result`, which this crate's own fallible APIs return (see
//! [`crate::error`]).

use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::RuntimeError;

/// The three states an `AsyncResult` can occupy. Transitions are monotonic:
/// `Pending -> Ready` or `Pending -> Failed`, never back.
pub enum AsyncState<T> {
    Pending,
    Ready(T),
    Failed(RuntimeError),
}

impl<T> AsyncState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, AsyncState::Pending)
    }
}

type Continuation<T> = Box<dyn FnOnce(&AsyncState<T>) + Send>;

struct Inner<T> {
    state: Mutex<AsyncState<T>>,
    condvar: Condvar,
    continuations: Mutex<Vec<Continuation<T>>>,
}

impl<T> Drop for Inner<T> {
    /// If every `AsyncResult` handle (the producing task included) is
    /// dropped while still pending — e.g. the processor driving it was torn
    /// down during `Runtime::terminate` — wake any waiter with `Cancelled`
    /// rather than leaving it blocked forever.
    fn drop(&mut self) {
        // Lock order matches `then`'s (continuations, then state) to avoid
        // deadlocking against a concurrent `then` call.
        let mut continuations = self.continuations.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.is_pending() {
            *state = AsyncState::Failed(RuntimeError::Cancelled);
            let fired = mem::take(&mut *continuations);
            drop(continuations);
            // Continuations fire while `state` is still held, so a thread
            // woken by `notify_all` below never observes the new state ahead
            // of them.
            for cont in fired {
                cont(&state);
            }
            drop(state);
            self.condvar.notify_all();
        }
    }
}

/// A one-shot asynchronous value, shared by the producing task and every
/// awaiter. The last holder to drop its handle destroys the shared state.
pub struct AsyncResult<T>(Arc<Inner<T>>);

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pending = self
            .0
            .state
            .lock()
            .map(|s| s.is_pending())
            .unwrap_or(false);
        f.debug_struct("AsyncResult").field("pending", &pending).finish()
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    /// Creates a new, still-pending result.
    pub fn pending() -> Self {
        AsyncResult(Arc::new(Inner {
            state: Mutex::new(AsyncState::Pending),
            condvar: Condvar::new(),
            continuations: Mutex::new(Vec::new()),
        }))
    }

    /// An already-completed result, useful for values available synchronously
    /// at call time (e.g. `Await` on work that never actually suspends).
    pub fn ready(value: T) -> Self {
        let result = Self::pending();
        let _ = result.complete(value);
        result
    }

    /// Transitions `Pending -> Ready(value)`, then fires every continuation
    /// registered before this call, in registration order.
    ///
    /// Fails with `AlreadyCompleted` if the result was already terminal.
    pub fn complete(&self, value: T) -> Result<(), RuntimeError> {
        self.finish(AsyncState::Ready(value))
    }

    /// Transitions `Pending -> Failed(err)`.
    pub fn fail(&self, err: RuntimeError) -> Result<(), RuntimeError> {
        self.finish(AsyncState::Failed(err))
    }

    /// Sets the terminal state and fires every registered continuation
    /// before releasing the state lock, so a thread blocked in `wait`/`get`
    /// can never observe the new state ahead of a continuation registered
    /// before this call (see `get`'s doc comment above).
    fn finish(&self, new_state: AsyncState<T>) -> Result<(), RuntimeError> {
        // Lock order matches `then`'s (continuations, then state) to avoid
        // deadlocking against a concurrent `then` call.
        let mut continuations = self.0.continuations.lock()?;
        let mut state = self.0.state.lock()?;
        if !state.is_pending() {
            return Err(RuntimeError::AlreadyCompleted);
        }
        *state = new_state;
        let fired = mem::take(&mut *continuations);
        drop(continuations);
        for cont in fired {
            cont(&state);
        }
        drop(state);
        self.0.condvar.notify_all();
        Ok(())
    }

    /// Registers a continuation to run when this result completes.
    ///
    /// Returns `true` if the result was still pending at the time of the
    /// call (the callback will fire later, from whichever thread calls
    /// `complete`/`fail`). Returns `false` if the result was already
    /// terminal, in which case the callback has already been invoked
    /// synchronously and the caller must not suspend.
    pub fn then<F>(&self, cont: F) -> bool
    where
        F: FnOnce(&AsyncState<T>) + Send + 'static,
    {
        let mut continuations = match self.0.continuations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.is_pending() {
            continuations.push(Box::new(cont));
            true
        } else {
            drop(continuations);
            cont(&state);
            false
        }
    }

    /// Blocks the calling OS thread until the result is terminal.
    pub fn wait(&self) {
        let mut state = match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while state.is_pending() {
            state = match self.0.condvar.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Blocks until terminal, then returns the value or error.
    ///
    /// A thread that observes `Ready` through `get` happens-after every
    /// `then` continuation registered before `complete`/`fail` was called.
    pub fn get(&self) -> Result<T, RuntimeError> {
        self.wait();
        let state = match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &*state {
            AsyncState::Ready(value) => Ok(value.clone()),
            AsyncState::Failed(err) => Err(err.clone()),
            AsyncState::Pending => unreachable!("wait() only returns once terminal"),
        }
    }

    /// `true` once `complete`/`fail` has run.
    pub fn is_terminal(&self) -> bool {
        !self
            .0
            .state
            .lock()
            .map(|s| s.is_pending())
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn then_on_pending_fires_once_in_order() {
        let result = AsyncResult::<i32>::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            assert!(result.then(move |_| order.lock().unwrap().push(i)));
        }

        result.complete(42).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(result.get().unwrap(), 42);
    }

    #[test]
    fn then_on_terminal_runs_immediately_and_does_not_suspend() {
        let result = AsyncResult::<i32>::ready(7);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);

        let still_pending = result.then(move |state| {
            if let AsyncState::Ready(v) = state {
                fired2.fetch_add(*v as usize, Ordering::SeqCst);
            }
        });

        assert!(!still_pending);
        assert_eq!(fired.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn double_complete_fails() {
        let result = AsyncResult::<i32>::pending();
        result.complete(1).unwrap();
        assert!(matches!(result.complete(2), Err(RuntimeError::AlreadyCompleted)));
    }

    #[test]
    fn wait_blocks_until_background_completion() {
        let result = AsyncResult::<i32>::pending();
        let bg = result.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            bg.complete(99).unwrap();
        });

        assert_eq!(result.get().unwrap(), 99);
    }

    #[test]
    fn dropping_last_handle_while_pending_cancels_waiters() {
        let result = AsyncResult::<i32>::pending();
        let clone = result.clone();
        drop(result);
        assert!(matches!(clone.get(), Err(RuntimeError::Cancelled)));
    }

    #[test]
    fn fail_surfaces_through_get() {
        let result = AsyncResult::<i32>::pending();
        result.fail(RuntimeError::Cancelled).unwrap();
        assert!(matches!(result.get(), Err(RuntimeError::Cancelled)));
    }
}
