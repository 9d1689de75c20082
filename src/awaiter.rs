//! Bridges [`crate::result::AsyncResult`] and coroutine suspension.
//!
//! Grounded on the teacher's `sync::mpsc::Receiver::recv()`: block the OS
//! thread if there is no current processor, otherwise suspend-and-register.
//! The suspend side goes through `ProcessorHandle::park_with`, the same
//! bridge the teacher uses to hand a parked coroutine to an external
//! callback.

use crate::error::RuntimeError;
use crate::result::AsyncResult;
use crate::runtime::processor::{drive_task, Processor, ProcessorHandle};

/// Waits for `result`, suspending the current coroutine if one is running
/// on this thread, blocking the OS thread otherwise.
///
/// Already-terminal results never cross a suspend point: `is_terminal` is
/// checked before `park_with` is even called. The only window where a
/// coroutine still suspends for a result that turns out to already be
/// terminal is the race between that check and registering the
/// continuation inside `park_with`'s callback — there `AsyncResult::then`
/// itself resolves the race by firing synchronously and re-posting the
/// coroutine immediately, so the coroutine is never left parked forever;
/// it just crosses one extra, effectively free, scheduling round trip.
pub fn await_result<T>(result: &AsyncResult<T>) -> Result<T, RuntimeError>
where
    T: Clone + Send + 'static,
{
    match Processor::current() {
        Some(handler) => await_on_coroutine(handler, result),
        None => result.get(),
    }
}

fn await_on_coroutine<T>(handler: ProcessorHandle, result: &AsyncResult<T>) -> Result<T, RuntimeError>
where
    T: Clone + Send + 'static,
{
    if result.is_terminal() {
        return result.get();
    }

    // The parked coroutine's own stack holds a clone of `result` (whatever
    // the caller awaited it through). If the continuation registered below
    // captured `coro` directly, `result`'s `Inner` would transitively own the
    // very coroutine that keeps one of its own strong references alive — a
    // cycle neither `Inner`'s refcount nor `Terminate` could ever break. So
    // `coro` goes into the scheduler's parked table instead, keyed by a
    // plain `usize`; the continuation only captures that key.
    let result_for_cancel = result.clone();
    let result_for_wake = result.clone();

    handler.park_with(move |processor, mut coro| {
        let scheduler = processor.scheduler().clone();
        coro.set_on_cancel(move || {
            let _ = result_for_cancel.fail(RuntimeError::Cancelled);
        });

        let key = scheduler.park(coro);
        let scheduler_for_wake = scheduler.clone();
        result_for_wake.then(move |_state| {
            if let Some(coro) = scheduler_for_wake.take_parked(key) {
                scheduler_for_wake.post(drive_task(coro));
            }
        });
    });

    result.get()
}
