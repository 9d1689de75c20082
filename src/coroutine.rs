//! Stackful coroutines built on `context`'s raw stack-switching primitives
//! (the same crate the teacher depends on for this).
//!
//! A coroutine's entry closure does not receive an explicit handler/yield
//! pair as formal parameters. Instead, exactly like the teacher's own
//! `Scheduler::sched()` and `sync::mpsc::Receiver::recv()`, it reaches the
//! equivalent capability by calling [`crate::runtime::processor::Processor::current`]
//! from wherever it needs to suspend — see [`crate::awaiter`] for the bridge
//! to `AsyncResult<T>`.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};

use crate::options::Options;
use crate::task::ExecutorState;

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet resumed for the first time.
    Created,
    /// Yielded cooperatively; ready to run again as soon as some processor
    /// picks it up.
    Suspended,
    /// Suspended by the awaiter machinery, waiting for an external `Resume`.
    Parked,
    /// Currently executing.
    Running,
    /// Its entry function has returned (possibly by panicking). Never
    /// resumed again.
    Finished,
}

thread_local! {
    /// The context to switch back to on yield, valid only while some
    /// coroutine's entry closure is actually executing on this OS thread.
    static CALLER_CONTEXT: Cell<Option<Context>> = Cell::new(None);
}

/// A stackful coroutine: its own guarded stack, an entry closure, and
/// whichever state it last yielded with.
pub struct Coroutine {
    context: Option<Context>,
    #[allow(dead_code)] // kept alive for as long as `context` points into it
    stack: Option<ProtectedFixedSizeStack>,
    state: State,
    name: Option<String>,
    /// Placement hint, set on first schedule and re-used on every
    /// re-posting so a coroutine keeps running on the same processor/
    /// executor across yields.
    pub(crate) pin: ExecutorState,
    panic: Option<Box<dyn Any + Send>>,
    /// Registered by `MakeCoroutine`'s wrapper so a body that finishes by
    /// panicking can still fail its caller's `AsyncResult` rather than
    /// leaving it pending forever. Type-erased because `Coroutine` itself
    /// carries no generic return type.
    on_panic: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>,
    /// Registered by `crate::awaiter` while parked on an `AsyncResult`. Fired
    /// by `crate::scheduler::Scheduler::cancel_all_parked` at shutdown for
    /// any coroutine still parked at that point, so a never-completing
    /// `AsyncResult` a coroutine is awaiting still observes `Cancelled` on
    /// `Terminate` even though the scheduler (not the `AsyncResult`) owns the
    /// parked `Handle` — see the cycle-breaking ownership rule in DESIGN.md.
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

unsafe impl Send for Coroutine {}

/// Owning handle to a coroutine, as stored in a work-stealing queue.
pub type Handle = Box<Coroutine>;

struct StartPayload<F> {
    func: Option<F>,
    state_ptr: *mut State,
    panic_ptr: *mut Option<Box<dyn Any + Send>>,
}

impl Coroutine {
    /// Spawns a coroutine with the given options. `f` runs on the
    /// coroutine's own stack the first time some processor resumes it.
    pub fn spawn_opts<F>(f: F, opts: Options) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = ProtectedFixedSizeStack::new(opts.stack_size)
            .unwrap_or_else(|err| panic!("failed to allocate coroutine stack: {err}"));
        let entry_context = unsafe { Context::new(&stack, trampoline::<F>) };

        let mut coro = Box::new(Coroutine {
            context: None,
            stack: Some(stack),
            state: State::Created,
            name: opts.name,
            pin: ExecutorState::default(),
            panic: None,
            on_panic: None,
            on_cancel: None,
        });

        let state_ptr: *mut State = &mut coro.state;
        let panic_ptr: *mut Option<Box<dyn Any + Send>> = &mut coro.panic;
        let payload = Box::new(StartPayload {
            func: Some(f),
            state_ptr,
            panic_ptr,
        });
        let data = Box::into_raw(payload) as usize;

        // Drives the trampoline up to its implicit initial yield and no
        // further: the caller's entry body has not run yet.
        let transfer = entry_context.resume(data);
        coro.context = Some(transfer.context);
        coro.state = State::Suspended;
        coro
    }

    pub fn spawn<F>(f: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        Coroutine::spawn_opts(f, Options::default())
    }

    pub fn set_on_panic<F>(&mut self, f: F)
    where
        F: FnOnce(Box<dyn Any + Send>) + Send + 'static,
    {
        self.on_panic = Some(Box::new(f));
    }

    /// Registers the hook fired if this coroutine is still parked when
    /// `cancel_all_parked` sweeps the scheduler's parked table. Overwrites
    /// whatever hook a previous park registered — only the most recent
    /// await matters, since a coroutine resumed out of an earlier park is no
    /// longer sitting on that earlier `AsyncResult`.
    pub(crate) fn set_on_cancel<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(f));
    }

    /// Runs the registered cancel callback, if any. Called by the scheduler
    /// for a coroutine still parked at shutdown.
    pub(crate) fn fire_on_cancel(&mut self) {
        if let Some(cb) = self.on_cancel.take() {
            cb();
        }
    }

    pub fn debug_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Takes the panic payload left behind by a body that finished by
    /// unwinding, if any.
    pub fn take_panic(&mut self) -> Option<Box<dyn Any + Send>> {
        self.panic.take()
    }

    /// Runs the registered panic callback, if both a panic and a callback
    /// are present. Called by the processor once it observes `Finished`.
    pub(crate) fn fire_on_panic(&mut self) {
        if let (Some(payload), Some(cb)) = (self.panic.take(), self.on_panic.take()) {
            cb(payload);
        }
    }

    /// Switches control to the coroutine, returning whatever `data` it last
    /// yielded (or finished) with. Panics if the coroutine is finished —
    /// callers must check `is_finished` first.
    pub fn resume(&mut self, data: usize) -> usize {
        assert!(!self.is_finished(), "cannot resume a finished coroutine");
        self.state = State::Running;
        let context = self
            .context
            .take()
            .expect("coroutine is already running on another thread");
        let transfer = context.resume(data);
        self.context = Some(transfer.context);
        transfer.data
    }

    /// Called from inside the coroutine's own running body (by way of
    /// `ProcessorHandle`) to yield back to whoever resumed it, recording
    /// `state` as the reason.
    pub(crate) fn yield_with(&mut self, state: State, data: usize) -> usize {
        self.state = state;
        yield_now(data)
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.debug_name())
            .field("state", &self.state)
            .finish()
    }
}

/// Hands control back to whichever processor last resumed the coroutine
/// currently running on this OS thread. Only meaningful while inside a
/// coroutine's entry body (directly or transitively).
pub(crate) fn yield_now(data: usize) -> usize {
    let caller = CALLER_CONTEXT
        .with(|cell| cell.take())
        .expect("yield_now called outside a running coroutine");
    let transfer = caller.resume(data);
    CALLER_CONTEXT.with(|cell| cell.set(Some(transfer.context)));
    transfer.data
}

extern "C" fn trampoline<F>(t: Transfer) -> !
where
    F: FnOnce() + Send + 'static,
{
    let payload = unsafe { Box::from_raw(t.data as *mut StartPayload<F>) };
    let StartPayload {
        mut func,
        state_ptr,
        panic_ptr,
    } = *payload;
    let body = func.take().expect("coroutine entry closure missing");

    // Implicit initial yield: the spawner is still constructing the handle.
    let t = t.context.resume(0);
    CALLER_CONTEXT.with(|cell| cell.set(Some(t.context)));

    let result = panic::catch_unwind(AssertUnwindSafe(body));

    // SAFETY: `state_ptr`/`panic_ptr` point at fields of the `Coroutine` that
    // owns this stack; only one of {this coroutine, its owning processor}
    // ever touches them at a time, so the write needs no synchronization.
    unsafe {
        if let Err(payload) = result {
            *panic_ptr = Some(payload);
        }
        *state_ptr = State::Finished;
    }

    let caller = CALLER_CONTEXT
        .with(|cell| cell.take())
        .expect("coroutine has no caller context at exit");
    let mut t = caller.resume(0);
    // A finished coroutine is never resumed again in practice (processors
    // check `is_finished` first); if it somehow is, bounce straight back
    // rather than re-running the body.
    loop {
        t = t.context.resume(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_does_not_run_body_before_first_resume() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        let coro = Coroutine::spawn(move || {
            ran2.store(true, Ordering::SeqCst);
        });

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(coro.state(), State::Suspended);
    }

    #[test]
    fn resume_runs_body_to_completion_without_internal_yields() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        let mut coro = Coroutine::spawn(move || {
            ran2.store(true, Ordering::SeqCst);
        });

        coro.resume(0);
        assert!(ran.load(Ordering::SeqCst));
        assert!(coro.is_finished());
    }

    #[test]
    fn panicking_body_is_captured_not_propagated() {
        let mut coro = Coroutine::spawn(|| {
            panic!("boom");
        });

        coro.resume(0);
        assert!(coro.is_finished());
        assert!(coro.take_panic().is_some());
    }
}
