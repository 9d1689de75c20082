//! Task: the smallest schedulable unit.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

/// Stable handle used to pin related work (e.g. all tasks belonging to one
/// session object) to the same executor for locality. Allocated by
/// `Runtime::add_entity_tag`.
pub type EntityTag = u64;

/// Identifies one executor inside a `Runtime`'s executor table.
pub type ExecutorId = usize;

/// Placement hint for a task, consulted by `Scheduler::post`/`Runtime::post`
/// in priority order: an explicit executor, then an entity tag, then free
/// routing.
#[derive(Debug, Clone, Default)]
pub struct ExecutorState {
    pub executor: Option<ExecutorId>,
    pub entity_tag: Option<EntityTag>,
    pub processor_hint: Option<usize>,
}

impl ExecutorState {
    pub fn pinned_to(executor: ExecutorId) -> Self {
        ExecutorState {
            executor: Some(executor),
            ..Default::default()
        }
    }

    pub fn for_entity(tag: EntityTag) -> Self {
        ExecutorState {
            entity_tag: Some(tag),
            ..Default::default()
        }
    }
}

/// A callable plus its placement hint and optional deadline. Runs at most
/// once; whatever `Task::run` does is expected to complete an `AsyncResult`
/// exactly once.
pub struct Task {
    callable: Option<Box<dyn FnOnce() + Send + 'static>>,
    pub(crate) state: ExecutorState,
    pub(crate) deadline: Option<Instant>,
    pub(crate) seq: u64,
}

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            callable: Some(Box::new(f)),
            state: ExecutorState::default(),
            deadline: None,
            seq: TASK_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    #[must_use]
    pub fn with_executor_state(mut self, state: ExecutorState) -> Self {
        self.state = state;
        self
    }

    /// Marks this task as not eligible to run before `deadline`. The
    /// scheduler interprets this as an absolute, monotonic `Instant` (the
    /// source's "delay" comparator was ambiguous about absolute vs.
    /// relative; this rewrite resolves it to absolute).
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn executor_state(&self) -> &ExecutorState {
        &self.state
    }

    pub fn is_delayed(&self) -> bool {
        self.deadline.is_some_and(|d| d > Instant::now())
    }

    /// Runs the task's callable. Panics if called twice.
    pub fn run(mut self) {
        let callable = self
            .callable
            .take()
            .expect("Task::run called more than once");
        callable();
    }
}

/// Wraps a `Task` for storage in the scheduler's delayed-task min-heap,
/// ordered so the earliest deadline sorts first out of a `BinaryHeap` (which
/// is otherwise a max-heap).
pub(crate) struct DelayedTask {
    pub(crate) deadline: Instant,
    pub(crate) task: Task,
}

impl DelayedTask {
    pub(crate) fn new(task: Task) -> Self {
        let deadline = task.deadline.expect("DelayedTask requires a deadline");
        DelayedTask { deadline, task }
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.task.seq == other.task.seq
    }
}
impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap::pop` returns the earliest deadline first,
        // tie-broken by insertion order for determinism.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.task.seq.cmp(&self.task.seq))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BinaryHeap;
    use std::time::Duration;

    #[test]
    fn delayed_task_heap_pops_earliest_deadline_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        let mut make = |millis: u64| {
            let t = Task::new(|| {}).with_deadline(now + Duration::from_millis(millis));
            DelayedTask::new(t)
        };

        heap.push(make(30));
        heap.push(make(10));
        heap.push(make(20));

        let first = heap.pop().unwrap();
        let second = heap.pop().unwrap();
        let third = heap.pop().unwrap();

        assert!(first.deadline <= second.deadline);
        assert!(second.deadline <= third.deadline);
    }
}
