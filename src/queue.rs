//! Work-stealing queue: single-owner push/pop, multi-consumer steal.
//!
//! The teacher vendors an unmaintained git-only `deque` crate for this. This
//! rewrite gets the same owner-push / owner-pop / peer-steal shape, plus a
//! lock-free overflow path, from `crossbeam-deque`'s `Worker`/`Stealer`/
//! `Injector` — the maintained continuation of the same design (see
//! DESIGN.md).

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

/// The owner side of one processor's work-stealing queue.
pub struct WorkStealQueue<T> {
    worker: Worker<T>,
}

impl<T> WorkStealQueue<T> {
    pub fn new() -> Self {
        WorkStealQueue {
            worker: Worker::new_fifo(),
        }
    }

    /// A cloneable handle other processors use to steal from this queue.
    pub fn stealer(&self) -> Stealer<T> {
        self.worker.stealer()
    }

    /// Pushes to the owner's end. Never blocks, never fails: `crossbeam_deque`
    /// grows its buffer rather than reporting `QueueFull`, so the overflow
    /// path specified for a bounded ring buffer is driven explicitly by
    /// `Scheduler::post`, not by this type.
    pub fn push(&self, item: T) {
        self.worker.push(item);
    }

    /// Pops from the owner's end.
    pub fn pop(&self) -> Option<T> {
        self.worker.pop()
    }

    pub fn len(&self) -> usize {
        self.worker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }

    /// Exposes the underlying `Worker` for callers that need to hand it to
    /// `Injector::steal_batch_and_pop` directly (the scheduler, draining a
    /// processor's inbox into its local queue).
    pub(crate) fn as_worker(&self) -> &Worker<T> {
        &self.worker
    }
}

impl<T> Default for WorkStealQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempts one steal from a single peer, retrying while the peer reports
/// a transient conflict and giving up once it reports `Empty`.
pub fn steal_one<T>(stealer: &Stealer<T>) -> Option<T> {
    loop {
        match stealer.steal() {
            Steal::Success(item) => return Some(item),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

/// Drains a batch from the scheduler's overflow injector onto `worker`, then
/// pops one for immediate use. Mirrors the pattern crossbeam documents for
/// combining a per-worker queue with a shared injector.
pub fn steal_from_injector<T>(injector: &Injector<T>, worker: &Worker<T>) -> Option<T> {
    loop {
        match injector.steal_batch_and_pop(worker) {
            Steal::Success(item) => return Some(item),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_pop_preserves_fifo_order_for_owner() {
        let q = WorkStealQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn steal_one_delivers_exactly_once() {
        let q = WorkStealQueue::new();
        q.push(10);
        let stealer = q.stealer();

        let stolen = steal_one(&stealer);
        assert_eq!(stolen, Some(10));
        assert_eq!(q.pop(), None);
        assert_eq!(steal_one(&stealer), None);
    }
}
