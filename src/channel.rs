//! Multi-watcher broadcast channel.
//!
//! Distinct from [`crate::sync::mpsc`]'s point-to-point queue: every live
//! watcher receives every sent value, in send order, independent of the
//! other watchers. Grounded on the same wait-list-plus-mutex shape as the
//! teacher's `sync::mpsc` (`examples/kingxsp-coio-rs/src/sync/mpsc.rs`),
//! generalized from "one waiting receiver" to "one queue per watcher."

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::RuntimeError;
use crate::result::AsyncResult;

struct WatcherQueue<T> {
    pending: VecDeque<T>,
    waiting: Option<AsyncResult<T>>,
}

impl<T> WatcherQueue<T> {
    fn new() -> Self {
        WatcherQueue {
            pending: VecDeque::new(),
            waiting: None,
        }
    }
}

struct ChannelState<T> {
    next_id: u64,
    watchers: Vec<(u64, Arc<Mutex<WatcherQueue<T>>>)>,
}

/// Carries values of one type from any number of senders to any number of
/// watchers. Cloning a `Channel` shares the same watcher set; the last
/// clone dropped tears it down along with any watchers still attached.
pub struct Channel<T> {
    state: Arc<Mutex<ChannelState<T>>>,
    default_watcher: Arc<OnceLock<Watcher<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            state: Arc::clone(&self.state),
            default_watcher: Arc::clone(&self.default_watcher),
        }
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    pub fn new() -> Self {
        Channel {
            state: Arc::new(Mutex::new(ChannelState {
                next_id: 0,
                watchers: Vec::new(),
            })),
            default_watcher: Arc::new(OnceLock::new()),
        }
    }

    /// Registers a new watcher with its own FIFO queue. Only values sent
    /// after this call are visible to it.
    pub fn watch(&self) -> Watcher<T> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let queue = Arc::new(Mutex::new(WatcherQueue::new()));
        state.watchers.push((id, Arc::clone(&queue)));
        Watcher {
            state: Arc::clone(&self.state),
            id,
            queue,
        }
    }

    /// Delivers `value` to every watcher live at this moment. Watchers
    /// registered afterward do not see it. O(number of watchers).
    pub fn send(&self, value: T) {
        let state = self.state.lock().unwrap();
        for (_, queue) in &state.watchers {
            let mut q = queue.lock().unwrap();
            match q.waiting.take() {
                Some(waiting) => {
                    // An `AlreadyCompleted` error here would mean the
                    // watcher's own `AsyncResult` was completed by someone
                    // else first, which never happens: only `Channel::send`
                    // and `Watcher`'s own `Drop` ever complete it, and a
                    // dropped watcher is removed from `state.watchers`
                    // first.
                    let _ = waiting.complete(value.clone());
                }
                None => q.pending.push_back(value.clone()),
            }
        }
    }

    /// The channel's implicit default watcher, created on first use.
    /// Mirrors the free-function `AsyncReceive(chan)` convenience from the
    /// external interface.
    pub fn recv(&self) -> AsyncResult<T> {
        let watcher = self.default_watcher.get_or_init(|| self.watch());
        watcher.async_receive()
    }
}

impl<T: Clone + Send + 'static> Default for Channel<T> {
    fn default() -> Self {
        Channel::new()
    }
}

/// A subscriber's own view onto a [`Channel`]'s send order.
pub struct Watcher<T> {
    state: Arc<Mutex<ChannelState<T>>>,
    id: u64,
    queue: Arc<Mutex<WatcherQueue<T>>>,
}

impl<T: Clone + Send + 'static> Watcher<T> {
    /// Returns an `AsyncResult` for the next value: already complete if one
    /// is queued, pending otherwise. Compose with `crate::awaiter::await_result`
    /// to block or suspend on it.
    pub fn async_receive(&self) -> AsyncResult<T> {
        let mut q = self.queue.lock().unwrap();
        match q.pending.pop_front() {
            Some(value) => AsyncResult::ready(value),
            None => {
                let result = AsyncResult::pending();
                q.waiting = Some(result.clone());
                result
            }
        }
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.state.lock().unwrap().watchers.retain(|(id, _)| *id != self.id);

        if let Some(waiting) = self.queue.lock().unwrap().waiting.take() {
            let _ = waiting.fail(RuntimeError::Cancelled);
        }
    }
}

/// A `Channel` whose senders observe backpressure instead of queuing
/// without bound. Capacity bounds each individual watcher's own queue
/// depth; a send that would push any live watcher past capacity is
/// rejected for all of them rather than partially delivered.
pub struct BoundedChannel<T> {
    channel: Channel<T>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedChannel {
            channel: Channel::new(),
            capacity,
        }
    }

    pub fn watch(&self) -> Watcher<T> {
        self.channel.watch()
    }

    /// Delivers `value` to every watcher, or rejects it for all of them
    /// with `QueueFull` if it would push any watcher's backlog past
    /// capacity. Never blocks the sender.
    pub fn try_send(&self, value: T) -> Result<(), RuntimeError> {
        let state = self.channel.state.lock().unwrap();
        for (_, queue) in &state.watchers {
            let q = queue.lock().unwrap();
            if q.waiting.is_none() && q.pending.len() >= self.capacity {
                return Err(RuntimeError::QueueFull);
            }
        }
        drop(state);
        self.channel.send(value);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn watcher_receives_only_values_sent_after_it_subscribed() {
        let channel: Channel<i32> = Channel::new();
        channel.send(1);
        let watcher = channel.watch();
        channel.send(2);

        assert_eq!(watcher.async_receive().get().unwrap(), 2);
    }

    #[test]
    fn two_watchers_see_the_same_send_order() {
        let channel: Channel<&'static str> = Channel::new();
        let a = channel.watch();
        let b = channel.watch();

        channel.send("ping");
        channel.send("pong");

        assert_eq!(a.async_receive().get().unwrap(), "ping");
        assert_eq!(a.async_receive().get().unwrap(), "pong");
        assert_eq!(b.async_receive().get().unwrap(), "ping");
        assert_eq!(b.async_receive().get().unwrap(), "pong");
    }

    #[test]
    fn send_with_zero_watchers_does_not_block_or_panic() {
        let channel: Channel<i32> = Channel::new();
        channel.send(42);
    }

    #[test]
    fn dropping_watcher_with_outstanding_receive_cancels_it() {
        let channel: Channel<i32> = Channel::new();
        let watcher = channel.watch();
        let pending = watcher.async_receive();
        drop(watcher);

        assert!(matches!(pending.get(), Err(RuntimeError::Cancelled)));
    }

    #[test]
    fn bounded_channel_rejects_sends_past_capacity() {
        let channel = BoundedChannel::new(1);
        let watcher = channel.watch();

        assert!(channel.try_send(1).is_ok());
        assert!(matches!(channel.try_send(2), Err(RuntimeError::QueueFull)));
        assert_eq!(watcher.async_receive().get().unwrap(), 1);
        assert!(channel.try_send(3).is_ok());
    }
}
