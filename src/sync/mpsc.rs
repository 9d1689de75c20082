//! Multi-producer, single-consumer FIFO queue, coroutine- and thread-aware.
//!
//! Distinct from [`crate::channel::Channel`]'s broadcast-to-every-watcher
//! semantics: each value has exactly one consumer. Grounded on the
//! teacher's `sync::mpsc` (wait-list-of-parked-handles guarded by a mutex,
//! woken on send), but the wait list here holds an
//! [`crate::result::AsyncResult`] "doorbell" instead of raw coroutine
//! handles, so waking a receiver reuses the same suspend/resume bridge
//! ([`crate::awaiter::await_result`]) already built for `AsyncResult`
//! instead of re-deriving coroutine parking a second time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use std::sync::mpsc::{RecvError, SendError, TryRecvError, TrySendError};

use crate::awaiter::await_result;
use crate::result::AsyncResult;

struct State<T> {
    queue: VecDeque<T>,
    recv_doorbell: Option<AsyncResult<()>>,
    send_doorbell: Option<AsyncResult<()>>,
    capacity: Option<usize>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    senders: AtomicUsize,
}

fn ring(slot: &mut Option<AsyncResult<()>>) {
    if let Some(bell) = slot.take() {
        let _ = bell.complete(());
    }
}

/// The producing half. Cloning increments a live-sender count; the last
/// clone dropped disconnects the channel, waking any parked receiver.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for Sender<T> {}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            ring(&mut state.recv_doorbell);
        }
    }
}

impl<T> Sender<T> {
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(capacity) = state.capacity {
            if state.queue.len() >= capacity {
                drop(state);
                return Err(SendError(value));
            }
        }
        state.queue.push_back(value);
        ring(&mut state.recv_doorbell);
        Ok(())
    }
}

/// The consuming half. Not `Clone`: exactly one coroutine or thread should
/// own a `Receiver` at a time.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for Receiver<T> {}

impl<T: Send + 'static> Receiver<T> {
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.queue.pop_front() {
            Some(value) => {
                ring(&mut state.send_doorbell);
                Ok(value)
            }
            None if self.shared.senders.load(Ordering::SeqCst) == 0 => Err(TryRecvError::Disconnected),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Suspends the current coroutine (or blocks the OS thread, off a
    /// processor) until a value arrives or every `Sender` has dropped.
    pub fn recv(&self) -> Result<T, RecvError> {
        loop {
            let bell = {
                let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
                match state.queue.pop_front() {
                    Some(value) => {
                        ring(&mut state.send_doorbell);
                        return Ok(value);
                    }
                    None if self.shared.senders.load(Ordering::SeqCst) == 0 => return Err(RecvError),
                    None => state.recv_doorbell.get_or_insert_with(AsyncResult::pending).clone(),
                }
            };
            let _ = await_result(&bell);
        }
    }
}

/// Creates an unbounded channel: `send` never blocks or fails except once
/// disconnected.
pub fn channel<T: Send + 'static>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            recv_doorbell: None,
            send_doorbell: None,
            capacity: None,
        }),
        senders: AtomicUsize::new(1),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

/// The producing half of a bounded channel. `send` suspends (or blocks)
/// while the queue is at capacity instead of failing.
pub struct SyncSender<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for SyncSender<T> {}

impl<T> Clone for SyncSender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        SyncSender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for SyncSender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            ring(&mut state.recv_doorbell);
        }
    }
}

impl<T: Send + 'static> SyncSender<T> {
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = state.capacity.expect("SyncSender always has a capacity");
        if state.queue.len() >= capacity {
            return Err(TrySendError::Full(value));
        }
        state.queue.push_back(value);
        ring(&mut state.recv_doorbell);
        Ok(())
    }

    /// Suspends the current coroutine (or blocks the OS thread) while the
    /// queue is full.
    pub fn send(&self, mut value: T) -> Result<(), SendError<T>> {
        loop {
            let bell = {
                let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
                let capacity = state.capacity.expect("SyncSender always has a capacity");
                if state.queue.len() < capacity {
                    state.queue.push_back(value);
                    ring(&mut state.recv_doorbell);
                    return Ok(());
                }
                state.send_doorbell.get_or_insert_with(AsyncResult::pending).clone()
            };
            let _ = await_result(&bell);
            value = match self.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(v)) => v,
                Err(TrySendError::Disconnected(v)) => return Err(SendError(v)),
            };
        }
    }
}

pub struct SyncReceiver<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for SyncReceiver<T> {}

impl<T: Send + 'static> SyncReceiver<T> {
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.queue.pop_front() {
            Some(value) => {
                ring(&mut state.send_doorbell);
                Ok(value)
            }
            None if self.shared.senders.load(Ordering::SeqCst) == 0 => Err(TryRecvError::Disconnected),
            None => Err(TryRecvError::Empty),
        }
    }

    pub fn recv(&self) -> Result<T, RecvError> {
        loop {
            let bell = {
                let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
                match state.queue.pop_front() {
                    Some(value) => {
                        ring(&mut state.send_doorbell);
                        return Ok(value);
                    }
                    None if self.shared.senders.load(Ordering::SeqCst) == 0 => return Err(RecvError),
                    None => state.recv_doorbell.get_or_insert_with(AsyncResult::pending).clone(),
                }
            };
            let _ = await_result(&bell);
        }
    }
}

/// Creates a bounded channel of the given capacity.
pub fn sync_channel<T: Send + 'static>(bound: usize) -> (SyncSender<T>, SyncReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            recv_doorbell: None,
            send_doorbell: None,
            capacity: Some(bound),
        }),
        senders: AtomicUsize::new(1),
    });
    (
        SyncSender {
            shared: Arc::clone(&shared),
        },
        SyncReceiver { shared },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn send_then_recv_preserves_fifo_order() {
        let (tx, rx) = channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Ok(3));
    }

    #[test]
    fn recv_off_a_processor_blocks_until_background_send() {
        let (tx, rx) = channel();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv(), Ok(42));
    }

    #[test]
    fn recv_after_every_sender_dropped_disconnects() {
        let (tx, rx) = channel::<i32>();
        drop(tx);
        assert_eq!(rx.recv(), Err(RecvError));
    }

    #[test]
    fn sync_channel_rejects_sends_past_capacity() {
        let (tx, rx) = sync_channel(1);
        tx.try_send(1).unwrap();
        assert_eq!(tx.try_send(2), Err(TrySendError::Full(2)));
        assert_eq!(rx.try_recv(), Ok(1));
        assert!(tx.try_send(2).is_ok());
    }

    #[test]
    fn sync_channel_send_blocks_until_space_frees_up() {
        let (tx, rx) = sync_channel(1);
        tx.try_send(1).unwrap();
        let blocked = thread::spawn(move || tx.send(2));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(blocked.join().unwrap(), Ok(()));
        assert_eq!(rx.try_recv(), Ok(2));
    }
}
