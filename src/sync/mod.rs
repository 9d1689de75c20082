//! Coroutine-aware synchronization primitives layered on top of `AsyncResult`.

pub mod mpsc;
