//! Crate-wide error type.
//!
//! `RuntimeError` folds every failure kind the design calls out (§7 of the
//! spec this crate grew from) into a single enum so library code can
//! propagate with `?` instead of reaching for panics or raw `PoisonError`s.

use thiserror::Error;

/// Every way a call into this crate can fail.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A second `complete`/`fail` was attempted on an `AsyncResult` that had
    /// already reached a terminal state.
    #[error("result was already completed")]
    AlreadyCompleted,

    /// A watcher was dropped with a pending receive, or the runtime was
    /// terminated while results were still outstanding.
    #[error("operation was cancelled")]
    Cancelled,

    /// A bounded queue (channel or work-stealing queue overflow) rejected a
    /// push. Internal `QueueFull` conditions on the work-stealing queue are
    /// absorbed by falling back to the injector and never reach this variant;
    /// it surfaces only from user-facing bounded channels.
    #[error("queue is full")]
    QueueFull,

    /// Runtime configuration was rejected at `Runtime::setup`.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    /// An API that requires `Runtime::setup` to have run was called before
    /// setup, or after `Runtime::terminate`.
    #[error("runtime is not initialized")]
    NotInitialized,

    /// A user callable escaped with an error, or internal invariants (e.g. a
    /// poisoned lock) were violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for RuntimeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RuntimeError::Internal(format!("poisoned lock: {err}"))
    }
}

/// Crate-local alias, distinct from [`crate::result::AsyncResult`] which
/// models the spec's one-shot `Result<T>` future.
pub type Result<T> = std::result::Result<T, RuntimeError>;
