//! Metric counter hooks.
//!
//! Mirrors `profiler.rs`'s shape: a trait embedders can implement in place of
//! a concrete metrics crate, a no-op default so the seam costs nothing when
//! unused. Nothing in the scheduler or processor run loop calls `counter`
//! yet — this is the attachment point a future instrumentation pass would
//! use (tasks posted, tasks stolen, coroutines parked are the natural
//! candidates), not a populated one.

use std::sync::Arc;

/// A single named, labeled counter.
pub trait Counter: Send + Sync {
    fn increment(&self, by: u64);
}

/// Factory for counters, installed once on the `Runtime`.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Counter>;
}

#[derive(Debug, Default)]
struct NoopCounter;

impl Counter for NoopCounter {
    fn increment(&self, _by: u64) {}
}

/// Hands out counters that discard every observation. Installed when no
/// sink is configured.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &str, _labels: &[(&str, &str)]) -> Arc<dyn Counter> {
        Arc::new(NoopCounter)
    }
}

pub(crate) fn default_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn noop_sink_hands_out_a_counter_for_any_name() {
        let sink = NoopMetrics;
        let counter = sink.counter("tasks.posted", &[("executor", "cpu-0")]);
        counter.increment(1);
        counter.increment(3);
    }
}
