//! Profiler start/stop hooks, fired at `SetupRuntime`/`Terminate` boundaries.
//!
//! Mirrors `MetricsSink`'s shape: a trait embedders can implement, a no-op
//! default so the hooks cost nothing when unused.

use std::sync::Arc;

pub trait ProfilerHooks: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

#[derive(Debug, Default)]
pub struct NoopProfiler;

impl ProfilerHooks for NoopProfiler {
    fn start(&self) {}
    fn stop(&self) {}
}

pub(crate) fn default_hooks() -> Arc<dyn ProfilerHooks> {
    Arc::new(NoopProfiler)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn noop_hooks_are_callable() {
        let hooks = NoopProfiler;
        hooks.start();
        hooks.stop();
    }
}
