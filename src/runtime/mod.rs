//! The per-thread processing machinery: processors and the executors that
//! group them. The process-wide [`crate::rt::Runtime`] singleton sits above
//! this module and owns one `Executor` per NUMA node (or per virtual node,
//! in test/CI configurations without real NUMA topology).

pub mod executor;
pub mod processor;
