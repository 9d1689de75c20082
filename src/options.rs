//! Runtime and coroutine configuration.

use std::fmt;

/// Scheduling priority attached to a [`WorkGroupOption`].
///
/// Ordered so a future weighted scheduler can use it directly as a
/// `BinaryHeap` key; this crate currently only stores it (readable back via
/// `rt::work_group_share`), it does not yet enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// The reserved name of the work group that always exists.
pub const MAIN_WORK_GROUP: &str = "main";

/// Hard cap on the number of configured work groups.
pub const MAX_GROUPS_COUNT: usize = 32;

/// A named scheduling class: a weight cap, a reserved share of capacity, and
/// a priority. Registered through [`RuntimeOptions::work_groups_option`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkGroupOption {
    pub name: String,
    pub weight_cap: f64,
    pub reserved_share: f64,
    pub priority: Priority,
}

impl WorkGroupOption {
    pub fn new(
        name: impl Into<String>,
        weight_cap: f64,
        reserved_share: f64,
        priority: Priority,
    ) -> Self {
        WorkGroupOption {
            name: name.into(),
            weight_cap,
            reserved_share,
            priority,
        }
    }

    pub(crate) fn main() -> Self {
        WorkGroupOption::new(MAIN_WORK_GROUP, 1.0, 1.0, Priority::Medium)
    }
}

/// Top-level knobs accepted by `Runtime::setup`.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// `0` uses the real NUMA topology (via [`crate::topology`]); `N > 0`
    /// creates `N` synthetic, equal-sized nodes instead.
    pub virtual_numa_nodes_count: usize,
    /// Additional work groups beyond the always-present `"main"` group.
    pub work_groups_option: Vec<WorkGroupOption>,
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_virtual_numa_nodes(mut self, count: usize) -> Self {
        self.virtual_numa_nodes_count = count;
        self
    }

    pub fn with_work_group(mut self, group: WorkGroupOption) -> Self {
        self.work_groups_option.push(group);
        self
    }
}

/// Per-coroutine construction options (stack size, debug name).
#[derive(Clone)]
pub struct Options {
    pub name: Option<String>,
    pub stack_size: usize,
}

/// Default stack size for a coroutine: 2 MiB, matching the teacher's choice
/// for `ProtectedFixedSizeStack`.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

impl Default for Options {
    fn default() -> Self {
        Options {
            name: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Options")
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}
