//! Process-wide runtime singleton.
//!
//! Exists as a singleton in the system this rewrite grew from; here it is
//! an explicit `Runtime` value behind a `OnceLock<Mutex<Option<Runtime>>>`
//! guarded accessor rather than file-scope `static mut`, so `setup`/
//! `terminate` are ordinary, safe function calls. Callers who want no
//! global state at all can sidestep this module and drive `Executor`s
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::info;

use crate::coroutine::Coroutine;
use crate::error::RuntimeError;
use crate::io_executor::IoExecutor;
use crate::metrics::{self, MetricsSink};
use crate::options::{Options, RuntimeOptions, WorkGroupOption, MAIN_WORK_GROUP, MAX_GROUPS_COUNT};
use crate::profiler::{self, ProfilerHooks};
use crate::result::AsyncResult;
use crate::runtime::executor::Executor;
use crate::runtime::processor::{drive_task, Processor};
use crate::task::{EntityTag, ExecutorId, Task};
use crate::topology;

/// Opaque handle returned by [`get_work_group`]; stable for the lifetime of
/// one `setup`/`terminate` cycle.
pub type ObjectId = usize;

static RUNTIME: OnceLock<Mutex<Option<Runtime>>> = OnceLock::new();

fn global() -> &'static Mutex<Option<Runtime>> {
    RUNTIME.get_or_init(|| Mutex::new(None))
}

struct EntityBindings {
    executor_of: HashMap<EntityTag, ExecutorId>,
    next_tag: AtomicU64,
}

/// Holds every CPU executor (one per NUMA node, or per
/// `virtual_numa_nodes_count` synthetic node), the I/O executor, and the
/// work-group/entity-tag tables that route tasks onto them.
pub struct Runtime {
    executors: Vec<Executor>,
    io_executor: IoExecutor,
    work_groups: Vec<WorkGroupOption>,
    entity_bindings: Mutex<EntityBindings>,
    executor_entity_counts: Vec<AtomicUsize>,
    next_free_executor: AtomicUsize,
    metrics: Arc<dyn MetricsSink>,
    profiler: Arc<dyn ProfilerHooks>,
}

impl Runtime {
    fn new(options: RuntimeOptions) -> Result<Runtime, RuntimeError> {
        if options.work_groups_option.len() >= MAX_GROUPS_COUNT {
            return Err(RuntimeError::InvalidConfig(format!(
                "more than {MAX_GROUPS_COUNT} work groups requested"
            )));
        }
        if options.work_groups_option.iter().any(|g| g.name == MAIN_WORK_GROUP) {
            return Err(RuntimeError::InvalidConfig(format!(
                "work group \"{MAIN_WORK_GROUP}\" is reserved"
            )));
        }

        let profiler = profiler::default_hooks();
        profiler.start();

        // Real NUMA topology discovery is out of scope (see `crate::topology`);
        // `virtual_numa_nodes_count == 0` is resolved to a single node
        // spanning every CPU rather than attempting real detection.
        let node_count = options.virtual_numa_nodes_count.max(1);
        let nodes = topology::enumerate_nodes(node_count);

        let executors: Vec<Executor> = nodes
            .iter()
            .map(|node| {
                Executor::start_with_cpu_ids(
                    format!("cpu-{}", node.node_id),
                    node.cpu_ids.len().max(1),
                    &node.cpu_ids,
                )
            })
            .collect();
        let executor_entity_counts = executors.iter().map(|_| AtomicUsize::new(0)).collect();

        let io_executor = IoExecutor::start(executors.len().max(1));

        let mut work_groups = vec![WorkGroupOption::main()];
        work_groups.extend(options.work_groups_option);

        info!(
            "runtime: set up {} cpu executor(s), {} work group(s)",
            executors.len(),
            work_groups.len()
        );

        Ok(Runtime {
            executors,
            io_executor,
            work_groups,
            entity_bindings: Mutex::new(EntityBindings {
                executor_of: HashMap::new(),
                next_tag: AtomicU64::new(0),
            }),
            executor_entity_counts,
            next_free_executor: AtomicUsize::new(0),
            metrics: metrics::default_sink(),
            profiler,
        })
    }

    fn add_entity_tag(&self) -> EntityTag {
        let (executor_id, _) = self
            .executor_entity_counts
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| count.load(Ordering::SeqCst))
            .expect("runtime always has at least one executor");
        self.executor_entity_counts[executor_id].fetch_add(1, Ordering::SeqCst);

        let mut bindings = self.entity_bindings.lock().unwrap();
        let tag = bindings.next_tag.fetch_add(1, Ordering::SeqCst);
        bindings.executor_of.insert(tag, executor_id);
        tag
    }

    fn delete_entity_tag(&self, tag: EntityTag) {
        let mut bindings = self.entity_bindings.lock().unwrap();
        if let Some(executor_id) = bindings.executor_of.remove(&tag) {
            self.executor_entity_counts[executor_id].fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn resolve_executor(&self, task: &Task) -> ExecutorId {
        let state = task.executor_state();
        if let Some(id) = state.executor {
            if id < self.executors.len() {
                return id;
            }
        }
        if let Some(tag) = state.entity_tag {
            if let Some(&id) = self.entity_bindings.lock().unwrap().executor_of.get(&tag) {
                return id;
            }
        }
        self.next_free_executor.fetch_add(1, Ordering::Relaxed) % self.executors.len()
    }

    fn post(&self, task: Task) {
        let executor_id = self.resolve_executor(&task);
        self.executors[executor_id].post(task);
    }

    fn work_group(&self, name: &str) -> Option<ObjectId> {
        self.work_groups.iter().position(|g| g.name == name)
    }

    fn work_group_share(&self, name: &str) -> Option<f64> {
        self.work_groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.weight_cap)
    }

    fn shutdown(self) {
        info!("runtime: terminating");
        for executor in self.executors {
            executor.shutdown();
        }
        self.io_executor.shutdown();
        self.profiler.stop();
    }
}

/// Creates the process-wide runtime. Fails if one is already set up, or if
/// `options` names a duplicate/reserved work group or too many of them.
pub fn setup(options: RuntimeOptions) -> Result<(), RuntimeError> {
    let mut slot = global().lock()?;
    if slot.is_some() {
        return Err(RuntimeError::InvalidConfig("runtime is already set up".into()));
    }
    *slot = Some(Runtime::new(options)?);
    Ok(())
}

/// Joins every executor thread and returns to the uninitialized state.
/// Idempotent: calling this before `setup`, or twice in a row, is a no-op.
pub fn terminate() {
    let runtime = global().lock().unwrap().take();
    if let Some(runtime) = runtime {
        runtime.shutdown();
    }
}

/// Registers a user object with the least-loaded CPU executor, returning a
/// stable tag future `Task`s can pin themselves to for locality.
pub fn add_entity_tag() -> Result<EntityTag, RuntimeError> {
    let slot = global().lock()?;
    slot.as_ref().map(Runtime::add_entity_tag).ok_or(RuntimeError::NotInitialized)
}

/// Removes a tag previously returned by `add_entity_tag`; a no-op if it was
/// never registered (or already removed).
pub fn delete_entity_tag(tag: EntityTag) -> Result<(), RuntimeError> {
    let slot = global().lock()?;
    let runtime = slot.as_ref().ok_or(RuntimeError::NotInitialized)?;
    runtime.delete_entity_tag(tag);
    Ok(())
}

/// Resolves an `ObjectId` for the named work group, `"main"` included.
pub fn get_work_group(name: &str) -> Result<ObjectId, RuntimeError> {
    let slot = global().lock()?;
    let runtime = slot.as_ref().ok_or(RuntimeError::NotInitialized)?;
    runtime
        .work_group(name)
        .ok_or_else(|| RuntimeError::InvalidConfig(format!("no such work group \"{name}\"")))
}

/// The configured `weight_cap` for the named work group. Read-only: nothing
/// in `Scheduler::post_now` consults this yet (see DESIGN.md's open-question
/// entry on work-group weights), but it is no longer unreadable from outside
/// `rt.rs` the way an inspectable-only resolution requires.
pub fn work_group_share(name: &str) -> Result<f64, RuntimeError> {
    let slot = global().lock()?;
    let runtime = slot.as_ref().ok_or(RuntimeError::NotInitialized)?;
    runtime
        .work_group_share(name)
        .ok_or_else(|| RuntimeError::InvalidConfig(format!("no such work group \"{name}\"")))
}

/// Posts a bare `Task` to whichever CPU executor its `ExecutorState`
/// resolves to (explicit executor, then entity tag, then round-robin).
pub fn post(task: Task) -> Result<(), RuntimeError> {
    let slot = global().lock()?;
    let runtime = slot.as_ref().ok_or(RuntimeError::NotInitialized)?;
    runtime.post(task);
    Ok(())
}

/// The configured metrics sink (a no-op one if the caller never installed
/// a real one).
pub fn metrics() -> Result<Arc<dyn MetricsSink>, RuntimeError> {
    let slot = global().lock()?;
    slot.as_ref().map(|rt| Arc::clone(&rt.metrics)).ok_or(RuntimeError::NotInitialized)
}

/// Runs `f` on a dedicated I/O thread, completing the returned
/// `AsyncResult` with its outcome.
pub fn submit_io<T, F>(f: F) -> Result<AsyncResult<T>, RuntimeError>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let slot = global().lock()?;
    let runtime = slot.as_ref().ok_or(RuntimeError::NotInitialized)?;
    Ok(runtime.io_executor.submit(f))
}

/// Spawns `f` as a coroutine: on the current processor if one is running,
/// otherwise posted to the runtime's least-loaded executor. Returns
/// immediately with an `AsyncResult` that completes with `f`'s return value,
/// or fails with `RuntimeError::Internal` if `f` panics, or with
/// `RuntimeError::NotInitialized` if spawned from outside any processor
/// before `setup` has run.
pub fn spawn<F, Ret>(f: F) -> AsyncResult<Ret>
where
    F: FnOnce() -> Ret + Send + 'static,
    Ret: Clone + Send + 'static,
{
    let result = AsyncResult::pending();
    let result_for_body = result.clone();
    let result_for_panic = result.clone();

    let mut coro = Coroutine::spawn_opts(
        move || {
            let value = f();
            let _ = result_for_body.complete(value);
        },
        Options::default(),
    );
    coro.set_on_panic(move |payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "coroutine panicked".to_string());
        let _ = result_for_panic.fail(RuntimeError::Internal(message));
    });

    if let Some(mut handler) = Processor::current() {
        handler.spawn_handle(coro);
        return result;
    }

    match global().lock() {
        Ok(slot) => match slot.as_ref() {
            Some(runtime) => runtime.post(drive_task(coro)),
            None => {
                drop(coro);
                let _ = result.fail(RuntimeError::NotInitialized);
            }
        },
        Err(_) => {
            drop(coro);
            let _ = result.fail(RuntimeError::Internal("runtime lock poisoned".into()));
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    // The global runtime is shared process-wide, so these tests serialize
    // through one lock instead of running as ordinary parallel `#[test]`s.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn setup_then_terminate_returns_to_uninitialized() {
        let _guard = TEST_LOCK.lock().unwrap();
        setup(RuntimeOptions::new().with_virtual_numa_nodes(1)).unwrap();
        assert!(matches!(setup(RuntimeOptions::new()), Err(RuntimeError::InvalidConfig(_))));
        terminate();
        terminate();
        assert!(matches!(post(Task::new(|| {})), Err(RuntimeError::NotInitialized)));
    }

    #[test]
    fn spawning_off_a_processor_before_setup_fails_the_result() {
        let _guard = TEST_LOCK.lock().unwrap();
        terminate();
        let result: AsyncResult<i32> = spawn(|| 1);
        assert!(matches!(result.get(), Err(RuntimeError::NotInitialized)));
    }

    #[test]
    fn spawned_coroutine_completes_its_result() {
        let _guard = TEST_LOCK.lock().unwrap();
        setup(RuntimeOptions::new().with_virtual_numa_nodes(1)).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let result = spawn(move || {
            ran2.store(true, Ordering::SeqCst);
            7
        });

        assert_eq!(result.get().unwrap(), 7);
        assert!(ran.load(Ordering::SeqCst));

        terminate();
    }

    #[test]
    fn entity_tag_round_trips_through_add_and_delete() {
        let _guard = TEST_LOCK.lock().unwrap();
        setup(RuntimeOptions::new().with_virtual_numa_nodes(1)).unwrap();

        let tag = add_entity_tag().unwrap();
        delete_entity_tag(tag).unwrap();

        terminate();
    }

    #[test]
    fn main_work_group_always_resolves() {
        let _guard = TEST_LOCK.lock().unwrap();
        setup(RuntimeOptions::new().with_virtual_numa_nodes(1)).unwrap();
        assert!(get_work_group(MAIN_WORK_GROUP).is_ok());
        terminate();
    }

    #[test]
    fn work_group_share_reads_back_the_configured_weight() {
        let _guard = TEST_LOCK.lock().unwrap();
        setup(
            RuntimeOptions::new()
                .with_virtual_numa_nodes(1)
                .with_work_group(WorkGroupOption::new("batch", 0.25, 0.1, crate::options::Priority::Low)),
        )
        .unwrap();

        assert_eq!(work_group_share("batch").unwrap(), 0.25);
        assert_eq!(work_group_share(MAIN_WORK_GROUP).unwrap(), 1.0);
        assert!(matches!(
            work_group_share("does-not-exist"),
            Err(RuntimeError::InvalidConfig(_))
        ));

        terminate();
    }
}
