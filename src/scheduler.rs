//! Context-aware scheduled execution
//!
//! [`ContextAwareScheduler`] is a scheduled worker pool whose submission
//! entry points carry ambient state across the scheduling boundary. Every
//! submission captures the thread-local
//! [correlation context](crate::context::correlation) and the configured
//! [`ContextPropagator`] values on the submitting thread; the worker clears
//! its own correlation context, installs the captured copy, runs the body,
//! and clears again afterwards, so no task ever observes residue from a
//! previous one.
//!
//! Worker threads come from a [`NamingThreadFactory`]: a stable prefix plus a
//! per-factory counter that never resets and never reuses a number.
//! Cancellation is cooperative: an in-flight body is not interrupted, a
//! future run of a recurring task is suppressed. Shutdown completes in-flight
//! work, releases the threads, and rejects further submissions.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::context::{correlation, CapturedContext, ContextPropagator};
use crate::error::{CoreError, CoreResult};

/// Spawns threads named `{prefix}-1`, `{prefix}-2`, ...
///
/// The counter is per-factory and monotonic; numbers are never reused.
#[derive(Debug)]
pub struct NamingThreadFactory {
    prefix: String,
    next_number: AtomicU64,
}

impl NamingThreadFactory {
    /// Create a factory producing threads under the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), next_number: AtomicU64::new(0) }
    }

    /// The stable prefix shared by all threads of this factory
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Spawn a named thread running `body`
    pub fn spawn<F>(&self, body: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let number = self.next_number.fetch_add(1, Ordering::Relaxed) + 1;
        std::thread::Builder::new().name(format!("{}-{}", self.prefix, number)).spawn(body)
    }
}

/// Cancellable handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Suppress future invocations of the task.
    ///
    /// Cooperative: a body already running is not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Handle to a one-shot task with a result
pub struct ScheduledTask<V> {
    handle: TaskHandle,
    receiver: mpsc::Receiver<V>,
}

impl<V> ScheduledTask<V> {
    /// The cancellable handle of this task
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Suppress the task if it has not started yet
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Block until the task completes and return its result.
    ///
    /// Returns `None` when the task was cancelled or the scheduler shut down
    /// before it ran.
    pub fn join(self) -> Option<V> {
        self.receiver.recv().ok()
    }

    /// Like [`join`](Self::join), but gives up after `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> Option<V> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

enum Recurrence {
    OneShot,
    /// Next run at `scheduled_start + period`; overruns shift later starts
    /// but runs never overlap
    FixedRate { period: Duration, scheduled_start: Instant },
    /// Next run at `previous_run_end + delay`
    FixedDelay { delay: Duration },
}

struct ScheduledEntry {
    run_at: Instant,
    sequence: u64,
    body: Box<dyn FnMut() + Send>,
    cancelled: Arc<AtomicBool>,
    recurrence: Recurrence,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the binary heap pops the earliest deadline first;
        // sequence breaks ties in submission order.
        other.run_at.cmp(&self.run_at).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct SchedulerCore {
    queue: Mutex<BinaryHeap<ScheduledEntry>>,
    task_available: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
    propagators: Vec<Arc<dyn ContextPropagator>>,
}

impl SchedulerCore {
    fn push(&self, entry: ScheduledEntry) {
        if self.shutdown.load(Ordering::Acquire) || entry.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
        self.task_available.notify_one();
    }
}

fn worker_loop(core: Arc<SchedulerCore>) {
    loop {
        let mut entry = {
            let mut queue = core.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                match queue.peek() {
                    None => {
                        queue = core
                            .task_available
                            .wait(queue)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(next) if next.run_at <= now => {
                        break queue.pop().expect("peeked entry must pop");
                    }
                    Some(next) => {
                        let wait = next.run_at - now;
                        let (guard, _timed_out) = core
                            .task_available
                            .wait_timeout(queue, wait)
                            .unwrap_or_else(PoisonError::into_inner);
                        queue = guard;
                    }
                }
            }
        };

        if entry.cancelled.load(Ordering::Acquire) {
            continue;
        }

        (entry.body)();

        match entry.recurrence {
            Recurrence::OneShot => {}
            Recurrence::FixedRate { period, scheduled_start } => {
                let next_start = scheduled_start + period;
                entry.run_at = next_start;
                entry.recurrence = Recurrence::FixedRate { period, scheduled_start: next_start };
                core.push(entry);
            }
            Recurrence::FixedDelay { delay } => {
                entry.run_at = Instant::now() + delay;
                core.push(entry);
            }
        }
    }
}

/// Scheduled worker pool that propagates ambient context into every task
///
/// Built via [`builder`](Self::builder). Dropping the scheduler shuts it
/// down.
pub struct ContextAwareScheduler {
    core: Arc<SchedulerCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ContextAwareScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAwareScheduler")
            .field("is_shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl ContextAwareScheduler {
    /// Create a scheduler builder
    pub fn builder() -> ContextAwareSchedulerBuilder {
        ContextAwareSchedulerBuilder::new()
    }

    /// Schedule a one-shot task after `delay`
    pub fn schedule<F>(&self, task: F, delay: Duration) -> CoreResult<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Some(task);
        let body = self.decorate(move || {
            if let Some(task) = task.take() {
                task();
            }
        });
        self.submit(Instant::now() + delay, body, Recurrence::OneShot)
    }

    /// Schedule a one-shot task after `delay` and expose its result
    pub fn schedule_fn<F, V>(&self, task: F, delay: Duration) -> CoreResult<ScheduledTask<V>>
    where
        F: FnOnce() -> V + Send + 'static,
        V: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let mut task = Some(task);
        let body = self.decorate(move || {
            if let Some(task) = task.take() {
                let _ = sender.send(task());
            }
        });
        let handle = self.submit(Instant::now() + delay, body, Recurrence::OneShot)?;
        Ok(ScheduledTask { handle, receiver })
    }

    /// Schedule a recurring task whose runs start at
    /// `initial_delay, initial_delay + period, initial_delay + 2*period, ...`
    ///
    /// An overrunning body shifts subsequent starts; runs never overlap.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> CoreResult<TaskHandle>
    where
        F: Fn() + Send + 'static,
    {
        check_period(period)?;
        let first_start = Instant::now() + initial_delay;
        let body = self.decorate(move || task());
        self.submit(first_start, body, Recurrence::FixedRate { period, scheduled_start: first_start })
    }

    /// Schedule a recurring task where each run starts `delay` after the
    /// previous run ended
    pub fn schedule_with_fixed_delay<F>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> CoreResult<TaskHandle>
    where
        F: Fn() + Send + 'static,
    {
        check_period(delay)?;
        let body = self.decorate(move || task());
        self.submit(Instant::now() + initial_delay, body, Recurrence::FixedDelay { delay })
    }

    /// Whether the scheduler has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::Acquire)
    }

    /// Complete in-flight work, release the worker threads, and reject
    /// further submissions.
    ///
    /// Queued tasks that have not started are dropped. Idempotent.
    pub fn shutdown(&self) {
        if self.core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Scheduler shutting down");
        self.core.task_available.notify_all();

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("Scheduler worker panicked before shutdown");
            }
        }
        self.core.queue.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn submit(
        &self,
        run_at: Instant,
        body: Box<dyn FnMut() + Send>,
        recurrence: Recurrence,
    ) -> CoreResult<TaskHandle> {
        if self.is_shutdown() {
            return Err(CoreError::rejected("scheduler is shut down"));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = ScheduledEntry {
            run_at,
            sequence: self.core.sequence.fetch_add(1, Ordering::Relaxed),
            body,
            cancelled: Arc::clone(&cancelled),
            recurrence,
        };
        self.core.queue.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
        self.core.task_available.notify_one();
        Ok(TaskHandle { cancelled })
    }

    /// Wrap a task body so the submitter's ambient state travels with it.
    ///
    /// The correlation map and every propagator value are captured here, on
    /// the submitting thread; recurring tasks replay the same capture on
    /// every run.
    fn decorate<F>(&self, mut body: F) -> Box<dyn FnMut() + Send>
    where
        F: FnMut() + Send + 'static,
    {
        let correlation_map = correlation::copy_of_context();
        let captured = CapturedContext::capture(&self.core.propagators);
        Box::new(move || {
            correlation::clear();
            correlation::set_context(correlation_map.clone());
            captured.apply_all();
            let _guard = RunGuard { captured: &captured };
            body();
        })
    }
}

impl Drop for ContextAwareScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RunGuard<'a> {
    captured: &'a CapturedContext,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.captured.clear_all();
        correlation::clear();
    }
}

/// Builder for [`ContextAwareScheduler`]
pub struct ContextAwareSchedulerBuilder {
    core_pool_size: usize,
    thread_name_prefix: String,
    propagators: Vec<Arc<dyn ContextPropagator>>,
}

impl Default for ContextAwareSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAwareSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            core_pool_size: 1,
            thread_name_prefix: "faultline-scheduler".to_owned(),
            propagators: Vec::new(),
        }
    }

    /// Number of worker threads; must be at least 1
    pub fn core_pool_size(mut self, core_pool_size: usize) -> Self {
        self.core_pool_size = core_pool_size;
        self
    }

    /// Prefix for worker thread names
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Add a context propagator applied to every submitted task
    pub fn propagator(mut self, propagator: Arc<dyn ContextPropagator>) -> Self {
        self.propagators.push(propagator);
        self
    }

    /// Add all propagators in `propagators`
    pub fn propagators(mut self, propagators: Vec<Arc<dyn ContextPropagator>>) -> Self {
        self.propagators.extend(propagators);
        self
    }

    /// Validate the configuration and start the worker pool
    pub fn build(self) -> CoreResult<ContextAwareScheduler> {
        if self.core_pool_size < 1 {
            return Err(CoreError::validation("core pool size must be a positive integer >= 1"));
        }

        let core = Arc::new(SchedulerCore {
            queue: Mutex::new(BinaryHeap::new()),
            task_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            propagators: self.propagators,
        });

        let factory = NamingThreadFactory::new(self.thread_name_prefix);
        let mut workers = Vec::with_capacity(self.core_pool_size);
        for _ in 0..self.core_pool_size {
            let worker_core = Arc::clone(&core);
            match factory.spawn(move || worker_loop(worker_core)) {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    // Release any workers already started before reporting.
                    core.shutdown.store(true, Ordering::Release);
                    core.task_available.notify_all();
                    return Err(CoreError::instantiation_with_source(
                        "failed to spawn scheduler worker thread",
                        Box::new(error),
                    ));
                }
            }
        }

        Ok(ContextAwareScheduler { core, workers: Mutex::new(workers) })
    }
}

fn check_period(period: Duration) -> CoreResult<()> {
    if period.is_zero() {
        return Err(CoreError::validation("period must be greater than zero"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::context::ContextValue;

    const WAIT: Duration = Duration::from_secs(5);

    fn scheduler() -> ContextAwareScheduler {
        ContextAwareScheduler::builder().build().unwrap()
    }

    #[test]
    fn test_builder_rejects_zero_pool_size() {
        let result = ContextAwareScheduler::builder().core_pool_size(0).build();
        assert!(matches!(result, Err(CoreError::Validation { .. })));
    }

    #[test]
    fn test_one_shot_runs_and_returns_result() {
        let scheduler = scheduler();
        let task = scheduler.schedule_fn(|| 21 * 2, Duration::from_millis(5)).unwrap();
        assert_eq!(task.join_timeout(WAIT), Some(42));
    }

    /// Validates the thread-naming contract: workers are named
    /// `{prefix}-{n}` with a monotonic per-factory counter.
    #[test]
    fn test_worker_threads_carry_factory_names() {
        let scheduler = ContextAwareScheduler::builder()
            .core_pool_size(2)
            .thread_name_prefix("probe-pool")
            .build()
            .unwrap();

        let task = scheduler
            .schedule_fn(|| std::thread::current().name().map(str::to_owned), Duration::ZERO)
            .unwrap();
        let name = task.join_timeout(WAIT).flatten().expect("worker threads must be named");
        assert!(name.starts_with("probe-pool-"), "unexpected worker name {name}");
    }

    #[test]
    fn test_naming_thread_factory_counter_never_reuses() {
        let factory = NamingThreadFactory::new("solo");
        let first = factory.spawn(|| {}).unwrap();
        let second = factory.spawn(|| {}).unwrap();

        assert_eq!(first.thread().name(), Some("solo-1"));
        assert_eq!(second.thread().name(), Some("solo-2"));
        first.join().unwrap();
        second.join().unwrap();
    }

    /// Validates the propagation-across-scheduling scenario: a correlation
    /// entry installed on the submitter is visible inside the task, and the
    /// worker's map is empty afterwards.
    #[test]
    fn test_correlation_context_propagates_and_clears() {
        let scheduler = scheduler();

        correlation::put("request_id", "r-42");
        let task = scheduler
            .schedule_fn(|| correlation::get("request_id"), Duration::from_millis(5))
            .unwrap();
        assert_eq!(task.join_timeout(WAIT), Some(Some("r-42".to_owned())));

        // A task submitted from a clean context must observe a clean worker.
        correlation::clear();
        let task = scheduler.schedule_fn(correlation::is_empty, Duration::from_millis(5)).unwrap();
        assert_eq!(task.join_timeout(WAIT), Some(true));
    }

    struct CountingPropagator {
        applied: Arc<AtomicUsize>,
        cleared: Arc<AtomicUsize>,
    }

    impl ContextPropagator for CountingPropagator {
        fn retrieve(&self) -> Option<ContextValue> {
            Some(Box::new(()))
        }

        fn apply(&self, _value: Option<&(dyn Any + Send)>) {
            self.applied.fetch_add(1, Ordering::SeqCst);
        }

        fn clear(&self, _value: Option<&(dyn Any + Send)>) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_propagators_wrap_every_run() {
        let applied = Arc::new(AtomicUsize::new(0));
        let cleared = Arc::new(AtomicUsize::new(0));
        let scheduler = ContextAwareScheduler::builder()
            .propagator(Arc::new(CountingPropagator {
                applied: Arc::clone(&applied),
                cleared: Arc::clone(&cleared),
            }))
            .build()
            .unwrap();

        let task = scheduler.schedule_fn(|| (), Duration::from_millis(5)).unwrap();
        task.join_timeout(WAIT).unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_run_suppresses_task() {
        let scheduler = scheduler();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        let handle = scheduler
            .schedule(move || flag.store(true, Ordering::SeqCst), Duration::from_millis(100))
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());

        std::thread::sleep(Duration::from_millis(300));
        assert!(!ran.load(Ordering::SeqCst), "cancelled task must never run");
    }

    #[test]
    fn test_fixed_rate_repeats_until_cancelled() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = scheduler
            .schedule_at_fixed_rate(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(5),
                Duration::from_millis(20),
            )
            .unwrap();

        let deadline = Instant::now() + WAIT;
        while runs.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline, "expected at least three runs");
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.cancel();

        std::thread::sleep(Duration::from_millis(100));
        let settled = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), settled, "no runs after cancellation settles");
    }

    #[test]
    fn test_fixed_delay_repeats() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = scheduler
            .schedule_with_fixed_delay(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(5),
                Duration::from_millis(15),
            )
            .unwrap();

        let deadline = Instant::now() + WAIT;
        while runs.load(Ordering::SeqCst) < 2 {
            assert!(Instant::now() < deadline, "expected at least two runs");
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.cancel();
    }

    #[test]
    fn test_recurring_period_validation() {
        let scheduler = scheduler();
        assert!(scheduler.schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::ZERO).is_err());
        assert!(scheduler.schedule_with_fixed_delay(|| {}, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn test_shutdown_rejects_new_submissions() {
        let scheduler = scheduler();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());

        let result = scheduler.schedule(|| {}, Duration::ZERO);
        assert!(matches!(result, Err(CoreError::Rejected { .. })));
    }

    #[test]
    fn test_shutdown_completes_in_flight_work() {
        let scheduler = scheduler();
        let done = Arc::new(AtomicBool::new(false));
        let (started_sender, started_receiver) = mpsc::channel();

        let flag = Arc::clone(&done);
        scheduler
            .schedule(
                move || {
                    started_sender.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                    flag.store(true, Ordering::SeqCst);
                },
                Duration::ZERO,
            )
            .unwrap();

        started_receiver.recv_timeout(WAIT).expect("task must start");
        scheduler.shutdown();
        assert!(done.load(Ordering::SeqCst), "shutdown must wait for the in-flight body");
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
    }
}
