//! # Task Worker Pool
//!
//! Receives task ids from a bounded queue and drives each task's steps to a
//! halt with bounded parallelism. A task id is owned by at most one run at a
//! time; an enqueue that arrives while the task is running schedules one more
//! pass instead of a second concurrent run.
//!
//! A run that parks behind a `RUNNING` step it does not own (left by a
//! crashed process, or still held by another one) queues the task again
//! once that step's lease can be reclaimed.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{StepExecutor, StepOutcome};
use super::state::TaskStateController;
use crate::config::WorkerConfig;
use crate::context::OpContext;
use crate::state_machine::StepStatus;

/// Added to a lease expiry so the recheck lands after it
const LEASE_RECHECK_SLACK: Duration = Duration::from_millis(250);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("worker queue is closed")]
    QueueClosed,
}

/// Why a run over a task stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Task reached a terminal status
    Finished,
    /// A step failed and halted the task
    Halted(String),
    /// Another executor owns the current step, or it is waiting on its lease
    Parked,
    /// The pool is shutting down; the task resumes on the next start
    Interrupted,
}

/// Shared state of one pool, cloned into every spawned run
#[derive(Clone)]
struct PoolShared {
    executor: StepExecutor,
    controller: TaskStateController,
    /// Task id to "run again when done"
    in_flight: Arc<DashMap<String, bool>>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    /// Weak so a dropped pool still closes the queue
    requeue: mpsc::WeakSender<String>,
}

pub struct TaskWorkerPool {
    sender: mpsc::Sender<String>,
    shared: PoolShared,
    max_concurrent: usize,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorkerPool")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.shared.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl TaskWorkerPool {
    /// Spawn the dispatcher; must be called inside a tokio runtime
    pub fn start(
        executor: StepExecutor,
        controller: TaskStateController,
        config: &WorkerConfig,
    ) -> Self {
        let max_concurrent = config.max_concurrent_tasks.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shared = PoolShared {
            executor,
            controller,
            in_flight: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            shutdown: CancellationToken::new(),
            requeue: sender.downgrade(),
        };

        let dispatcher = tokio::spawn(Self::run(shared.clone(), receiver));
        info!(max_concurrent, "🏊 POOL: task worker pool started");

        Self {
            sender,
            shared,
            max_concurrent,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a task for execution; waits while the queue is full
    pub async fn enqueue(&self, task_id: impl Into<String>) -> Result<(), WorkerError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(WorkerError::ShuttingDown);
        }
        self.sender
            .send(task_id.into())
            .await
            .map_err(|_| WorkerError::QueueClosed)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.shared.in_flight.contains_key(task_id)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Stop accepting work, cancel running steps and wait for runs to drain
    ///
    /// Returns `false` when runs were still active at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("🏊 POOL: shutting down");
        self.shared.shutdown.cancel();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher ended abnormally");
            }
        }

        let permits = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(timeout, self.shared.semaphore.acquire_many(permits))
            .await
            .map(|acquired| acquired.is_ok())
            .unwrap_or(false);

        if drained {
            info!("🏊 POOL: all runs drained");
        } else {
            warn!(
                in_flight = self.shared.in_flight.len(),
                "🏊 POOL: shutdown deadline reached with runs still active"
            );
        }
        drained
    }

    async fn run(shared: PoolShared, mut receiver: mpsc::Receiver<String>) {
        loop {
            let task_id = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(task_id) => task_id,
                    None => break,
                },
            };

            match shared.in_flight.entry(task_id.clone()) {
                Entry::Occupied(mut entry) => {
                    debug!(task_id = %task_id, "Task already running, scheduling another pass");
                    *entry.get_mut() = true;
                    continue;
                }
                Entry::Vacant(entry) => {
                    entry.insert(false);
                }
            }

            let shared = shared.clone();
            tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = shared.semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            error!(task_id = %task_id, "Semaphore closed, task left for recovery");
                            shared.in_flight.remove(&task_id);
                            return;
                        }
                    },
                    _ = shared.shutdown.cancelled() => {
                        shared.in_flight.remove(&task_id);
                        return;
                    }
                };

                loop {
                    let exit = AssertUnwindSafe(shared.drive(&task_id)).catch_unwind().await;
                    match exit {
                        Ok(RunExit::Parked) => {
                            debug!(task_id = %task_id, "Run parked");
                            shared.schedule_lease_recheck(&task_id).await;
                        }
                        Ok(exit) => debug!(task_id = %task_id, exit = ?exit, "Run ended"),
                        Err(_) => error!(task_id = %task_id, "Run panicked, task left for recovery"),
                    }

                    // Another enqueue arrived mid-run: go again, else release the id
                    if shared.in_flight.remove_if(&task_id, |_, again| !*again).is_some() {
                        break;
                    }
                    if let Some(mut again) = shared.in_flight.get_mut(&task_id) {
                        *again = false;
                    }
                    if shared.shutdown.is_cancelled() {
                        shared.in_flight.remove(&task_id);
                        break;
                    }
                }

                drop(permit);
            });
        }

        info!("🏊 POOL: dispatcher stopped");
    }
}

impl PoolShared {
    /// Queue the task again when its running step's lease has expired
    ///
    /// No-op unless the current step is `RUNNING`; a task parked for any
    /// other reason waits for the next enqueue.
    async fn schedule_lease_recheck(&self, task_id: &str) {
        let task = match self.controller.load(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Cannot schedule lease recheck");
                return;
            }
        };
        let Some(step) = task
            .step(&task.current_step)
            .filter(|step| step.status == StepStatus::Running)
        else {
            return;
        };

        let lease = self.controller.stale_step_lease();
        let until_expiry = step
            .start
            .zip(chrono::Duration::from_std(lease).ok())
            .and_then(|(started, lease)| started.checked_add_signed(lease))
            .map(|expires| (expires - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(lease);
        let delay = until_expiry + LEASE_RECHECK_SLACK;
        debug!(
            task_id = %task_id,
            step_name = %step.name,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Rechecking task when the step lease expires"
        );

        let requeue = self.requeue.clone();
        let shutdown = self.shutdown.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let Some(sender) = requeue.upgrade() else {
                        debug!(task_id = %task_id, "Pool dropped before lease recheck");
                        return;
                    };
                    if sender.send(task_id.clone()).await.is_err() {
                        debug!(task_id = %task_id, "Queue closed before lease recheck");
                    }
                }
            }
        });
    }

    /// Execute the task's steps in order until it stops making progress
    async fn drive(&self, task_id: &str) -> RunExit {
        let ctx = OpContext::from_token(self.shutdown.child_token());

        loop {
            if ctx.err().is_some() {
                return RunExit::Interrupted;
            }

            let task = match self.controller.load(task_id).await {
                Ok(task) => task,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Failed to load task");
                    return RunExit::Parked;
                }
            };

            if task.force_terminate {
                if let Err(e) = self.controller.halt_if_terminated(task_id).await {
                    warn!(task_id = %task_id, error = %e, "Failed to halt terminated task");
                }
                return RunExit::Halted("task force terminated".to_string());
            }
            if !task.status.is_runnable() {
                return RunExit::Finished;
            }

            let step_name = task.current_step.clone();
            match self.executor.execute_step(task_id, &step_name, &ctx).await {
                Ok(StepOutcome::Succeeded) => continue,
                Ok(StepOutcome::Failed(message)) => return RunExit::Halted(message),
                Ok(StepOutcome::InProgressElsewhere) => return RunExit::Parked,
                Ok(StepOutcome::Skipped) => {
                    // Progress happened elsewhere only if the current step moved
                    match self.controller.load(task_id).await {
                        Ok(reloaded)
                            if reloaded.current_step != step_name
                                && reloaded.status.is_runnable() =>
                        {
                            continue
                        }
                        Ok(reloaded) if reloaded.status.is_terminal() => return RunExit::Finished,
                        _ => return RunExit::Parked,
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(task_id = %task_id, error = %e, "Task cannot make progress");
                    if let Err(abort_err) = self.controller.abort_task(task_id, &e.to_string()).await {
                        warn!(task_id = %task_id, error = %abort_err, "Failed to abort task");
                    }
                    return RunExit::Halted(e.to_string());
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Step execution errored");
                    return RunExit::Parked;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;
    use crate::events::EventPublisher;
    use crate::models::task::test_support::task_with_steps;
    use crate::models::Task;
    use crate::state_machine::TaskStatus;
    use crate::store::{InMemoryStore, TaskStore};
    use crate::task::error::StepError;
    use crate::task::registry::{FnStep, StepInvocation, StepRegistry};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool_with_counter(store: Arc<InMemoryStore>) -> (TaskWorkerPool, Arc<AtomicUsize>) {
        pool_with_state_config(store, StateConfig::default())
    }

    /// Pool whose "noop" method completes the step it is handed
    fn pool_with_state_config(
        store: Arc<InMemoryStore>,
        state: StateConfig,
    ) -> (TaskWorkerPool, Arc<AtomicUsize>) {
        let controller = TaskStateController::new(store, EventPublisher::default(), state);
        let calls = Arc::new(AtomicUsize::new(0));

        let step_controller = controller.clone();
        let counter = calls.clone();
        let func = Arc::new(FnStep(move |inv: StepInvocation| {
            let controller = step_controller.clone();
            let counter = counter.clone();
            async move {
                let Some((mut state, _)) = controller
                    .get_task_state_and_current_step(&inv.task_id, &inv.step_name)
                    .await?
                else {
                    return Ok::<(), StepError>(());
                };
                counter.fetch_add(1, Ordering::SeqCst);
                state.update_step_succ(Utc::now(), &inv.step_name).await?;
                Ok(())
            }
        }));

        let mut registry = StepRegistry::new();
        registry.register("noop", func).unwrap();
        let executor = StepExecutor::new(
            Arc::new(registry),
            controller.clone(),
            Duration::from_secs(5),
        );
        let pool = TaskWorkerPool::start(executor, controller, &WorkerConfig::default());
        (pool, calls)
    }

    async fn wait_for_status(store: &InMemoryStore, task_id: &str, status: TaskStatus) -> Task {
        for _ in 0..500 {
            let task = store.get_task(task_id).await.unwrap().value;
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {status}");
    }

    #[tokio::test]
    async fn test_pool_drives_task_to_success() {
        let store = Arc::new(InMemoryStore::new());
        let task = task_with_steps(&["a", "b", "c"]);
        store.create_task(&task).await.unwrap();
        let (pool, calls) = pool_with_counter(store.clone());

        pool.enqueue(task.task_id.clone()).await.unwrap();
        let done = wait_for_status(&store, &task.task_id, TaskStatus::Success).await;
        assert_eq!(done.current_step, "c");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_runs_each_step_once() {
        let store = Arc::new(InMemoryStore::new());
        let task = task_with_steps(&["a", "b"]);
        store.create_task(&task).await.unwrap();
        let (pool, calls) = pool_with_counter(store.clone());

        for _ in 0..5 {
            pool.enqueue(task.task_id.clone()).await.unwrap();
        }
        wait_for_status(&store, &task.task_id, TaskStatus::Success).await;
        pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_method_fails_task() {
        let store = Arc::new(InMemoryStore::new());
        let mut task = task_with_steps(&["a"]);
        task.step_mut("a").unwrap().step_method = "missing".to_string();
        store.create_task(&task).await.unwrap();
        let (pool, calls) = pool_with_counter(store.clone());

        pool.enqueue(task.task_id.clone()).await.unwrap();
        let failed = wait_for_status(&store, &task.task_id, TaskStatus::Failure).await;
        assert!(failed.message.contains("not registered"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_step_left_running_by_dead_process_resumes_after_lease() {
        let store = Arc::new(InMemoryStore::new());
        let mut task = task_with_steps(&["a", "b"]);
        task.status = TaskStatus::Running;
        let orphan = task.step_mut("a").unwrap();
        orphan.status = crate::state_machine::StepStatus::Running;
        orphan.start = Some(Utc::now());
        orphan.retry = 1;
        store.create_task(&task).await.unwrap();

        let state = StateConfig {
            stale_step_lease_seconds: 1,
            ..StateConfig::default()
        };
        let (pool, calls) = pool_with_state_config(store.clone(), state);

        // Queued once, the way restart recovery does
        pool.enqueue(task.task_id.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!pool.is_running(&task.task_id));

        let done = wait_for_status(&store, &task.task_id, TaskStatus::Success).await;
        assert_eq!(done.step("a").unwrap().retry, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let (pool, _) = pool_with_counter(store);
        pool.shutdown(Duration::from_millis(100)).await;
        assert_eq!(
            pool.enqueue("task-1").await,
            Err(WorkerError::ShuttingDown)
        );
    }
}
