//! Crawl scheduler - polling loop, reentrancy guard and run bookkeeping
//!
//! The scheduler wakes up on a fixed interval, runs every enabled task whose
//! `next_run_at` has passed, and records each execution as a run. Due tasks
//! run serially within a sweep.
//!
//! A task is never executed twice at the same time in this process: every
//! dispatch, whether from the sweep or a manual trigger, must first claim the
//! task in the shared [`RunningTasks`] set.

use crate::crawl::executor::{CrawlExecutor, ExecutionResult, FailureKind};
use crate::state::ScheduleType;
use crate::storage::{
    in_transaction, lock_store, CrawlTask, SharedStore, StorageResult, TaskOutcome, TaskStore,
};
use crate::{CrawlError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Computes when a task runs next, measured from an execution's start
///
/// Returns `None` for one-off tasks.
pub fn compute_next_run(schedule: ScheduleType, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.next_run_after(from)
}

/// IDs of the tasks currently executing in this process
#[derive(Debug, Clone, Default)]
pub struct RunningTasks {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a task for execution
    ///
    /// Returns `None` if the task is already running. The claim is released
    /// when the returned guard is dropped.
    pub fn try_claim(&self, task_id: &str) -> Option<RunningGuard> {
        if !self.lock().insert(task_id.to_string()) {
            return None;
        }
        Some(RunningGuard {
            running: self.clone(),
            task_id: task_id.to_string(),
        })
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The set stays consistent even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A claimed task; dropping it marks the task idle again
#[derive(Debug)]
pub struct RunningGuard {
    running: RunningTasks,
    task_id: String,
}

impl RunningGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.task_id);
    }
}

/// State shared between the polling loop and manual triggers
struct SchedulerCore {
    store: SharedStore,
    executor: CrawlExecutor,
    running: RunningTasks,
}

impl SchedulerCore {
    fn load_task(&self, task_id: &str) -> Result<CrawlTask> {
        let store = lock_store(&self.store)?;
        store
            .get_task(task_id)?
            .ok_or_else(|| CrawlError::TaskNotFound(task_id.to_string()))
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> StorageResult<Vec<CrawlTask>> {
        lock_store(&self.store)?.due_tasks(now)
    }

    /// Current state of a claimed task, if it is still enabled and due
    fn reload_if_due(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<CrawlTask>> {
        let task = lock_store(&self.store)?.get_task(task_id)?;
        Ok(task.filter(|t| t.is_enabled && t.next_run_at.is_some_and(|next| next <= now)))
    }

    fn begin_run(&self, task: &CrawlTask, started_at: DateTime<Utc>) -> StorageResult<String> {
        lock_store(&self.store)?.create_run(&task.id, started_at)
    }

    /// Finalizes the run and updates the task in one transaction
    ///
    /// When the append target was deleted the executor has already disabled
    /// the task, so only the run is finalized. One-off tasks still get their
    /// schedule cleared.
    fn finish_run(
        &self,
        task: &CrawlTask,
        run_id: &str,
        started_at: DateTime<Utc>,
        result: &ExecutionResult,
    ) -> StorageResult<()> {
        let status = result.status();
        let json = result.to_json();
        let update_task = !result.is_target_deleted() || task.schedule_type.is_once();

        let mut store = lock_store(&self.store)?;
        in_transaction(&mut *store, |s| {
            s.finish_run(
                run_id,
                status,
                &json,
                result.collection_id.as_deref(),
                Utc::now(),
            )?;

            if update_task {
                s.record_task_outcome(
                    &task.id,
                    &TaskOutcome {
                        last_run_at: started_at,
                        status,
                        result: json.clone(),
                        next_run_at: compute_next_run(task.schedule_type, started_at),
                        disable: task.schedule_type.is_once(),
                    },
                )?;
            }
            Ok(())
        })
    }

    /// Executes a claimed task and records the run
    async fn run(&self, task: CrawlTask, _claim: RunningGuard) -> Result<ExecutionResult> {
        tracing::info!("Executing crawl task: {} ({})", task.name, task.id);
        let started_at = Utc::now();
        let run_id = self.begin_run(&task, started_at)?;

        let result = match self.executor.execute_at(&task, started_at).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Crawl task {} failed: {}", task.name, e);
                ExecutionResult::failed(FailureKind::ExecutionFailed, e.to_string())
            }
        };

        self.finish_run(&task, &run_id, started_at, &result)?;
        tracing::info!(
            "Crawl task {} finished with status {} (run {})",
            task.name,
            result.status(),
            run_id
        );
        Ok(result)
    }

    /// Runs every due task, one after another
    ///
    /// Each task is re-read once claimed, since it may have been edited,
    /// disabled or run manually while earlier tasks of the sweep executed.
    /// Stops early, between tasks, once shutdown is requested.
    async fn sweep(&self, shutdown: &CancellationToken) -> Result<usize> {
        let due = self.due_tasks(Utc::now())?;
        if due.is_empty() {
            tracing::debug!("No crawl tasks due");
            return Ok(0);
        }
        tracing::info!("{} crawl tasks due", due.len());

        let mut executed = 0;
        for task in due {
            if shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, ending sweep early");
                break;
            }

            let Some(claim) = self.running.try_claim(&task.id) else {
                tracing::warn!("Task {} ({}) already running, skipping", task.name, task.id);
                continue;
            };

            let task = match self.reload_if_due(&task.id, Utc::now()) {
                Ok(Some(current)) => current,
                Ok(None) => {
                    tracing::debug!("Task {} ({}) no longer due, skipping", task.name, task.id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to reload task {}: {}", task.id, e);
                    continue;
                }
            };

            let task_id = task.id.clone();
            match self.run(task, claim).await {
                Ok(_) => executed += 1,
                Err(e) => tracing::error!("Failed to record run of task {}: {}", task_id, e),
            }
        }

        Ok(executed)
    }
}

/// Background scheduler for crawl tasks
pub struct CrawlScheduler {
    core: Arc<SchedulerCore>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CrawlScheduler {
    /// Creates a stopped scheduler
    ///
    /// # Arguments
    ///
    /// * `store` - Storage shared with the executor and task administration
    /// * `executor` - Executes individual tasks
    /// * `poll_interval` - Time between sweeps for due tasks
    pub fn new(store: SharedStore, executor: CrawlExecutor, poll_interval: Duration) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                store,
                executor,
                running: RunningTasks::new(),
            }),
            poll_interval,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// The running-set, for components that must respect the same guard
    pub fn running_tasks(&self) -> RunningTasks {
        self.core.running.clone()
    }

    pub fn executor(&self) -> &CrawlExecutor {
        &self.core.executor
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Starts the polling loop on the current tokio runtime
    ///
    /// The first sweep happens immediately.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("Crawl scheduler already started");
            return;
        }

        self.shutdown = CancellationToken::new();
        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;

        self.handle = Some(tokio::spawn(run_loop(core, poll_interval, shutdown)));
        tracing::info!("CrawlScheduler started");
    }

    /// Stops the polling loop and waits for it to exit
    ///
    /// A task already executing is allowed to finish.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Crawl scheduler loop terminated abnormally: {}", e);
            }
        }
        tracing::info!("CrawlScheduler stopped");
    }

    /// Runs a task immediately and waits for it to finish
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The task ran (its run record holds the outcome)
    /// * `Ok(false)` - The task is already running; nothing was done
    /// * `Err(CrawlError::TaskNotFound)` - No such task
    pub async fn run_task_now(&self, task_id: &str) -> Result<bool> {
        let Some(claim) = self.core.running.try_claim(task_id) else {
            tracing::warn!("Task {} is already running, skipping", task_id);
            return Ok(false);
        };

        let task = self.core.load_task(task_id)?;
        self.core.run(task, claim).await?;
        Ok(true)
    }

    /// Dispatches a task in the background and returns without waiting
    ///
    /// Same return values as [`run_task_now`](Self::run_task_now).
    pub fn spawn_task_now(&self, task_id: &str) -> Result<bool> {
        let Some(claim) = self.core.running.try_claim(task_id) else {
            tracing::warn!("Task {} is already running, skipping", task_id);
            return Ok(false);
        };

        let task = self.core.load_task(task_id)?;
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            let task_id = task.id.clone();
            if let Err(e) = core.run(task, claim).await {
                tracing::error!("Crawl task {} failed: {}", task_id, e);
            }
        });
        Ok(true)
    }

    /// Runs a single sweep of due tasks outside the polling loop
    ///
    /// Returns the number of tasks executed.
    pub async fn run_due_tasks(&self) -> Result<usize> {
        self.core.sweep(&self.shutdown).await
    }

    pub fn is_task_running(&self, task_id: &str) -> bool {
        self.core.running.contains(task_id)
    }
}

async fn run_loop(core: Arc<SchedulerCore>, poll_interval: Duration, shutdown: CancellationToken) {
    tracing::debug!("Polling for due crawl tasks every {:?}", poll_interval);

    loop {
        if let Err(e) = core.sweep(&shutdown).await {
            tracing::error!("Scheduler error: {}", e);
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
