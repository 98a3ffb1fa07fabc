//! Crawl task administration
//!
//! Creating, editing and toggling tasks. Definitions are validated against
//! the source registry before they are stored, so the scheduler only ever
//! sees tasks whose source exists and whose configuration was accepted.
//!
//! Edits, toggles and deletions claim the task in the scheduler's
//! running-set for their duration, which both refuses them while the task
//! executes and keeps the scheduler from dispatching a half-edited task.

use crate::crawl::scheduler::{compute_next_run, RunningGuard, RunningTasks};
use crate::sources::{SourceMeta, SourceRegistry};
use crate::state::{DuplicateStrategy, ScheduleType};
use crate::storage::{
    lock_store, CollectionStore, CrawlTarget, CrawlTask, CrawlTaskRun, SharedStore, TaskStore,
};
use crate::{ConfigError, CrawlError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Number of runs returned by [`TaskService::list_runs`]
pub const RUN_HISTORY_LIMIT: usize = 50;

/// Definition of a task to create
#[derive(Debug, Clone)]
pub struct NewCrawlTask {
    pub user_id: String,
    pub name: String,
    pub source_type: String,
    pub source_config: Value,
    pub schedule_type: ScheduleType,
    pub target: CrawlTarget,
    pub duplicate_strategy: DuplicateStrategy,
}

/// Changes to an existing task; `None` leaves a field as is
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub source_config: Option<Value>,
    pub schedule_type: Option<ScheduleType>,
    pub target: Option<CrawlTarget>,
    pub duplicate_strategy: Option<DuplicateStrategy>,
}

/// First scheduled run of a freshly created or re-enabled task
fn initial_next_run(schedule: ScheduleType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if schedule.is_once() {
        Some(now)
    } else {
        compute_next_run(schedule, now)
    }
}

/// Administrative operations on crawl tasks
pub struct TaskService {
    store: SharedStore,
    registry: SourceRegistry,
    running: RunningTasks,
}

impl TaskService {
    /// Creates the service
    ///
    /// `running` must be the scheduler's running-set.
    pub fn new(store: SharedStore, registry: SourceRegistry, running: RunningTasks) -> Self {
        Self {
            store,
            registry,
            running,
        }
    }

    pub fn list_sources(&self) -> Vec<SourceMeta> {
        self.registry.list()
    }

    /// Validates and stores a new, enabled task
    ///
    /// One-off tasks are due immediately; recurring tasks first run one
    /// period from `now`.
    pub fn create_task(&self, new: NewCrawlTask, now: DateTime<Utc>) -> Result<CrawlTask> {
        check_name(&new.name)?;
        let source_config =
            self.validate_source(&new.source_type, &new.source_config, new.schedule_type)?;
        self.validate_target(&new.target)?;

        let task = CrawlTask {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            name: new.name.trim().to_string(),
            source_type: new.source_type,
            source_config,
            schedule_type: new.schedule_type,
            target: new.target,
            duplicate_strategy: new.duplicate_strategy,
            is_enabled: true,
            last_run_at: None,
            last_run_status: None,
            last_run_result: None,
            next_run_at: initial_next_run(new.schedule_type, now),
            created_at: now,
            updated_at: now,
        };

        lock_store(&self.store)?.insert_task(&task)?;
        tracing::info!(
            "Created crawl task {} ({}) for user {}",
            task.name,
            task.id,
            task.user_id
        );
        Ok(task)
    }

    /// Applies changes to a task
    ///
    /// The source configuration and schedule are always revalidated; the
    /// target only when it changes. A schedule change reschedules the task.
    pub fn update_task(
        &self,
        task_id: &str,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<CrawlTask> {
        let _claim = self.claim(task_id)?;
        let mut task = self.get_task(task_id)?;

        if let Some(name) = update.name {
            check_name(&name)?;
            task.name = name.trim().to_string();
        }
        if let Some(strategy) = update.duplicate_strategy {
            task.duplicate_strategy = strategy;
        }
        if let Some(target) = update.target {
            self.validate_target(&target)?;
            task.target = target;
        }

        let raw_config = update
            .source_config
            .unwrap_or_else(|| task.source_config.clone());
        let schedule = update.schedule_type.unwrap_or(task.schedule_type);
        task.source_config = self.validate_source(&task.source_type, &raw_config, schedule)?;

        if update.schedule_type.is_some() {
            task.schedule_type = schedule;
            task.next_run_at = initial_next_run(schedule, now);
        }
        task.updated_at = now;

        lock_store(&self.store)?.update_task(&task)?;
        tracing::info!("Updated crawl task {} ({})", task.name, task.id);
        Ok(task)
    }

    /// Enables a task, scheduling it if its next run is missing or past
    ///
    /// A one-off task is scheduled to run immediately.
    pub fn enable_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<CrawlTask> {
        let _claim = self.claim(task_id)?;
        let mut task = self.get_task(task_id)?;
        task.is_enabled = true;

        if task.schedule_type.is_once() {
            task.next_run_at = Some(now);
        } else if task.next_run_at.map_or(true, |next| next < now) {
            task.next_run_at = compute_next_run(task.schedule_type, now);
        }
        task.updated_at = now;

        lock_store(&self.store)?.update_task(&task)?;
        tracing::info!("Enabled crawl task {} ({})", task.name, task.id);
        Ok(task)
    }

    /// Disables a task; its schedule is kept
    pub fn disable_task(&self, task_id: &str) -> Result<CrawlTask> {
        let _claim = self.claim(task_id)?;
        let mut task = self.get_task(task_id)?;
        task.is_enabled = false;
        task.updated_at = Utc::now();

        lock_store(&self.store)?.update_task(&task)?;
        tracing::info!("Disabled crawl task {} ({})", task.name, task.id);
        Ok(task)
    }

    /// Deletes a task and its run history
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let _claim = self.claim(task_id)?;
        self.get_task(task_id)?;

        lock_store(&self.store)?.delete_task(task_id)?;
        tracing::info!("Deleted crawl task {}", task_id);
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<CrawlTask> {
        lock_store(&self.store)?
            .get_task(task_id)?
            .ok_or_else(|| CrawlError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks of one user, or of everyone, newest first
    pub fn list_tasks(&self, user_id: Option<&str>) -> Result<Vec<CrawlTask>> {
        Ok(lock_store(&self.store)?.list_tasks(user_id)?)
    }

    /// The most recent runs of a task, newest first
    pub fn list_runs(&self, task_id: &str) -> Result<Vec<CrawlTaskRun>> {
        let store = lock_store(&self.store)?;
        if store.get_task(task_id)?.is_none() {
            return Err(CrawlError::TaskNotFound(task_id.to_string()));
        }
        Ok(store.list_runs(task_id, RUN_HISTORY_LIMIT)?)
    }

    /// Holds the task in the running-set, or fails if it is executing
    fn claim(&self, task_id: &str) -> Result<RunningGuard> {
        self.running
            .try_claim(task_id)
            .ok_or_else(|| CrawlError::TaskBusy(task_id.to_string()))
    }

    /// Checks the source, its configuration and the schedule
    ///
    /// Returns the normalized configuration.
    fn validate_source(
        &self,
        source_type: &str,
        raw_config: &Value,
        schedule: ScheduleType,
    ) -> Result<Value> {
        let source = self.registry.get(source_type)?;
        let config = source.validate_config(raw_config)?;

        if !source.meta().supports_schedule(schedule) {
            return Err(ConfigError::UnsupportedSchedule {
                source_type: source_type.to_string(),
                schedule: schedule.to_string(),
            }
            .into());
        }

        Ok(config.into_value())
    }

    fn validate_target(&self, target: &CrawlTarget) -> Result<()> {
        match target {
            CrawlTarget::Append { collection_id } => {
                if collection_id.trim().is_empty() {
                    return Err(
                        ConfigError::MissingField("target_collection_id".to_string()).into(),
                    );
                }
                if lock_store(&self.store)?
                    .get_collection(collection_id)?
                    .is_none()
                {
                    return Err(CrawlError::CollectionNotFound(collection_id.clone()));
                }
            }
            CrawlTarget::CreateNew { prefix } => {
                if prefix.trim().is_empty() {
                    return Err(
                        ConfigError::MissingField("new_collection_prefix".to_string()).into(),
                    );
                }
            }
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            key: "name".to_string(),
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}
