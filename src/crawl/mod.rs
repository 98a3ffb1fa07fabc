//! Crawl module - task execution, scheduling and administration
//!
//! This module contains:
//! - The executor that runs one task against its source
//! - The polling scheduler with its per-task reentrancy guard
//! - The task service used to create and manage tasks

mod executor;
mod scheduler;
mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

pub use executor::{
    CrawlExecutor, ExecutionResult, FailureKind, ItemError, CRAWLED_GROUP_NAME, CRAWLED_GROUP_TAG,
    CRAWLED_SECTION_NAME, CRAWL_TASK_COLLECTION_TYPE,
};
pub use scheduler::{compute_next_run, CrawlScheduler, RunningGuard, RunningTasks};
pub use tasks::{NewCrawlTask, TaskService, TaskUpdate, RUN_HISTORY_LIMIT};
