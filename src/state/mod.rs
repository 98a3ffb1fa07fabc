//! State module for crawl tasks, runs and papers
//!
//! This module provides the enumerations persisted alongside crawl tasks and
//! their runs, together with the recurrence rule used by the scheduler.
//!
//! # Components
//!
//! - `ScheduleType`: how often a task recurs, and when it runs next
//! - `TargetMode` / `DuplicateStrategy`: where fetched papers go and how duplicates are treated
//! - `RunStatus`: lifecycle of a single execution
//! - `PaperStatus`: accessibility derived from a paper's URLs

mod run_state;
mod task_state;

// Re-export main types
pub use run_state::{PaperStatus, RunStatus};
pub use task_state::{DuplicateStrategy, ScheduleType, TargetMode};
