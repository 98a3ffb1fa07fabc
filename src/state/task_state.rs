//! Task-level state definitions: recurrence, target mode and duplicate handling

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a crawl task recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Runs a single time, then the task is disabled
    Once,
    Daily,
    Weekly,
    /// Fixed 30-day interval, not calendar-month aware
    Monthly,
}

impl ScheduleType {
    /// Computes the next run time from the start time of an execution
    ///
    /// Returns `None` for `Once`: the task is not scheduled again.
    ///
    /// `Monthly` is a fixed offset of 30 days. This is a known simplification
    /// and is kept so that scheduling stays predictable across months.
    pub fn next_run_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once => None,
            Self::Daily => Some(from + Duration::days(1)),
            Self::Weekly => Some(from + Duration::days(7)),
            Self::Monthly => Some(from + Duration::days(30)),
        }
    }

    /// Returns true if the task should run only once
    pub fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Where a task writes the papers it fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Append into one existing collection
    Append,
    /// Create a fresh collection on every run
    CreateNew,
}

impl TargetMode {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::CreateNew => "create_new",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "append" => Some(Self::Append),
            "create_new" => Some(Self::CreateNew),
            _ => None,
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// What to do when a fetched paper matches an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    #[default]
    Skip,
    /// Overwrite the existing paper with every non-null fetched field
    Update,
    KeepExisting,
    UseNew,
}

impl DuplicateStrategy {
    /// Returns true if a matched paper should be overwritten
    ///
    /// Only `Update` writes; every other strategy leaves the existing
    /// paper untouched and counts the item as skipped.
    pub fn overwrites(&self) -> bool {
        matches!(self, Self::Update)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Update => "update",
            Self::KeepExisting => "keep_existing",
            Self::UseNew => "use_new",
        }
    }

    /// Parses a stored strategy; unknown values fall back to `Skip`
    pub fn from_db_string(s: &str) -> Self {
        match s {
            "update" => Self::Update,
            "keep_existing" => Self::KeepExisting,
            "use_new" => Self::UseNew,
            _ => Self::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 6, 30, 0).unwrap()
    }

    #[test]
    fn test_once_has_no_next_run() {
        assert_eq!(ScheduleType::Once.next_run_after(start()), None);
    }

    #[test]
    fn test_fixed_offsets() {
        let from = start();
        assert_eq!(
            ScheduleType::Daily.next_run_after(from),
            Some(from + Duration::days(1))
        );
        assert_eq!(
            ScheduleType::Weekly.next_run_after(from),
            Some(from + Duration::days(7))
        );
    }

    #[test]
    fn test_monthly_is_thirty_days_not_calendar_month() {
        let next = ScheduleType::Monthly.next_run_after(start()).unwrap();
        // Jan 31 + 30 days lands on Mar 1 in a leap year, not Feb 29
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_schedule_roundtrip() {
        for schedule in &[
            ScheduleType::Once,
            ScheduleType::Daily,
            ScheduleType::Weekly,
            ScheduleType::Monthly,
        ] {
            let parsed = ScheduleType::from_db_string(schedule.to_db_string());
            assert_eq!(Some(*schedule), parsed);
        }
        assert_eq!(ScheduleType::from_db_string("hourly"), None);
    }

    #[test]
    fn test_target_mode_roundtrip() {
        assert_eq!(
            TargetMode::from_db_string(TargetMode::CreateNew.to_db_string()),
            Some(TargetMode::CreateNew)
        );
        assert_eq!(TargetMode::from_db_string("merge"), None);
    }

    #[test]
    fn test_only_update_overwrites() {
        assert!(DuplicateStrategy::Update.overwrites());
        assert!(!DuplicateStrategy::Skip.overwrites());
        assert!(!DuplicateStrategy::KeepExisting.overwrites());
        assert!(!DuplicateStrategy::UseNew.overwrites());
    }

    #[test]
    fn test_unknown_strategy_is_skip() {
        assert_eq!(
            DuplicateStrategy::from_db_string("merge"),
            DuplicateStrategy::Skip
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&TargetMode::CreateNew).unwrap();
        assert_eq!(json, "\"create_new\"");
        let parsed: DuplicateStrategy = serde_json::from_str("\"keep_existing\"").unwrap();
        assert_eq!(parsed, DuplicateStrategy::KeepExisting);
    }
}
