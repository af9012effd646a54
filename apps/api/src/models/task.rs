use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::errors::AppError;

/// Scrape lifecycle state of one tracked identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "unknown task state '{other}'"
            ))),
        }
    }
}

/// Events accepted by the task status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    Dispatch,
    Succeed,
    Fail,
    Timeout,
    AgeOut,
    Retry,
    /// Operator action: the only path that clears the retry counter.
    Reinstate,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskEvent::Dispatch => "dispatch",
            TaskEvent::Succeed => "succeed",
            TaskEvent::Fail => "fail",
            TaskEvent::Timeout => "timeout",
            TaskEvent::AgeOut => "age_out",
            TaskEvent::Retry => "retry",
            TaskEvent::Reinstate => "reinstate",
        };
        f.write_str(s)
    }
}

/// The live task status record for one identifier.
///
/// `version` increases by one on every transition and is the compare-and-swap
/// token for conditional writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub identifier: String,
    pub state: TaskState,
    pub entered_at: DateTime<Utc>,
    pub retry_count: i32,
    pub version: i64,
    /// Scraper run that owns the current dispatch. Cleared on `dispatch`,
    /// recorded once the run is launched.
    pub run_id: Option<String>,
}

impl TaskStatus {
    pub fn new_pending(identifier: &str, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: TaskState::Pending,
            entered_at: now,
            retry_count: 0,
            version: 0,
            run_id: None,
        }
    }

    /// Whether a delivery from `run_id` may settle this task: it must be
    /// running, and owned by that run or not yet assigned to any.
    pub fn accepts_run(&self, run_id: &str) -> bool {
        self.state == TaskState::Running
            && self.run_id.as_deref().map_or(true, |owner| owner == run_id)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskStatusRow {
    pub identifier: String,
    pub state: String,
    pub entered_at: DateTime<Utc>,
    pub retry_count: i32,
    pub version: i64,
    pub run_id: Option<String>,
}

impl TryFrom<TaskStatusRow> for TaskStatus {
    type Error = AppError;

    fn try_from(row: TaskStatusRow) -> Result<Self, Self::Error> {
        Ok(TaskStatus {
            state: row.state.parse()?,
            identifier: row.identifier,
            entered_at: row.entered_at,
            retry_count: row.retry_count,
            version: row.version,
            run_id: row.run_id,
        })
    }
}
