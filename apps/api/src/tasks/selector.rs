//! Work selection: which identifiers are due for a scrape right now.
//!
//! Selection is read-only. It never transitions a task; the scheduler claims
//! each returned identifier through the registry afterwards.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::errors::AppError;
use crate::models::task::{TaskState, TaskStatus};
use crate::store::TaskStore;

/// Eligibility thresholds for the four scrape-due conditions.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    /// How long a completed task rests before its daily rescrape.
    pub rescrape_after: Duration,
    /// How long a running task may go without a result before it is treated
    /// as abandoned by its worker.
    pub running_timeout: Duration,
    /// Failed tasks are retried while `retry_count` is below this bound.
    pub max_retries: i32,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            rescrape_after: Duration::days(1),
            running_timeout: Duration::minutes(5),
            max_retries: 3,
        }
    }
}

impl EligibilityPolicy {
    pub fn is_eligible(&self, task: &TaskStatus, now: DateTime<Utc>) -> bool {
        match task.state {
            TaskState::Pending => true,
            TaskState::Completed => task.entered_at <= self.completed_cutoff(now),
            TaskState::Running => self.is_stale(task, now),
            TaskState::Failed => task.retry_count < self.max_retries,
        }
    }

    pub fn is_stale(&self, task: &TaskStatus, now: DateTime<Utc>) -> bool {
        task.state == TaskState::Running && task.entered_at <= self.running_cutoff(now)
    }

    /// Completed tasks that entered their state at or before this instant are due.
    pub fn completed_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.rescrape_after
    }

    /// Running tasks that entered their state at or before this instant are stale.
    pub fn running_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.running_timeout
    }
}

pub struct WorkSelector {
    tasks: Arc<dyn TaskStore>,
    policy: EligibilityPolicy,
}

impl WorkSelector {
    pub fn new(tasks: Arc<dyn TaskStore>, policy: EligibilityPolicy) -> Self {
        Self { tasks, policy }
    }

    /// Up to `limit` eligible tasks, oldest state entry first. Ties on the
    /// timestamp are broken by identifier so the order is total.
    pub async fn select(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskStatus>, AppError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        self.tasks
            .eligible_tasks(&self.policy, now, limit as i64)
            .await
    }
}
