//! Storage seams for the orchestration core.
//!
//! Every state change the core makes is expressed through one of these traits
//! as a single conditional write: version-checked updates for task status,
//! state-checked updates for report jobs, insert-if-absent for snapshots,
//! alerts and report jobs. `PgStore` is the production backend; unit tests use
//! the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::alert::{AlertRecord, AlertRule};
use crate::models::product::{NewSnapshot, ProductMetadata, ProductRow, Snapshot};
use crate::models::report::{JobState, ReportJob, ReportResult};
use crate::models::task::TaskStatus;
use crate::tasks::selector::EligibilityPolicy;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Creates the identifier record and its `pending` task row if absent.
    /// Returns `true` when the identifier was newly registered.
    async fn register_product(&self, identifier: &str, now: DateTime<Utc>)
        -> Result<bool, AppError>;

    async fn get_product(&self, identifier: &str) -> Result<Option<ProductRow>, AppError>;

    async fn update_metadata(&self, metadata: &ProductMetadata) -> Result<(), AppError>;

    /// Appends a snapshot. Returns `None` when a snapshot from the same scraper
    /// run already exists for the identifier.
    async fn append_snapshot(&self, snapshot: NewSnapshot) -> Result<Option<Snapshot>, AppError>;

    async fn latest_snapshot(&self, identifier: &str) -> Result<Option<Snapshot>, AppError>;

    /// Most recent snapshot created strictly before `before_seq`.
    async fn previous_snapshot(
        &self,
        identifier: &str,
        before_seq: i64,
    ) -> Result<Option<Snapshot>, AppError>;

    /// Snapshots observed on or after `since`, oldest first.
    async fn snapshots_since(
        &self,
        identifier: &str,
        since: NaiveDate,
    ) -> Result<Vec<Snapshot>, AppError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, identifier: &str) -> Result<Option<TaskStatus>, AppError>;

    /// Replaces the task row with `next` only if the stored version still equals
    /// `expected_version`. Returns whether this write won.
    async fn compare_and_set_task(
        &self,
        expected_version: i64,
        next: &TaskStatus,
    ) -> Result<bool, AppError>;

    /// Rows satisfying `policy` at `now`, oldest state entry first.
    async fn eligible_tasks(
        &self,
        policy: &EligibilityPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskStatus>, AppError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Returns `false` if the (identifier, rule, snapshot, category) record exists.
    async fn insert_alert(&self, record: &AlertRecord) -> Result<bool, AppError>;

    async fn recent_alerts(
        &self,
        identifier: &str,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, AppError>;
}

/// Read access to the administratively managed rule set.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Enabled rules in registration order.
    async fn load_active_rules(&self) -> Result<Vec<AlertRule>, AppError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a new job. Returns `false` when a non-failed job with the same
    /// hash already exists for the job's `created_day`.
    async fn insert_job(&self, job: &ReportJob) -> Result<bool, AppError>;

    async fn find_live_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError>;

    async fn find_completed_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ReportJob>, AppError>;

    /// Writes `next` only if the stored job is still in `expected` state.
    async fn update_job(&self, expected: JobState, next: &ReportJob) -> Result<bool, AppError>;

    async fn list_jobs(&self, state: JobState, limit: i64) -> Result<Vec<ReportJob>, AppError>;

    async fn insert_result(&self, result: &ReportResult) -> Result<(), AppError>;

    async fn get_result(&self, job_id: Uuid) -> Result<Option<ReportResult>, AppError>;
}
