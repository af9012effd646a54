use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::alert::{AlertRecord, AlertRule, AlertRuleRow};
use crate::models::product::{NewSnapshot, ProductMetadata, ProductRow, Snapshot, SnapshotRow};
use crate::models::report::{JobState, ReportJob, ReportJobRow, ReportResult};
use crate::models::task::{TaskState, TaskStatus, TaskStatusRow};
use crate::store::{AlertStore, ProductStore, ReportStore, RuleSource, TaskStore};
use crate::tasks::selector::EligibilityPolicy;

const SNAPSHOT_COLUMNS: &str = "id, seq, identifier, snapshot_date, price, rating, review_count, \
     ranks, raw_data, source_run_id, created_at";

const JOB_COLUMNS: &str = "id, job_type, parameters, parameters_hash, created_day, state, \
     result_ref, error_message, created_at, started_at, completed_at";

/// PostgreSQL implementation of every storage seam.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn register_product(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO products (identifier, created_at, updated_at) VALUES ($1, $2, $2) \
             ON CONFLICT (identifier) DO NOTHING",
        )
        .bind(identifier)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        sqlx::query(
            "INSERT INTO task_status (identifier, state, entered_at, retry_count, version) \
             VALUES ($1, 'pending', $2, 0, 0) ON CONFLICT (identifier) DO NOTHING",
        )
        .bind(identifier)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_product(&self, identifier: &str) -> Result<Option<ProductRow>, AppError> {
        Ok(sqlx::query_as::<_, ProductRow>(
            "SELECT identifier, title, categories, created_at, updated_at \
             FROM products WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_metadata(&self, metadata: &ProductMetadata) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE products
            SET title = COALESCE($1, title),
                categories = CASE WHEN cardinality($2::TEXT[]) > 0 THEN $2 ELSE categories END,
                updated_at = NOW()
            WHERE identifier = $3
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.categories)
        .bind(&metadata.identifier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_snapshot(&self, snapshot: NewSnapshot) -> Result<Option<Snapshot>, AppError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO product_snapshots
                (id, identifier, snapshot_date, price, rating, review_count,
                 ranks, raw_data, source_run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (identifier, source_run_id) DO NOTHING
            RETURNING {SNAPSHOT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&snapshot.identifier)
        .bind(snapshot.snapshot_date)
        .bind(snapshot.price)
        .bind(snapshot.rating)
        .bind(snapshot.review_count)
        .bind(Json(&snapshot.ranks))
        .bind(&snapshot.raw_data)
        .bind(&snapshot.source_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Snapshot::from))
    }

    async fn latest_snapshot(&self, identifier: &str) -> Result<Option<Snapshot>, AppError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE identifier = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Snapshot::from))
    }

    async fn previous_snapshot(
        &self,
        identifier: &str,
        before_seq: i64,
    ) -> Result<Option<Snapshot>, AppError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE identifier = $1 AND seq < $2 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(identifier)
        .bind(before_seq)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Snapshot::from))
    }

    async fn snapshots_since(
        &self,
        identifier: &str,
        since: NaiveDate,
    ) -> Result<Vec<Snapshot>, AppError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE identifier = $1 AND snapshot_date >= $2 ORDER BY seq ASC"
        ))
        .bind(identifier)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Snapshot::from).collect())
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn get_task(&self, identifier: &str) -> Result<Option<TaskStatus>, AppError> {
        let row: Option<TaskStatusRow> = sqlx::query_as(
            "SELECT identifier, state, entered_at, retry_count, version, run_id \
             FROM task_status WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskStatus::try_from).transpose()
    }

    async fn compare_and_set_task(
        &self,
        expected_version: i64,
        next: &TaskStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE task_status
            SET state = $1, entered_at = $2, retry_count = $3, version = $4, run_id = $5
            WHERE identifier = $6 AND version = $7
            "#,
        )
        .bind(next.state.as_str())
        .bind(next.entered_at)
        .bind(next.retry_count)
        .bind(next.version)
        .bind(&next.run_id)
        .bind(&next.identifier)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn eligible_tasks(
        &self,
        policy: &EligibilityPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskStatus>, AppError> {
        let rows: Vec<TaskStatusRow> = sqlx::query_as(
            r#"
            SELECT identifier, state, entered_at, retry_count, version, run_id
            FROM task_status
            WHERE state = $1
               OR (state = $2 AND entered_at <= $3)
               OR (state = $4 AND entered_at <= $5)
               OR (state = $6 AND retry_count < $7)
            ORDER BY entered_at ASC, identifier ASC
            LIMIT $8
            "#,
        )
        .bind(TaskState::Pending.as_str())
        .bind(TaskState::Completed.as_str())
        .bind(policy.completed_cutoff(now))
        .bind(TaskState::Running.as_str())
        .bind(policy.running_cutoff(now))
        .bind(TaskState::Failed.as_str())
        .bind(policy.max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskStatus::try_from).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, record: &AlertRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts
                (id, identifier, rule_id, category, previous_value, current_value,
                 change_value, message, snapshot_id, snapshot_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (identifier, rule_id, snapshot_id, category) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.identifier)
        .bind(record.rule_id)
        .bind(&record.category)
        .bind(record.previous_value)
        .bind(record.current_value)
        .bind(record.change_value)
        .bind(&record.message)
        .bind(record.snapshot_id)
        .bind(record.snapshot_date)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn recent_alerts(
        &self,
        identifier: &str,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, AppError> {
        Ok(sqlx::query_as::<_, AlertRecord>(
            "SELECT * FROM alerts WHERE identifier = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(identifier)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl RuleSource for PgStore {
    async fn load_active_rules(&self) -> Result<Vec<AlertRule>, AppError> {
        let rows: Vec<AlertRuleRow> = sqlx::query_as(
            r#"
            SELECT id, name, change_kind, direction, threshold, threshold_kind, enabled
            FROM alert_rules
            WHERE enabled
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AlertRule::try_from).collect()
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn insert_job(&self, job: &ReportJob) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO report_jobs
                (id, job_type, parameters, parameters_hash, created_day, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (parameters_hash, created_day) WHERE state <> 'failed' DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.parameters)
        .bind(&job.parameters_hash)
        .bind(job.created_day)
        .bind(job.state.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_live_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError> {
        let row: Option<ReportJobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs \
             WHERE parameters_hash = $1 AND created_day = $2 AND state <> 'failed' LIMIT 1"
        ))
        .bind(parameters_hash)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReportJob::try_from).transpose()
    }

    async fn find_completed_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError> {
        let row: Option<ReportJobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs \
             WHERE parameters_hash = $1 AND created_day = $2 AND state = 'completed' LIMIT 1"
        ))
        .bind(parameters_hash)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReportJob::try_from).transpose()
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ReportJob>, AppError> {
        let row: Option<ReportJobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM report_jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ReportJob::try_from).transpose()
    }

    async fn update_job(&self, expected: JobState, next: &ReportJob) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE report_jobs
            SET state = $1, result_ref = $2, error_message = $3,
                started_at = $4, completed_at = $5
            WHERE id = $6 AND state = $7
            "#,
        )
        .bind(next.state.as_str())
        .bind(&next.result_ref)
        .bind(&next.error_message)
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(next.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_jobs(&self, state: JobState, limit: i64) -> Result<Vec<ReportJob>, AppError> {
        let rows: Vec<ReportJobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs WHERE state = $1 \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReportJob::try_from).collect()
    }

    async fn insert_result(&self, result: &ReportResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO report_results (id, job_id, report_type, content, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(result.id)
        .bind(result.job_id)
        .bind(&result.report_type)
        .bind(&result.content)
        .bind(&result.metadata)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<ReportResult>, AppError> {
        Ok(sqlx::query_as::<_, ReportResult>(
            "SELECT id, job_id, report_type, content, metadata, created_at \
             FROM report_results WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
