//! In-memory store used by unit tests. Each trait method holds the lock for
//! its whole body, which gives the same single-statement atomicity the
//! Postgres store gets from conditional writes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::alert::{AlertRecord, AlertRule};
use crate::models::product::{NewSnapshot, ProductMetadata, ProductRow, Snapshot};
use crate::models::report::{JobState, ReportJob, ReportResult};
use crate::models::task::TaskStatus;
use crate::store::{AlertStore, ProductStore, ReportStore, RuleSource, TaskStore};
use crate::tasks::selector::EligibilityPolicy;

#[derive(Default)]
struct Inner {
    products: HashMap<String, ProductRow>,
    snapshots: Vec<Snapshot>,
    next_seq: i64,
    tasks: HashMap<String, TaskStatus>,
    rules: Vec<AlertRule>,
    alerts: Vec<AlertRecord>,
    jobs: Vec<ReportJob>,
    results: HashMap<Uuid, ReportResult>,
    failing_appends: HashSet<String>,
    failing_results: bool,
    failing_final_updates: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rules(&self, rules: Vec<AlertRule>) {
        self.inner.lock().unwrap().rules = rules;
    }

    pub fn put_task(&self, task: TaskStatus) {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .insert(task.identifier.clone(), task);
    }

    /// Makes every snapshot append for `identifier` fail with a database error.
    pub fn fail_appends_for(&self, identifier: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_appends
            .insert(identifier.to_string());
    }

    pub fn fail_result_inserts(&self) {
        self.inner.lock().unwrap().failing_results = true;
    }

    /// Makes every `running -> completed | failed` job write fail with a
    /// database error.
    pub fn fail_final_job_updates(&self) {
        self.inner.lock().unwrap().failing_final_updates = true;
    }

    pub fn task(&self, identifier: &str) -> Option<TaskStatus> {
        self.inner.lock().unwrap().tasks.get(identifier).cloned()
    }

    pub fn snapshot_count(&self, identifier: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| s.identifier == identifier)
            .count()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.inner.lock().unwrap().alerts.clone()
    }

    pub fn job_count(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn register_product(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let created = !inner.products.contains_key(identifier);
        if created {
            inner.products.insert(
                identifier.to_string(),
                ProductRow {
                    identifier: identifier.to_string(),
                    title: None,
                    categories: vec![],
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        inner
            .tasks
            .entry(identifier.to_string())
            .or_insert_with(|| TaskStatus::new_pending(identifier, now));
        Ok(created)
    }

    async fn get_product(&self, identifier: &str) -> Result<Option<ProductRow>, AppError> {
        Ok(self.inner.lock().unwrap().products.get(identifier).cloned())
    }

    async fn update_metadata(&self, metadata: &ProductMetadata) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(product) = inner.products.get_mut(&metadata.identifier) {
            if metadata.title.is_some() {
                product.title = metadata.title.clone();
            }
            if !metadata.categories.is_empty() {
                product.categories = metadata.categories.clone();
            }
            product.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn append_snapshot(&self, snapshot: NewSnapshot) -> Result<Option<Snapshot>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_appends.contains(&snapshot.identifier) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        if snapshot.source_run_id.is_some()
            && inner.snapshots.iter().any(|s| {
                s.identifier == snapshot.identifier && s.source_run_id == snapshot.source_run_id
            })
        {
            return Ok(None);
        }
        inner.next_seq += 1;
        let stored = Snapshot {
            id: Uuid::new_v4(),
            seq: inner.next_seq,
            identifier: snapshot.identifier,
            snapshot_date: snapshot.snapshot_date,
            price: snapshot.price,
            rating: snapshot.rating,
            review_count: snapshot.review_count,
            ranks: snapshot.ranks,
            raw_data: snapshot.raw_data,
            source_run_id: snapshot.source_run_id,
            created_at: Utc::now(),
        };
        inner.snapshots.push(stored.clone());
        Ok(Some(stored))
    }

    async fn latest_snapshot(&self, identifier: &str) -> Result<Option<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.identifier == identifier)
            .max_by_key(|s| s.seq)
            .cloned())
    }

    async fn previous_snapshot(
        &self,
        identifier: &str,
        before_seq: i64,
    ) -> Result<Option<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.identifier == identifier && s.seq < before_seq)
            .max_by_key(|s| s.seq)
            .cloned())
    }

    async fn snapshots_since(
        &self,
        identifier: &str,
        since: NaiveDate,
    ) -> Result<Vec<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.identifier == identifier && s.snapshot_date >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, identifier: &str) -> Result<Option<TaskStatus>, AppError> {
        Ok(self.task(identifier))
    }

    async fn compare_and_set_task(
        &self,
        expected_version: i64,
        next: &TaskStatus,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tasks.get_mut(&next.identifier) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn eligible_tasks(
        &self,
        policy: &EligibilityPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskStatus>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut eligible: Vec<TaskStatus> = inner
            .tasks
            .values()
            .filter(|t| policy.is_eligible(t, now))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            a.entered_at
                .cmp(&b.entered_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, record: &AlertRecord) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.alerts.iter().any(|a| {
            a.identifier == record.identifier
                && a.rule_id == record.rule_id
                && a.snapshot_id == record.snapshot_id
                && a.category == record.category
        });
        if duplicate {
            return Ok(false);
        }
        inner.alerts.push(record.clone());
        Ok(true)
    }

    async fn recent_alerts(
        &self,
        identifier: &str,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|a| a.identifier == identifier)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RuleSource for MemoryStore {
    async fn load_active_rules(&self) -> Result<Vec<AlertRule>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rules.iter().filter(|r| r.enabled).cloned().collect())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_job(&self, job: &ReportJob) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let conflict = inner.jobs.iter().any(|j| {
            j.parameters_hash == job.parameters_hash
                && j.created_day == job.created_day
                && j.state != JobState::Failed
        });
        if conflict {
            return Ok(false);
        }
        inner.jobs.push(job.clone());
        Ok(true)
    }

    async fn find_live_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .iter()
            .find(|j| {
                j.parameters_hash == parameters_hash
                    && j.created_day == day
                    && j.state != JobState::Failed
            })
            .cloned())
    }

    async fn find_completed_job(
        &self,
        parameters_hash: &str,
        day: NaiveDate,
    ) -> Result<Option<ReportJob>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .iter()
            .find(|j| {
                j.parameters_hash == parameters_hash
                    && j.created_day == day
                    && j.state == JobState::Completed
            })
            .cloned())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ReportJob>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn update_job(&self, expected: JobState, next: &ReportJob) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_final_updates && expected == JobState::Running {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        match inner.jobs.iter_mut().find(|j| j.id == next.id) {
            Some(current) if current.state == expected => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_jobs(&self, state: JobState, limit: i64) -> Result<Vec<ReportJob>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .iter()
            .filter(|j| j.state == state)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_result(&self, result: &ReportResult) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_results {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        inner.results.insert(result.job_id, result.clone());
        Ok(())
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<ReportResult>, AppError> {
        Ok(self.inner.lock().unwrap().results.get(&job_id).cloned())
    }
}
