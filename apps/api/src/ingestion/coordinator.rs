//! Ingestion Coordinator: turns one scrape-results delivery into snapshots,
//! alert records and task transitions.
//!
//! Identifiers in a delivery are processed concurrently up to a configured
//! bound. All steps for one identifier run under that identifier's lock, and a
//! failure for one identifier never touches its siblings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::alerts::cache::RuleCache;
use crate::alerts::evaluator::evaluate;
use crate::errors::AppError;
use crate::ingestion::payload::{validate_item, ItemCheck, ScrapeWebhook, ScrapedItem};
use crate::models::product::{NewSnapshot, ProductMetadata};
use crate::models::task::{TaskEvent, TaskState, TaskStatus};
use crate::store::{AlertStore, ProductStore};
use crate::tasks::registry::Registry;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentifierFailure {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub run_id: String,
    pub snapshots_written: usize,
    pub alerts_fired: usize,
    pub duplicates: usize,
    /// Records from a run that no longer owns the identifier's task.
    pub stale: usize,
    pub failed: Vec<IdentifierFailure>,
    /// Records that could not be attributed to any identifier.
    pub unattributed: usize,
}

#[derive(Debug)]
enum Outcome {
    Ingested { alerts: usize },
    Duplicate,
    Stale,
    Failed(String),
}

/// Lazily created async lock per identifier. Entries are dropped once no
/// caller holds or waits on them.
#[derive(Default)]
struct IdentifierLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentifierLocks {
    async fn acquire(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release(&self, identifier: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(identifier)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(identifier);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

pub struct IngestionCoordinator {
    products: Arc<dyn ProductStore>,
    alerts: Arc<dyn AlertStore>,
    registry: Arc<Registry>,
    rules: Arc<RuleCache>,
    concurrency: usize,
    locks: IdentifierLocks,
}

impl IngestionCoordinator {
    pub fn new(
        products: Arc<dyn ProductStore>,
        alerts: Arc<dyn AlertStore>,
        registry: Arc<Registry>,
        rules: Arc<RuleCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            products,
            alerts,
            registry,
            rules,
            concurrency: concurrency.max(1),
            locks: IdentifierLocks::default(),
        }
    }

    pub async fn ingest(&self, webhook: ScrapeWebhook, now: DateTime<Utc>) -> IngestSummary {
        let mut summary = IngestSummary {
            run_id: webhook.run_id.clone(),
            ..IngestSummary::default()
        };
        let run_id = webhook.run_id.as_str();

        if !webhook.succeeded() {
            warn!(
                run_id = %webhook.run_id,
                status = %webhook.status,
                "Scrape run did not succeed, failing its identifiers"
            );
            let reason = AppError::TransientUpstream(format!(
                "scrape run {} ended with status {}",
                webhook.run_id, webhook.status
            ))
            .to_string();
            let outcomes = self
                .run_bounded(webhook.requested(), |identifier| {
                    let reason = reason.clone();
                    async move {
                        let outcome = self.fail_task(&identifier, run_id, reason, now).await;
                        (identifier, outcome)
                    }
                })
                .await;
            tally(&mut summary, outcomes);
            return summary;
        }

        let mut by_identifier: HashMap<String, Vec<ItemCheck>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for raw in &webhook.items {
            let check = validate_item(raw);
            match check.identifier.clone() {
                Some(identifier) => {
                    if !by_identifier.contains_key(&identifier) {
                        order.push(identifier.clone());
                    }
                    by_identifier.entry(identifier).or_default().push(check);
                }
                None => {
                    warn!(run_id = %webhook.run_id, "Dropping scraped record without identifier");
                    summary.unattributed += 1;
                }
            }
        }

        let mut jobs: Vec<(String, Option<Vec<ItemCheck>>)> = order
            .into_iter()
            .map(|identifier| {
                let checks = by_identifier.remove(&identifier);
                (identifier, checks)
            })
            .collect();
        for identifier in webhook.requested() {
            if !jobs.iter().any(|(id, _)| *id == identifier) {
                jobs.push((identifier, None));
            }
        }

        let outcomes = self
            .run_bounded(jobs, |(identifier, checks)| async move {
                let outcome = match checks {
                    Some(checks) => self.process_identifier(&identifier, checks, run_id, now).await,
                    None => {
                        let reason = AppError::TransientUpstream(format!(
                            "scrape run {run_id} returned no record for {identifier}"
                        ))
                        .to_string();
                        self.fail_task(&identifier, run_id, reason, now).await
                    }
                };
                (identifier, outcome)
            })
            .await;
        tally(&mut summary, outcomes);

        info!(
            run_id = %summary.run_id,
            snapshots = summary.snapshots_written,
            alerts = summary.alerts_fired,
            duplicates = summary.duplicates,
            stale = summary.stale,
            failed = summary.failed.len(),
            "Scrape results ingested"
        );
        summary
    }

    async fn run_bounded<I, F, Fut>(&self, inputs: Vec<I>, f: F) -> Vec<(String, Outcome)>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = (String, Outcome)>,
    {
        stream::iter(inputs.into_iter().map(f))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Runs `work` while holding the identifier's lock.
    async fn locked<Fut>(&self, identifier: &str, work: Fut) -> Outcome
    where
        Fut: Future<Output = Outcome>,
    {
        let lock = self.locks.acquire(identifier).await;
        let outcome = {
            let _guard = lock.lock().await;
            work.await
        };
        self.locks.release(identifier, lock).await;
        outcome
    }

    /// Steps 1–4 for one identifier, serialized under its lock.
    async fn process_identifier(
        &self,
        identifier: &str,
        checks: Vec<ItemCheck>,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Outcome {
        self.locked(identifier, self.process_locked(identifier, checks, run_id, now))
            .await
    }

    async fn process_locked(
        &self,
        identifier: &str,
        checks: Vec<ItemCheck>,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Outcome {
        match self.registry.snapshot(identifier).await {
            Ok(task) => {
                if let Some(skip) = skip_unowned(&task, run_id) {
                    return skip;
                }
            }
            Err(AppError::NotFound(_)) => {
                let reason = AppError::PermanentUpstream(format!(
                    "record for untracked identifier {identifier}"
                ));
                warn!("{reason}");
                return Outcome::Failed(reason.to_string());
            }
            Err(e) => return Outcome::Failed(e.to_string()),
        }

        let mut checks = checks.into_iter();
        let item = match checks.next().map(|c| c.result) {
            Some(Ok(item)) => item,
            Some(Err(e)) => {
                warn!(identifier = %identifier, "Rejected scraped record: {e}");
                return self.fail_locked(identifier, run_id, e.to_string(), now).await;
            }
            None => {
                return self
                    .fail_locked(identifier, run_id, "empty record set".to_string(), now)
                    .await
            }
        };
        if checks.next().is_some() {
            warn!(identifier = %identifier, "Ignoring extra records in the same delivery");
        }

        match self.persist(item, run_id, now).await {
            Ok(None) => Outcome::Duplicate,
            Ok(Some(alerts)) => {
                if let Err(e) = self
                    .registry
                    .settle(identifier, TaskEvent::Succeed, run_id, now)
                    .await
                {
                    warn!(identifier = %identifier, "Snapshot stored but task not completed: {e}");
                }
                Outcome::Ingested { alerts }
            }
            Err(e) => {
                error!(identifier = %identifier, "Ingestion failed: {e}");
                self.fail_locked(identifier, run_id, e.to_string(), now).await
            }
        }
    }

    /// Writes metadata, the snapshot and any fired alerts. Returns `None` when
    /// this run's snapshot was already stored.
    async fn persist(
        &self,
        item: ScrapedItem,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>, AppError> {
        self.products
            .update_metadata(&ProductMetadata {
                identifier: item.identifier.clone(),
                title: item.title.clone(),
                categories: item.categories.clone(),
            })
            .await?;

        let Some(latest) = self
            .products
            .append_snapshot(NewSnapshot {
                identifier: item.identifier.clone(),
                snapshot_date: now.date_naive(),
                price: item.price,
                rating: item.rating,
                review_count: item.review_count,
                ranks: item.ranks,
                raw_data: item.raw,
                source_run_id: Some(run_id.to_string()),
            })
            .await?
        else {
            return Ok(None);
        };

        let previous = self
            .products
            .previous_snapshot(&latest.identifier, latest.seq)
            .await?;
        let rules = self.rules.snapshot().await?;

        let mut inserted = 0;
        for fired in evaluate(previous.as_ref(), &latest, &rules) {
            let record = fired.into_record(&latest);
            if self.alerts.insert_alert(&record).await? {
                warn!(identifier = %record.identifier, "Alert: {}", record.message);
                inserted += 1;
            }
        }
        Ok(Some(inserted))
    }

    async fn fail_task(
        &self,
        identifier: &str,
        run_id: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Outcome {
        self.locked(identifier, async {
            match self.registry.snapshot(identifier).await {
                Ok(task) => {
                    if let Some(skip) = skip_unowned(&task, run_id) {
                        return skip;
                    }
                }
                Err(AppError::NotFound(_)) => return Outcome::Failed(reason),
                Err(e) => {
                    error!(identifier = %identifier, "Could not record scrape failure: {e}");
                    return Outcome::Failed(reason);
                }
            }
            self.fail_locked(identifier, run_id, reason, now).await
        })
        .await
    }

    /// Settles the task with `fail` on behalf of `run_id`. A rejected
    /// transition means the dispatch moved on under us and counts as stale.
    async fn fail_locked(
        &self,
        identifier: &str,
        run_id: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Outcome {
        match self
            .registry
            .settle(identifier, TaskEvent::Fail, run_id, now)
            .await
        {
            Ok(task) => {
                warn!(
                    identifier = %identifier,
                    retry_count = task.retry_count,
                    "Scrape task failed: {reason}"
                );
                Outcome::Failed(reason)
            }
            Err(AppError::InvalidTransition { .. }) => Outcome::Stale,
            Err(AppError::NotFound(_)) => Outcome::Failed(reason),
            Err(e) => {
                error!(identifier = %identifier, "Could not record scrape failure: {e}");
                Outcome::Failed(reason)
            }
        }
    }
}

/// Outcome for a delivery that must not touch the task: one already settled
/// counts as a duplicate, one owned by a newer run as stale.
fn skip_unowned(task: &TaskStatus, run_id: &str) -> Option<Outcome> {
    if task.state != TaskState::Running {
        info!(
            identifier = %task.identifier,
            state = %task.state,
            "Skipping record for task that is not running"
        );
        return Some(Outcome::Duplicate);
    }
    if !task.accepts_run(run_id) {
        warn!(
            identifier = %task.identifier,
            run_id = %run_id,
            owner = ?task.run_id,
            "Ignoring delivery from a superseded scrape run"
        );
        return Some(Outcome::Stale);
    }
    None
}

fn tally(summary: &mut IngestSummary, outcomes: Vec<(String, Outcome)>) {
    for (identifier, outcome) in outcomes {
        match outcome {
            Outcome::Ingested { alerts } => {
                summary.snapshots_written += 1;
                summary.alerts_fired += alerts;
            }
            Outcome::Duplicate => summary.duplicates += 1,
            Outcome::Stale => summary.stale += 1,
            Outcome::Failed(reason) => summary.failed.push(IdentifierFailure { identifier, reason }),
        }
    }
    summary.failed.sort_by(|a, b| a.identifier.cmp(&b.identifier));
}
