//! Task Status Registry: the per-identifier scrape state machine.
//!
//! Transitions are computed by [`apply`] and persisted with a version-checked
//! write. A caller that loses a race re-reads the row and re-applies its event
//! against the state the winner left behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::product::{normalize_identifier, Snapshot};
use crate::models::task::{TaskEvent, TaskState, TaskStatus};
use crate::store::{ProductStore, TaskStore};
use crate::tasks::selector::EligibilityPolicy;

const MAX_CAS_ATTEMPTS: usize = 8;

// ────────────────────────────────────────────────────────────────────────────
// Transition table
// ────────────────────────────────────────────────────────────────────────────

/// Applies `event` to `status` and returns the successor row.
///
/// | from      | event     | to        | side effect              |
/// |-----------|-----------|-----------|--------------------------|
/// | pending   | dispatch  | running   | entered_at = now, run_id cleared |
/// | running   | succeed   | completed | entered_at unchanged     |
/// | running   | fail      | failed    | retry_count += 1         |
/// | running   | timeout   | pending   | entered_at = now         |
/// | completed | age_out   | pending   | entered_at = now         |
/// | failed    | retry     | pending   | entered_at = now         |
/// | failed    | reinstate | pending   | entered_at = now, retries reset |
///
/// Any other pair is rejected with `InvalidTransition`.
pub fn apply(
    status: &TaskStatus,
    event: TaskEvent,
    now: DateTime<Utc>,
) -> Result<TaskStatus, AppError> {
    let mut next = status.clone();
    match (status.state, event) {
        (TaskState::Pending, TaskEvent::Dispatch) => {
            next.state = TaskState::Running;
            next.entered_at = now;
            next.run_id = None;
        }
        (TaskState::Running, TaskEvent::Succeed) => {
            next.state = TaskState::Completed;
        }
        (TaskState::Running, TaskEvent::Fail) => {
            next.state = TaskState::Failed;
            next.retry_count += 1;
        }
        (TaskState::Running, TaskEvent::Timeout)
        | (TaskState::Completed, TaskEvent::AgeOut)
        | (TaskState::Failed, TaskEvent::Retry) => {
            next.state = TaskState::Pending;
            next.entered_at = now;
        }
        (TaskState::Failed, TaskEvent::Reinstate) => {
            next.state = TaskState::Pending;
            next.entered_at = now;
            next.retry_count = 0;
        }
        (state, event) => {
            return Err(AppError::invalid_transition(
                format!("task {}", status.identifier),
                state,
                event,
            ))
        }
    }
    next.version = status.version + 1;
    Ok(next)
}

/// The event that moves an eligible, non-pending task back to `pending` so it
/// can be dispatched.
fn preparatory_event(
    task: &TaskStatus,
    policy: &EligibilityPolicy,
    now: DateTime<Utc>,
) -> Result<Option<TaskEvent>, AppError> {
    if !policy.is_eligible(task, now) {
        return Err(match task.state {
            TaskState::Running => AppError::AlreadyDispatched(task.identifier.clone()),
            state => AppError::invalid_transition(
                format!("task {}", task.identifier),
                state,
                TaskEvent::Dispatch,
            ),
        });
    }
    Ok(match task.state {
        TaskState::Pending => None,
        TaskState::Running => Some(TaskEvent::Timeout),
        TaskState::Completed => Some(TaskEvent::AgeOut),
        TaskState::Failed => Some(TaskEvent::Retry),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TrackOutcome {
    pub identifier: String,
    pub created: bool,
}

/// What is known about a tracked identifier right now. `snapshot` is `None`
/// until the first scrape lands; `state` tells the caller whether one is on
/// the way.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub identifier: String,
    pub title: Option<String>,
    pub categories: Vec<String>,
    pub state: TaskState,
    pub snapshot: Option<Snapshot>,
}

pub struct Registry {
    products: Arc<dyn ProductStore>,
    tasks: Arc<dyn TaskStore>,
    policy: EligibilityPolicy,
}

impl Registry {
    pub fn new(
        products: Arc<dyn ProductStore>,
        tasks: Arc<dyn TaskStore>,
        policy: EligibilityPolicy,
    ) -> Self {
        Self {
            products,
            tasks,
            policy,
        }
    }

    /// Current state tuple for `identifier`.
    pub async fn snapshot(&self, identifier: &str) -> Result<TaskStatus, AppError> {
        self.tasks
            .get_task(identifier)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No task for identifier {identifier}")))
    }

    /// Applies one transition atomically. A `dispatch` against a task that is
    /// already running reports `AlreadyDispatched`.
    pub async fn advance(
        &self,
        identifier: &str,
        event: TaskEvent,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, AppError> {
        self.transition(identifier, |current| {
            if event == TaskEvent::Dispatch && current.state == TaskState::Running {
                return Err(AppError::AlreadyDispatched(current.identifier.clone()));
            }
            apply(current, event, now)
        })
        .await
    }

    /// Moves a selected task to `running`, applying whichever of
    /// `timeout`/`age_out`/`retry` its state needs first. Both steps land in a
    /// single conditional write, so two schedulers claiming the same task
    /// cannot both win.
    pub async fn claim_for_dispatch(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, AppError> {
        let policy = &self.policy;
        self.transition(identifier, |current| {
            let prepared = match preparatory_event(current, policy, now)? {
                Some(event) => apply(current, event, now)?,
                None => current.clone(),
            };
            let mut next = apply(&prepared, TaskEvent::Dispatch, now)?;
            next.version = current.version + 1;
            Ok(next)
        })
        .await
    }

    /// Records the scraper run that owns a running task. Fails with
    /// `InvalidTransition` when the task was settled or re-dispatched since
    /// the claim, or already belongs to another run.
    pub async fn assign_run(&self, identifier: &str, run_id: &str) -> Result<TaskStatus, AppError> {
        self.transition(identifier, |current| {
            if current.state != TaskState::Running
                || current.run_id.as_deref().is_some_and(|owner| owner != run_id)
            {
                return Err(AppError::invalid_transition(
                    format!("task {}", current.identifier),
                    current.state,
                    "assign_run",
                ));
            }
            let mut next = current.clone();
            next.run_id = Some(run_id.to_string());
            next.version = current.version + 1;
            Ok(next)
        })
        .await
    }

    /// Applies `succeed` or `fail` on behalf of scraper run `run_id`. A task
    /// owned by a different run, or no longer running, is rejected with
    /// `InvalidTransition` and left untouched.
    pub async fn settle(
        &self,
        identifier: &str,
        event: TaskEvent,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, AppError> {
        self.transition(identifier, |current| {
            if !current.accepts_run(run_id) {
                return Err(AppError::invalid_transition(
                    format!("task {} for run {run_id}", current.identifier),
                    current.state,
                    event,
                ));
            }
            apply(current, event, now)
        })
        .await
    }

    /// Latest snapshot plus task state for a tracked identifier. Never fails
    /// just because no scrape has landed yet.
    pub async fn observe(&self, identifier: &str) -> Result<Observation, AppError> {
        let product = self
            .products
            .get_product(identifier)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Identifier {identifier} is not tracked")))?;
        let task = self.snapshot(identifier).await?;
        let snapshot = self.products.latest_snapshot(identifier).await?;
        Ok(Observation {
            identifier: product.identifier,
            title: product.title,
            categories: product.categories,
            state: task.state,
            snapshot,
        })
    }

    /// Operator action for a failed task: back to `pending` with the retry
    /// counter cleared.
    pub async fn reinstate(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, AppError> {
        let status = self.advance(identifier, TaskEvent::Reinstate, now).await?;
        info!(identifier = %identifier, "Task reinstated");
        Ok(status)
    }

    /// Registers identifiers for tracking. Existing identifiers are left as
    /// they are.
    pub async fn track(
        &self,
        identifiers: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<TrackOutcome>, AppError> {
        let mut outcomes = Vec::with_capacity(identifiers.len());
        for raw in identifiers {
            let identifier = normalize_identifier(raw).ok_or_else(|| {
                AppError::Validation("identifiers cannot contain blank entries".to_string())
            })?;
            if outcomes
                .iter()
                .any(|o: &TrackOutcome| o.identifier == identifier)
            {
                continue;
            }
            let created = self.products.register_product(&identifier, now).await?;
            if created {
                info!(identifier = %identifier, "Tracking new identifier");
            }
            outcomes.push(TrackOutcome {
                identifier,
                created,
            });
        }
        Ok(outcomes)
    }

    async fn transition<F>(&self, identifier: &str, step: F) -> Result<TaskStatus, AppError>
    where
        F: Fn(&TaskStatus) -> Result<TaskStatus, AppError>,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.snapshot(identifier).await?;
            let next = step(&current)?;
            if self.tasks.compare_and_set_task(current.version, &next).await? {
                debug!(
                    identifier = %identifier,
                    from = %current.state,
                    to = %next.state,
                    "Task transitioned"
                );
                return Ok(next);
            }
            warn!(
                identifier = %identifier,
                attempt,
                "Lost task status race, re-reading"
            );
        }
        Err(AppError::Internal(anyhow::anyhow!(
            "task {identifier} kept changing after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn status(state: TaskState, retries: i32, entered_at: DateTime<Utc>) -> TaskStatus {
        TaskStatus {
            identifier: "B000000001".to_string(),
            state,
            entered_at,
            retry_count: retries,
            version: 4,
            run_id: None,
        }
    }

    fn registry(store: &Arc<MemoryStore>) -> Registry {
        Registry::new(store.clone(), store.clone(), EligibilityPolicy::default())
    }

    #[test]
    fn test_transition_table() {
        let then = Utc::now() - Duration::hours(2);
        let now = Utc::now();

        let running = apply(&status(TaskState::Pending, 0, then), TaskEvent::Dispatch, now).unwrap();
        assert_eq!(running.state, TaskState::Running);
        assert_eq!(running.entered_at, now);
        assert_eq!(running.version, 5);

        let done = apply(&status(TaskState::Running, 1, then), TaskEvent::Succeed, now).unwrap();
        assert_eq!(done.state, TaskState::Completed);
        assert_eq!(done.entered_at, then);
        assert_eq!(done.retry_count, 1);

        let failed = apply(&status(TaskState::Running, 1, then), TaskEvent::Fail, now).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.retry_count, 2);

        for (from, event) in [
            (TaskState::Running, TaskEvent::Timeout),
            (TaskState::Completed, TaskEvent::AgeOut),
            (TaskState::Failed, TaskEvent::Retry),
        ] {
            let next = apply(&status(from, 2, then), event, now).unwrap();
            assert_eq!(next.state, TaskState::Pending);
            assert_eq!(next.entered_at, now);
            assert_eq!(next.retry_count, 2, "{event} must not touch retries");
        }

        let reinstated =
            apply(&status(TaskState::Failed, 3, then), TaskEvent::Reinstate, now).unwrap();
        assert_eq!(reinstated.state, TaskState::Pending);
        assert_eq!(reinstated.retry_count, 0);
    }

    #[test]
    fn test_disallowed_pairs_are_rejected() {
        let now = Utc::now();
        let rejected = [
            (TaskState::Pending, TaskEvent::Succeed),
            (TaskState::Pending, TaskEvent::Fail),
            (TaskState::Completed, TaskEvent::Dispatch),
            (TaskState::Completed, TaskEvent::Retry),
            (TaskState::Failed, TaskEvent::Dispatch),
            (TaskState::Running, TaskEvent::Reinstate),
            (TaskState::Pending, TaskEvent::AgeOut),
        ];
        for (from, event) in rejected {
            let err = apply(&status(from, 0, now), event, now).unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_advance_rejects_and_leaves_state_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        registry.track(&["B000000001".to_string()], now).await.unwrap();

        let err = registry
            .advance("B000000001", TaskEvent::Succeed, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let row = registry.snapshot("B000000001").await.unwrap();
        assert_eq!(row.state, TaskState::Pending);
        assert_eq!(row.version, 0);
    }

    #[tokio::test]
    async fn test_snapshot_unknown_identifier_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = registry(&store).snapshot("NOPE").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_second_dispatch_reports_already_dispatched() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        registry.track(&["B000000001".to_string()], now).await.unwrap();

        let (a, b) = tokio::join!(
            registry.claim_for_dispatch("B000000001", now),
            registry.claim_for_dispatch("B000000001", now),
        );
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AppError::AlreadyDispatched(_))));

        let err = registry
            .advance("B000000001", TaskEvent::Dispatch, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyDispatched(_)));
    }

    #[tokio::test]
    async fn test_claim_recovers_stale_running_task() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        let mut stale = TaskStatus::new_pending("B000000001", now - Duration::minutes(10));
        stale.state = TaskState::Running;
        stale.version = 3;
        store.put_task(stale);

        let claimed = registry.claim_for_dispatch("B000000001", now).await.unwrap();
        assert_eq!(claimed.state, TaskState::Running);
        assert_eq!(claimed.entered_at, now);
        assert_eq!(claimed.version, 4);
    }

    #[tokio::test]
    async fn test_claim_rejects_exhausted_failed_task() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        let mut exhausted = TaskStatus::new_pending("B000000001", now);
        exhausted.state = TaskState::Failed;
        exhausted.retry_count = 3;
        store.put_task(exhausted);

        let err = registry
            .claim_for_dispatch("B000000001", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let reinstated = registry.reinstate("B000000001", now).await.unwrap();
        assert_eq!(reinstated.retry_count, 0);
        assert_eq!(reinstated.state, TaskState::Pending);
        assert!(registry.claim_for_dispatch("B000000001", now).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_counter_survives_completed_rollover() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let start = Utc::now();
        let id = "B000000001";
        registry.track(&[id.to_string()], start).await.unwrap();

        registry.claim_for_dispatch(id, start).await.unwrap();
        registry.advance(id, TaskEvent::Fail, start).await.unwrap();
        registry.claim_for_dispatch(id, start).await.unwrap();
        registry.advance(id, TaskEvent::Succeed, start).await.unwrap();

        let next_day = start + Duration::days(1);
        let claimed = registry.claim_for_dispatch(id, next_day).await.unwrap();
        assert_eq!(claimed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_track_normalizes_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();

        let first = registry
            .track(&[" b000000001".to_string(), "B000000001".to_string()], now)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].created);

        registry
            .advance("B000000001", TaskEvent::Dispatch, now)
            .await
            .unwrap();
        let again = registry.track(&["B000000001".to_string()], now).await.unwrap();
        assert!(!again[0].created);
        assert_eq!(store.task("B000000001").unwrap().state, TaskState::Running);

        let err = registry.track(&["  ".to_string()], now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_observe_reports_state_before_first_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        registry.track(&["B1".to_string()], now).await.unwrap();
        registry.claim_for_dispatch("B1", now).await.unwrap();

        let observed = registry.observe("B1").await.unwrap();
        assert_eq!(observed.state, TaskState::Running);
        assert!(observed.snapshot.is_none());

        let err = registry.observe("UNKNOWN").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_settle_only_for_owning_run() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(&store);
        let now = Utc::now();
        let id = "B000000001";
        registry.track(&[id.to_string()], now).await.unwrap();
        registry.claim_for_dispatch(id, now).await.unwrap();
        registry.assign_run(id, "run-2").await.unwrap();

        let err = registry
            .settle(id, TaskEvent::Fail, "run-1", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        let row = store.task(id).unwrap();
        assert_eq!(row.state, TaskState::Running);
        assert_eq!(row.retry_count, 0);

        let err = registry.assign_run(id, "run-1").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let done = registry
            .settle(id, TaskEvent::Succeed, "run-2", now)
            .await
            .unwrap();
        assert_eq!(done.state, TaskState::Completed);
        assert_eq!(done.run_id.as_deref(), Some("run-2"));

        // A fresh dispatch forgets the previous owner.
        let next_day = now + Duration::days(1);
        let claimed = registry.claim_for_dispatch(id, next_day).await.unwrap();
        assert_eq!(claimed.run_id, None);
    }

    // ── Lost races ──────────────────────────────────────────────────────────

    type Rival = Box<dyn Fn(&TaskStatus) -> TaskStatus + Send + Sync>;

    /// Commits a competing write just before the first compare-and-set that
    /// passes through it, so that CAS is guaranteed to lose.
    struct RacingTasks {
        inner: Arc<MemoryStore>,
        rival: std::sync::Mutex<Option<Rival>>,
        cas_calls: std::sync::atomic::AtomicUsize,
    }

    impl RacingTasks {
        fn new(inner: Arc<MemoryStore>, rival: Rival) -> Self {
            Self {
                inner,
                rival: std::sync::Mutex::new(Some(rival)),
                cas_calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskStore for RacingTasks {
        async fn get_task(&self, identifier: &str) -> Result<Option<TaskStatus>, AppError> {
            self.inner.get_task(identifier).await
        }

        async fn compare_and_set_task(
            &self,
            expected_version: i64,
            next: &TaskStatus,
        ) -> Result<bool, AppError> {
            self.cas_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let rival = self.rival.lock().unwrap().take();
            if let Some(rival) = rival {
                let current = self.inner.task(&next.identifier).unwrap();
                let winner = rival(&current);
                assert!(self
                    .inner
                    .compare_and_set_task(current.version, &winner)
                    .await
                    .unwrap());
            }
            self.inner.compare_and_set_task(expected_version, next).await
        }

        async fn eligible_tasks(
            &self,
            policy: &EligibilityPolicy,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<TaskStatus>, AppError> {
            self.inner.eligible_tasks(policy, now, limit).await
        }
    }

    async fn running_task(store: &Arc<MemoryStore>, now: DateTime<Utc>) {
        registry(store)
            .track(&["A1".to_string()], now)
            .await
            .unwrap();
        registry(store).claim_for_dispatch("A1", now).await.unwrap();
    }

    #[tokio::test]
    async fn test_loser_sees_winner_state() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        running_task(&store, now).await;
        let racing = Arc::new(RacingTasks::new(
            store.clone(),
            Box::new(move |t| apply(t, TaskEvent::Fail, now).unwrap()),
        ));
        let registry = Registry::new(store.clone(), racing.clone(), EligibilityPolicy::default());

        let err = registry
            .advance("A1", TaskEvent::Succeed, now)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'failed'"), "{err}");
        let row = store.task("A1").unwrap();
        assert_eq!(row.state, TaskState::Failed);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.version, 2);
        assert_eq!(racing.cas_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lost_cas_is_retried_against_fresh_row() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        running_task(&store, now).await;
        let racing = Arc::new(RacingTasks::new(
            store.clone(),
            Box::new(|t| {
                let mut next = t.clone();
                next.run_id = Some("run-7".to_string());
                next.version += 1;
                next
            }),
        ));
        let registry = Registry::new(store.clone(), racing.clone(), EligibilityPolicy::default());

        let done = registry
            .advance("A1", TaskEvent::Succeed, now)
            .await
            .unwrap();

        assert_eq!(done.state, TaskState::Completed);
        assert_eq!(done.run_id.as_deref(), Some("run-7"));
        assert_eq!(done.version, 3);
        assert_eq!(racing.cas_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_claim_losing_to_rival_dispatch_is_already_dispatched() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        registry(&store).track(&["A1".to_string()], now).await.unwrap();
        let racing = Arc::new(RacingTasks::new(
            store.clone(),
            Box::new(move |t| apply(t, TaskEvent::Dispatch, now).unwrap()),
        ));
        let registry = Registry::new(store.clone(), racing, EligibilityPolicy::default());

        let err = registry.claim_for_dispatch("A1", now).await.unwrap_err();

        assert!(matches!(err, AppError::AlreadyDispatched(_)));
        assert_eq!(store.task("A1").unwrap().version, 1);
    }
}
