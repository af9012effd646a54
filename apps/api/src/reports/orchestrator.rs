//! Report job lifecycle: idempotent submit, background run, status reads.
//!
//! A job moves `pending → running → completed | failed`; every move is a
//! state-checked write, so two workers can never both run the same job.
//! Idempotency rests on the store rejecting a second non-failed job with the
//! same parameter hash on the same UTC day.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::report::{JobState, ReportJob, ReportResult};
use crate::reports::comparison;
use crate::reports::dispatch::ReportDispatcher;
use crate::reports::generator::ReportGenerator;
use crate::reports::params::{ReportParams, ReportRequest};
use crate::store::{ProductStore, ReportStore};

const MAX_SUBMIT_ATTEMPTS: usize = 3;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub job_id: Uuid,
    pub state: JobState,
    pub result_ref: Option<String>,
    /// `true` when an earlier job with the same parameters was returned.
    pub existing: bool,
}

impl SubmitOutcome {
    fn from_job(job: &ReportJob, existing: bool) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            result_ref: job.result_ref.clone(),
            existing,
        }
    }
}

pub struct ReportOrchestrator {
    products: Arc<dyn ProductStore>,
    jobs: Arc<dyn ReportStore>,
    generator: Arc<dyn ReportGenerator>,
    dispatcher: Arc<dyn ReportDispatcher>,
}

impl ReportOrchestrator {
    pub fn new(
        products: Arc<dyn ProductStore>,
        jobs: Arc<dyn ReportStore>,
        generator: Arc<dyn ReportGenerator>,
        dispatcher: Arc<dyn ReportDispatcher>,
    ) -> Self {
        Self {
            products,
            jobs,
            generator,
            dispatcher,
        }
    }

    /// Returns today's completed or in-flight job for the same parameters,
    /// or creates and dispatches a new one.
    pub async fn submit(
        &self,
        request: ReportRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, AppError> {
        let params = request.canonicalize()?;
        let hash = params.hash()?;
        let day = now.date_naive();

        if let Some(done) = self.jobs.find_completed_job(&hash, day).await? {
            info!(job_id = %done.id, "Returning completed report for identical request");
            return Ok(SubmitOutcome::from_job(&done, true));
        }

        let job = ReportJob {
            id: Uuid::new_v4(),
            job_type: params.report_type.clone(),
            parameters: serde_json::to_value(&params)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("encode report params: {e}")))?,
            parameters_hash: hash.clone(),
            created_day: day,
            state: JobState::Pending,
            result_ref: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };

        for _ in 0..MAX_SUBMIT_ATTEMPTS {
            if self.jobs.insert_job(&job).await? {
                self.dispatch_new(&job, now).await?;
                info!(
                    job_id = %job.id,
                    main = %params.main_identifier,
                    competitors = params.competitor_identifiers.len(),
                    "Report job submitted"
                );
                return Ok(SubmitOutcome::from_job(&job, false));
            }
            // Lost the race: the winner's job is live unless it failed in between.
            if let Some(live) = self.jobs.find_live_job(&hash, day).await? {
                return Ok(SubmitOutcome::from_job(&live, true));
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "could not settle a report job for parameters {hash}"
        )))
    }

    async fn dispatch_new(&self, job: &ReportJob, now: DateTime<Utc>) -> Result<(), AppError> {
        let Err(e) = self.dispatcher.dispatch(job.id).await else {
            return Ok(());
        };
        warn!(job_id = %job.id, "Report dispatch failed: {e}");
        let failed = ReportJob {
            state: JobState::Failed,
            error_message: Some(format!("dispatch failed: {e}")),
            completed_at: Some(now),
            ..job.clone()
        };
        self.jobs.update_job(JobState::Pending, &failed).await?;
        Err(e)
    }

    /// Executes a pending job. Generation or persistence failures end the job
    /// in `failed` and are returned as `Ok`; errors are reserved for jobs
    /// that could not be started or whose final state could not be written.
    pub async fn run(&self, job_id: Uuid) -> Result<ReportJob, AppError> {
        let job = self.status(job_id).await?;
        if job.state != JobState::Pending {
            return Err(AppError::invalid_transition(
                format!("report job {job_id}"),
                job.state,
                "start",
            ));
        }

        let started = Utc::now();
        let running = ReportJob {
            state: JobState::Running,
            started_at: Some(started),
            ..job
        };
        if !self.jobs.update_job(JobState::Pending, &running).await? {
            let current = self.status(job_id).await?;
            return Err(AppError::invalid_transition(
                format!("report job {job_id}"),
                current.state,
                "start",
            ));
        }

        let finished = match self.produce(&running, started).await {
            Ok(result) => ReportJob {
                state: JobState::Completed,
                result_ref: Some(result.id.to_string()),
                completed_at: Some(Utc::now()),
                ..running
            },
            Err(e) => {
                warn!(%job_id, "Report job failed: {e}");
                ReportJob {
                    state: JobState::Failed,
                    error_message: Some(e.to_string()),
                    completed_at: Some(Utc::now()),
                    ..running
                }
            }
        };

        match self.jobs.update_job(JobState::Running, &finished).await {
            Ok(true) => Ok(finished),
            Ok(false) => {
                let current = self.status(job_id).await?;
                if let Some(result_id) = &finished.result_ref {
                    error!(
                        %job_id,
                        result_id = %result_id,
                        state = %current.state,
                        "Report stored but job left running state before completion was recorded"
                    );
                }
                Err(AppError::invalid_transition(
                    format!("report job {job_id}"),
                    current.state,
                    finished.state,
                ))
            }
            Err(e) => {
                if let Some(result_id) = &finished.result_ref {
                    error!(
                        %job_id,
                        result_id = %result_id,
                        "Report stored but completion not recorded: {e}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn produce(
        &self,
        job: &ReportJob,
        started: DateTime<Utc>,
    ) -> Result<ReportResult, AppError> {
        let params: ReportParams = serde_json::from_value(job.parameters.clone())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("decode report params: {e}")))?;

        let data = comparison::gather(self.products.as_ref(), &params, started).await?;
        let content = self.generator.generate(&data).await?;
        if content.trim().is_empty() {
            return Err(AppError::Llm("report generator returned no content".to_string()));
        }

        let result = ReportResult {
            id: Uuid::new_v4(),
            job_id: job.id,
            report_type: params.report_type.clone(),
            metadata: json!({
                "main_identifier": params.main_identifier,
                "competitor_count": params.competitor_identifiers.len(),
                "window_days": params.window_days,
                "generated_at": data.generated_at,
                "content_length": content.len(),
                "products_with_data": data.products_with_data(),
            }),
            content,
            created_at: Utc::now(),
        };
        self.jobs.insert_result(&result).await?;
        Ok(result)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<ReportJob, AppError> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report job {job_id}")))
    }

    pub async fn download(&self, job_id: Uuid) -> Result<ReportResult, AppError> {
        let job = self.status(job_id).await?;
        if job.state != JobState::Completed {
            return Err(AppError::NotReady {
                job_id: job_id.to_string(),
                state: job.state.to_string(),
            });
        }
        self.jobs.get_result(job_id).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("completed report job {job_id} has no result"))
        })
    }

    pub async fn list_jobs(&self, state: JobState, limit: i64) -> Result<Vec<ReportJob>, AppError> {
        self.jobs
            .list_jobs(state, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }
}
