//! Axum route handlers for competitor report jobs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::report::{JobState, ReportJob, ReportResult};
use crate::reports::orchestrator::SubmitOutcome;
use crate::reports::params::ReportRequest;
use crate::state::AppState;

const DEFAULT_JOB_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

/// POST /api/v1/reports/competitors
///
/// Returns 202 with a new job, or 200 with today's job for the same
/// parameters (`existing = true`).
pub async fn handle_submit_report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<(StatusCode, Json<SubmitOutcome>), AppError> {
    let outcome = state.reports.submit(request, Utc::now()).await?;
    let status = if outcome.existing {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(outcome)))
}

/// GET /api/v1/reports/jobs/:id
pub async fn handle_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ReportJob>, AppError> {
    Ok(Json(state.reports.status(job_id).await?))
}

/// GET /api/v1/reports/:id/download
///
/// 202 with the current state while the job is still pending or running.
pub async fn handle_download(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ReportResult>, AppError> {
    Ok(Json(state.reports.download(job_id).await?))
}

/// GET /api/v1/reports/jobs?state=running&limit=50
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<ReportJob>>, AppError> {
    let job_state: JobState = query.state.as_deref().unwrap_or("running").parse()?;
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT);
    Ok(Json(state.reports.list_jobs(job_state, limit).await?))
}
