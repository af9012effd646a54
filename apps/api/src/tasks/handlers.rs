//! Axum route handlers for tracked identifiers and their scrape tasks.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::product::normalize_identifier;
use crate::models::task::TaskStatus;
use crate::state::AppState;
use crate::tasks::registry::{Observation, TrackOutcome};

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub identifiers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub tracked: Vec<TrackOutcome>,
}

fn path_identifier(raw: &str) -> Result<String, AppError> {
    normalize_identifier(raw)
        .ok_or_else(|| AppError::Validation("identifier cannot be empty".to_string()))
}

/// POST /api/v1/products
///
/// Starts tracking identifiers. Already-tracked identifiers are reported with
/// `created = false` and keep their current task state.
pub async fn handle_track(
    State(state): State<AppState>,
    Json(request): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TrackResponse>), AppError> {
    if request.identifiers.is_empty() {
        return Err(AppError::Validation(
            "identifiers cannot be empty".to_string(),
        ));
    }
    let tracked = state.registry.track(&request.identifiers, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(TrackResponse { tracked })))
}

/// GET /api/v1/products/:identifier/status
pub async fn handle_task_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<TaskStatus>, AppError> {
    let identifier = path_identifier(&identifier)?;
    Ok(Json(state.registry.snapshot(&identifier).await?))
}

/// POST /api/v1/products/:identifier/reinstate
pub async fn handle_reinstate(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<TaskStatus>, AppError> {
    let identifier = path_identifier(&identifier)?;
    Ok(Json(state.registry.reinstate(&identifier, Utc::now()).await?))
}

/// GET /api/v1/products/:identifier/snapshots/latest
///
/// 200 with `snapshot: null` and the task state while the first scrape is
/// still outstanding; 404 only for identifiers that are not tracked.
pub async fn handle_latest_snapshot(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<Observation>, AppError> {
    let identifier = path_identifier(&identifier)?;
    Ok(Json(state.registry.observe(&identifier).await?))
}
