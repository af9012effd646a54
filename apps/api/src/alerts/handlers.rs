//! Axum route handlers for alert records and the rule cache.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::alert::AlertRecord;
use crate::models::product::normalize_identifier;
use crate::state::AppState;

const DEFAULT_ALERT_LIMIT: i64 = 50;
const MAX_ALERT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub active_rules: usize,
}

/// GET /api/v1/products/:identifier/alerts?limit=50
///
/// Most recent alerts first.
pub async fn handle_recent_alerts(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Vec<AlertRecord>>, AppError> {
    let identifier = normalize_identifier(&identifier)
        .ok_or_else(|| AppError::Validation("identifier cannot be empty".to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);

    if state.products.get_product(&identifier).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Identifier {identifier} is not tracked"
        )));
    }
    Ok(Json(state.alerts.recent_alerts(&identifier, limit).await?))
}

/// POST /api/v1/rules/refresh
///
/// Reloads the active rule set now instead of waiting for the cache TTL.
pub async fn handle_refresh_rules(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, AppError> {
    let rules = state.rules.refresh().await?;
    Ok(Json(RefreshResponse {
        active_rules: rules.len(),
    }))
}
