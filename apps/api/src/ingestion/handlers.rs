//! Inbound delivery endpoint for the scraping actor.

use axum::{extract::State, Json};
use chrono::Utc;

use crate::errors::AppError;
use crate::ingestion::coordinator::IngestSummary;
use crate::ingestion::payload::ScrapeWebhook;
use crate::state::AppState;

/// POST /webhook/scrape-results
///
/// Accepts one batch-completion event. Per-identifier failures are reported
/// in the summary; the delivery itself only fails when it cannot be parsed.
/// Re-delivering the same run is safe.
pub async fn handle_scrape_results(
    State(state): State<AppState>,
    Json(webhook): Json<ScrapeWebhook>,
) -> Result<Json<IngestSummary>, AppError> {
    if webhook.run_id.trim().is_empty() {
        return Err(AppError::PermanentUpstream(
            "webhook is missing run_id".to_string(),
        ));
    }
    tracing::info!(
        run_id = %webhook.run_id,
        event_type = webhook.event_type.as_deref().unwrap_or("unknown"),
        items = webhook.items.len(),
        "Received scrape results"
    );
    Ok(Json(state.ingestion.ingest(webhook, Utc::now()).await))
}
