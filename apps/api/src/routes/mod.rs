pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::alerts::handlers as alerts;
use crate::ingestion::handlers as ingestion;
use crate::reports::handlers as reports;
use crate::state::AppState;
use crate::tasks::handlers as tasks;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Tracked identifiers
        .route("/api/v1/products", post(tasks::handle_track))
        .route(
            "/api/v1/products/:identifier/status",
            get(tasks::handle_task_status),
        )
        .route(
            "/api/v1/products/:identifier/reinstate",
            post(tasks::handle_reinstate),
        )
        .route(
            "/api/v1/products/:identifier/snapshots/latest",
            get(tasks::handle_latest_snapshot),
        )
        // Alerts
        .route(
            "/api/v1/products/:identifier/alerts",
            get(alerts::handle_recent_alerts),
        )
        .route("/api/v1/rules/refresh", post(alerts::handle_refresh_rules))
        // Reports
        .route(
            "/api/v1/reports/competitors",
            post(reports::handle_submit_report),
        )
        .route("/api/v1/reports/jobs", get(reports::handle_list_jobs))
        .route("/api/v1/reports/jobs/:id", get(reports::handle_job_status))
        .route(
            "/api/v1/reports/:id/download",
            get(reports::handle_download),
        )
        // Scraper callback
        .route(
            "/webhook/scrape-results",
            post(ingestion::handle_scrape_results),
        )
        .with_state(state)
}
