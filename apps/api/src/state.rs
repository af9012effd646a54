use std::sync::Arc;

use crate::alerts::cache::RuleCache;
use crate::ingestion::coordinator::IngestionCoordinator;
use crate::reports::orchestrator::ReportOrchestrator;
use crate::store::{AlertStore, ProductStore};
use crate::tasks::registry::Registry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub products: Arc<dyn ProductStore>,
    pub alerts: Arc<dyn AlertStore>,
    /// Active alert rules, reloaded after the cache TTL or on demand.
    pub rules: Arc<RuleCache>,
    pub ingestion: Arc<IngestionCoordinator>,
    pub reports: Arc<ReportOrchestrator>,
}
