mod alerts;
mod config;
mod db;
mod errors;
mod ingestion;
mod llm_client;
mod models;
mod reports;
mod routes;
mod state;
mod store;
mod tasks;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::alerts::cache::RuleCache;
use crate::config::Config;
use crate::db::create_pool;
use crate::ingestion::coordinator::IngestionCoordinator;
use crate::llm_client::LlmClient;
use crate::reports::dispatch::{run_worker, RedisDispatcher, REPORT_QUEUE_KEY};
use crate::reports::generator::LlmReportGenerator;
use crate::reports::orchestrator::ReportOrchestrator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::PgStore;
use crate::tasks::launcher::HttpScrapeLauncher;
use crate::tasks::registry::Registry;
use crate::tasks::scheduler::Scheduler;
use crate::tasks::selector::{EligibilityPolicy, WorkSelector};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shelfwatch API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db));

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let dispatcher = Arc::new(
        RedisDispatcher::connect(redis.clone(), REPORT_QUEUE_KEY)
            .await
            .context("Failed to connect to Redis")?,
    );

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())
        .context("Failed to build LLM client")?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let policy = EligibilityPolicy {
        running_timeout: chrono::Duration::seconds(config.running_timeout_secs),
        max_retries: config.max_scrape_retries,
        ..EligibilityPolicy::default()
    };
    info!(
        "Eligibility: rescrape after {}h, running timeout {}s, max retries {}",
        policy.rescrape_after.num_hours(),
        policy.running_timeout.num_seconds(),
        policy.max_retries
    );

    let registry = Arc::new(Registry::new(store.clone(), store.clone(), policy.clone()));
    let rules = Arc::new(RuleCache::new(
        store.clone(),
        Duration::from_secs(config.rule_cache_ttl_secs),
    ));
    let ingestion = Arc::new(IngestionCoordinator::new(
        store.clone(),
        store.clone(),
        registry.clone(),
        rules.clone(),
        config.ingest_concurrency,
    ));
    let reports = Arc::new(ReportOrchestrator::new(
        store.clone(),
        store.clone(),
        Arc::new(LlmReportGenerator(llm)),
        dispatcher,
    ));

    // Background work: scrape scheduler and report workers
    let launcher = HttpScrapeLauncher::new(
        config.scraper_endpoint.clone(),
        config.scraper_api_token.clone(),
        &config.public_base_url,
    )
    .context("Failed to build scraper client")?;
    let scheduler = Scheduler::new(
        WorkSelector::new(store.clone(), policy),
        registry.clone(),
        Arc::new(launcher),
        config.scrape_batch_limit,
    );
    tokio::spawn(scheduler.run(Duration::from_secs(config.scrape_interval_secs)));

    for worker in 0..config.report_workers {
        tokio::spawn(run_worker(
            redis.clone(),
            REPORT_QUEUE_KEY.to_string(),
            reports.clone(),
            worker,
        ));
    }
    info!("{} report worker(s) started", config.report_workers);

    // Build app state
    let state = AppState {
        registry,
        products: store.clone(),
        alerts: store,
        rules,
        ingestion,
        reports,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
