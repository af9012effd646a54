use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a number is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub anthropic_api_key: String,
    pub scraper_endpoint: String,
    pub scraper_api_token: String,
    /// Externally reachable base URL; the scraper posts results back here.
    pub public_base_url: String,
    pub port: u16,
    pub rust_log: String,
    pub scrape_interval_secs: u64,
    pub scrape_batch_limit: usize,
    pub running_timeout_secs: i64,
    pub max_scrape_retries: i32,
    pub rule_cache_ttl_secs: u64,
    pub ingest_concurrency: usize,
    pub report_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            scraper_endpoint: require_env("SCRAPER_ENDPOINT")?,
            scraper_api_token: require_env("SCRAPER_API_TOKEN")?,
            public_base_url: require_env("PUBLIC_BASE_URL")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            scrape_interval_secs: positive(
                env_or("SCRAPE_INTERVAL_SECS", 300)?,
                "SCRAPE_INTERVAL_SECS",
            )?,
            scrape_batch_limit: positive(
                env_or("SCRAPE_BATCH_LIMIT", 100)?,
                "SCRAPE_BATCH_LIMIT",
            )?,
            running_timeout_secs: positive(
                env_or("RUNNING_TIMEOUT_SECS", 300)?,
                "RUNNING_TIMEOUT_SECS",
            )?,
            max_scrape_retries: positive(
                env_or("MAX_SCRAPE_RETRIES", 3)?,
                "MAX_SCRAPE_RETRIES",
            )?,
            rule_cache_ttl_secs: env_or("RULE_CACHE_TTL_SECS", 3600)?,
            ingest_concurrency: positive(
                env_or("INGEST_CONCURRENCY", 8)?,
                "INGEST_CONCURRENCY",
            )?,
            report_workers: positive(env_or("REPORT_WORKERS", 2)?, "REPORT_WORKERS")?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'"))
}

fn positive<T: Default + PartialOrd>(value: T, key: &str) -> Result<T> {
    if value <= T::default() {
        anyhow::bail!("Environment variable '{key}' must be greater than zero");
    }
    Ok(value)
}
