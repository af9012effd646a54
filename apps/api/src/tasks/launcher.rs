//! Client for the external scraping actor.
//!
//! A launch only starts a run. Results arrive later through the scrape-results
//! webhook, addressed to the URL sent with the launch request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::errors::AppError;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scraper rejected the run (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("scraper returned no run id")]
    MissingRunId,
}

impl From<LaunchError> for AppError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::Rejected { status, .. } if status < 500 && status != 429 => {
                AppError::PermanentUpstream(err.to_string())
            }
            other => AppError::TransientUpstream(other.to_string()),
        }
    }
}

/// Starts scraper runs. Carried by the scheduler as `Arc<dyn ScrapeLauncher>`.
#[async_trait]
pub trait ScrapeLauncher: Send + Sync {
    /// Starts one run for `identifiers` and returns the scraper's run id.
    async fn launch(&self, identifiers: &[String]) -> Result<String, LaunchError>;
}

#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    identifiers: &'a [String],
    webhook_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    run_id: Option<String>,
}

pub struct HttpScrapeLauncher {
    client: Client,
    endpoint: String,
    api_token: String,
    webhook_url: String,
}

impl HttpScrapeLauncher {
    pub fn new(
        endpoint: String,
        api_token: String,
        public_base_url: &str,
    ) -> Result<Self, LaunchError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint,
            api_token,
            webhook_url: webhook_url(public_base_url),
        })
    }
}

/// The scrape-results endpoint as seen from outside.
pub fn webhook_url(public_base_url: &str) -> String {
    format!(
        "{}/webhook/scrape-results",
        public_base_url.trim_end_matches('/')
    )
}

#[async_trait]
impl ScrapeLauncher for HttpScrapeLauncher {
    async fn launch(&self, identifiers: &[String]) -> Result<String, LaunchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&LaunchRequest {
                identifiers,
                webhook_url: &self.webhook_url,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LaunchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: LaunchResponse = response.json().await?;
        let run_id = body.run_id.ok_or(LaunchError::MissingRunId)?;
        info!(
            run_id = %run_id,
            count = identifiers.len(),
            "Scrape run launched"
        );
        Ok(run_id)
    }
}
