//! Periodic scrape trigger: select due identifiers, claim them, launch one run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::task::TaskEvent;
use crate::tasks::launcher::ScrapeLauncher;
use crate::tasks::registry::Registry;
use crate::tasks::selector::WorkSelector;

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct TickSummary {
    pub selected: usize,
    pub claimed: usize,
    pub skipped: usize,
    pub run_id: Option<String>,
    pub launch_failed: bool,
}

pub struct Scheduler {
    selector: WorkSelector,
    registry: Arc<Registry>,
    launcher: Arc<dyn ScrapeLauncher>,
    batch_limit: usize,
}

impl Scheduler {
    pub fn new(
        selector: WorkSelector,
        registry: Arc<Registry>,
        launcher: Arc<dyn ScrapeLauncher>,
        batch_limit: usize,
    ) -> Self {
        Self {
            selector,
            registry,
            launcher,
            batch_limit,
        }
    }

    /// Runs `tick` every `period` until the process exits. Errors are logged
    /// and the next tick proceeds normally.
    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Scrape scheduler started (every {}s, batch limit {})",
            period.as_secs(),
            self.batch_limit
        );
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                error!("Scrape scheduler tick failed: {e}");
            }
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, AppError> {
        let selected = self.selector.select(self.batch_limit, now).await?;
        let mut summary = TickSummary {
            selected: selected.len(),
            ..TickSummary::default()
        };

        // A store error stops further claims, but whatever was already
        // claimed is still launched so no task is left running unlaunched.
        let mut claimed = Vec::with_capacity(selected.len());
        let mut halted = None;
        for task in &selected {
            match self.registry.claim_for_dispatch(&task.identifier, now).await {
                Ok(status) => claimed.push(status.identifier),
                Err(AppError::AlreadyDispatched(_)) | Err(AppError::InvalidTransition { .. }) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!(identifier = %task.identifier, "Claim failed, halting this tick: {e}");
                    halted = Some(e);
                    break;
                }
            }
        }
        summary.claimed = claimed.len();

        if !claimed.is_empty() {
            self.launch(&claimed, now, &mut summary).await;
        }
        match halted {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Launches one run for `claimed` and records it as their owner. A failed
    /// launch fails every claimed task.
    async fn launch(&self, claimed: &[String], now: DateTime<Utc>, summary: &mut TickSummary) {
        match self.launcher.launch(claimed).await {
            Ok(run_id) => {
                for identifier in claimed {
                    if let Err(e) = self.registry.assign_run(identifier, &run_id).await {
                        warn!(identifier = %identifier, run_id = %run_id, "Run not recorded on task: {e}");
                    }
                }
                info!(run_id = %run_id, count = claimed.len(), "Scrape run launched");
                summary.run_id = Some(run_id);
            }
            Err(e) => {
                warn!("Scrape launch failed for {} identifiers: {e}", claimed.len());
                summary.launch_failed = true;
                for identifier in claimed {
                    if let Err(e) = self.registry.advance(identifier, TaskEvent::Fail, now).await {
                        error!(identifier = %identifier, "Could not record launch failure: {e}");
                    }
                }
            }
        }
    }
}
