//! Background execution transport for report jobs.
//!
//! Job ids are pushed onto a Redis list. Each worker holds its own
//! connection and block-pops ids, so one slow report never stalls the
//! submit path or another worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::reports::orchestrator::ReportOrchestrator;

pub const REPORT_QUEUE_KEY: &str = "shelfwatch:report_jobs";

/// Seconds a worker blocks on an empty queue before polling again.
const POP_TIMEOUT_SECS: u64 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ReportDispatcher: Send + Sync {
    /// Hands `job_id` to the background workers.
    async fn dispatch(&self, job_id: Uuid) -> Result<(), AppError>;
}

pub struct RedisDispatcher {
    conn: ConnectionManager,
    queue_key: String,
}

impl RedisDispatcher {
    pub async fn connect(client: Client, queue_key: &str) -> Result<Self, AppError> {
        let conn = ConnectionManager::new(client).await?;
        info!(queue = %queue_key, "Connected to Redis for report dispatch");
        Ok(Self {
            conn,
            queue_key: queue_key.to_string(),
        })
    }
}

#[async_trait]
impl ReportDispatcher for RedisDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await?;
        debug!(%job_id, "Report job queued");
        Ok(())
    }
}

/// Pops job ids until the process exits, running each to completion.
pub async fn run_worker(
    client: Client,
    queue_key: String,
    orchestrator: Arc<ReportOrchestrator>,
    worker: usize,
) {
    info!(worker, queue = %queue_key, "Report worker started");
    loop {
        let mut conn = match client.get_multiplexed_tokio_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(worker, "Report worker cannot reach Redis: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        loop {
            let popped: Result<Option<(String, String)>, redis::RedisError> = redis::cmd("BRPOP")
                .arg(&queue_key)
                .arg(POP_TIMEOUT_SECS)
                .query_async(&mut conn)
                .await;

            let payload = match popped {
                Ok(Some((_, payload))) => payload,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker, "Report queue pop failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    break;
                }
            };

            let Ok(job_id) = Uuid::parse_str(&payload) else {
                warn!(worker, payload = %payload, "Discarding malformed report job id");
                continue;
            };

            match orchestrator.run(job_id).await {
                Ok(job) => info!(worker, %job_id, state = %job.state, "Report job finished"),
                Err(e) => warn!(worker, %job_id, "Report job not run: {e}"),
            }
        }
    }
}
