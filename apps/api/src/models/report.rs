use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(AppError::Validation(format!("unknown job state '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportJob {
    pub id: Uuid,
    pub job_type: String,
    pub parameters: Value,
    pub parameters_hash: String,
    pub created_day: NaiveDate,
    pub state: JobState,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReportJobRow {
    pub id: Uuid,
    pub job_type: String,
    pub parameters: Value,
    pub parameters_hash: String,
    pub created_day: NaiveDate,
    pub state: String,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReportJobRow> for ReportJob {
    type Error = AppError;

    fn try_from(row: ReportJobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("corrupt job state '{}'", row.state)))?;
        Ok(ReportJob {
            id: row.id,
            job_type: row.job_type,
            parameters: row.parameters,
            parameters_hash: row.parameters_hash,
            created_day: row.created_day,
            state,
            result_ref: row.result_ref,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Generated report body, attached 1:1 to a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub report_type: String,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
