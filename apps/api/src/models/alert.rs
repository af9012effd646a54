use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// Which snapshot metric a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Price,
    Rank,
    Rating,
    ReviewCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdKind {
    Percentage,
    Absolute,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Price => "price",
            ChangeKind::Rank => "rank",
            ChangeKind::Rating => "rating",
            ChangeKind::ReviewCount => "review_count",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unknown(field: &str, value: &str) -> AppError {
    AppError::Internal(anyhow::anyhow!("unknown {field} '{value}' in alert rule"))
}

impl FromStr for ChangeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(ChangeKind::Price),
            "rank" => Ok(ChangeKind::Rank),
            "rating" => Ok(ChangeKind::Rating),
            "review_count" => Ok(ChangeKind::ReviewCount),
            other => Err(unknown("change_kind", other)),
        }
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increase" => Ok(Direction::Increase),
            "decrease" => Ok(Direction::Decrease),
            "any" => Ok(Direction::Any),
            other => Err(unknown("direction", other)),
        }
    }
}

impl FromStr for ThresholdKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(ThresholdKind::Percentage),
            "absolute" => Ok(ThresholdKind::Absolute),
            other => Err(unknown("threshold_kind", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub change_kind: ChangeKind,
    pub direction: Direction,
    pub threshold: f64,
    pub threshold_kind: ThresholdKind,
    pub enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct AlertRuleRow {
    pub id: Uuid,
    pub name: String,
    pub change_kind: String,
    pub direction: String,
    pub threshold: f64,
    pub threshold_kind: String,
    pub enabled: bool,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = AppError;

    fn try_from(row: AlertRuleRow) -> Result<Self, Self::Error> {
        Ok(AlertRule {
            change_kind: row.change_kind.parse()?,
            direction: row.direction.parse()?,
            threshold_kind: row.threshold_kind.parse()?,
            id: row.id,
            name: row.name,
            threshold: row.threshold,
            enabled: row.enabled,
        })
    }
}

/// Immutable fact that a rule fired for an identifier on one snapshot.
/// `category` is empty except for rank rules.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRecord {
    pub id: Uuid,
    pub identifier: String,
    pub rule_id: Uuid,
    pub category: String,
    pub previous_value: f64,
    pub current_value: f64,
    pub change_value: f64,
    pub message: String,
    pub snapshot_id: Uuid,
    pub snapshot_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
