use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Marketplace product codes are case-insensitive; the stored form is the
/// trimmed upper-case code. Returns `None` for blank input.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductRow {
    pub identifier: String,
    pub title: Option<String>,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (category, rank) pair scraped from a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub category: String,
    pub rank: i64,
}

/// Immutable observation of one identifier. Ordered per identifier by `seq`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub seq: i64,
    pub identifier: String,
    pub snapshot_date: NaiveDate,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub ranks: Vec<RankEntry>,
    pub raw_data: Value,
    pub source_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// The first rank entry is the product's main category.
    pub fn primary_rank(&self) -> Option<&RankEntry> {
        self.ranks.first()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub seq: i64,
    pub identifier: String,
    pub snapshot_date: NaiveDate,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub ranks: Json<Vec<RankEntry>>,
    pub raw_data: Value,
    pub source_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            seq: row.seq,
            identifier: row.identifier,
            snapshot_date: row.snapshot_date,
            price: row.price,
            rating: row.rating,
            review_count: row.review_count,
            ranks: row.ranks.0,
            raw_data: row.raw_data,
            source_run_id: row.source_run_id,
            created_at: row.created_at,
        }
    }
}

/// Snapshot contents before the store assigns identity and ordering.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub identifier: String,
    pub snapshot_date: NaiveDate,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub ranks: Vec<RankEntry>,
    pub raw_data: Value,
    pub source_run_id: Option<String>,
}

/// Descriptive metadata refreshed on every ingested record.
#[derive(Debug, Clone)]
pub struct ProductMetadata {
    pub identifier: String,
    pub title: Option<String>,
    pub categories: Vec<String>,
}
