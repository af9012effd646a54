//! Scrape-results webhook payload and per-item validation.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::models::product::{normalize_identifier, RankEntry};

pub const RUN_SUCCEEDED: &str = "succeeded";

/// One batch-completion event from the scraping actor.
///
/// Items stay as raw JSON until validated one by one, so a malformed record
/// only affects its own identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeWebhook {
    #[serde(default)]
    pub event_type: Option<String>,
    pub run_id: String,
    pub status: String,
    /// Identifiers the run was launched for.
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl ScrapeWebhook {
    pub fn succeeded(&self) -> bool {
        self.status.eq_ignore_ascii_case(RUN_SUCCEEDED)
    }

    /// Normalized, de-duplicated requested identifiers in payload order.
    pub fn requested(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.identifiers.len());
        for id in self.identifiers.iter().filter_map(|i| normalize_identifier(i)) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

/// Typed view of a record's fields. The identifier is read from the raw
/// value before this is parsed.
#[derive(Debug, Clone, Deserialize)]
struct RawItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    review_count: Option<i64>,
    #[serde(default)]
    ranks: Vec<RankEntry>,
}

/// A scraped record that passed validation.
#[derive(Debug, Clone)]
pub struct ScrapedItem {
    pub identifier: String,
    pub title: Option<String>,
    pub categories: Vec<String>,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub ranks: Vec<RankEntry>,
    pub raw: Value,
}

/// Outcome of validating one raw item. `identifier` is set whenever the item
/// names one, even if the rest of it is invalid.
#[derive(Debug)]
pub struct ItemCheck {
    pub identifier: Option<String>,
    pub result: Result<ScrapedItem, AppError>,
}

fn reject(identifier: &str, reason: impl Into<String>) -> AppError {
    AppError::PermanentUpstream(format!("record for {identifier}: {}", reason.into()))
}

pub fn validate_item(raw: &Value) -> ItemCheck {
    let identifier = raw
        .get("identifier")
        .and_then(Value::as_str)
        .and_then(normalize_identifier);

    let Some(id) = identifier.clone() else {
        return ItemCheck {
            identifier: None,
            result: Err(AppError::PermanentUpstream(
                "record without an identifier".to_string(),
            )),
        };
    };

    let result = serde_json::from_value::<RawItem>(raw.clone())
        .map_err(|e| reject(&id, e.to_string()))
        .and_then(|item| check_fields(&id, item, raw));

    ItemCheck { identifier, result }
}

fn check_fields(id: &str, item: RawItem, raw: &Value) -> Result<ScrapedItem, AppError> {
    if let Some(price) = item.price {
        if !price.is_finite() || price < 0.0 {
            return Err(reject(id, format!("invalid price {price}")));
        }
    }
    if let Some(rating) = item.rating {
        if !(0.0..=5.0).contains(&rating) {
            return Err(reject(id, format!("rating {rating} outside 0-5")));
        }
    }
    if let Some(count) = item.review_count {
        if count < 0 {
            return Err(reject(id, format!("negative review_count {count}")));
        }
    }
    for entry in &item.ranks {
        if entry.category.trim().is_empty() || entry.rank < 1 {
            return Err(reject(id, "malformed rank entry"));
        }
    }

    Ok(ScrapedItem {
        identifier: id.to_string(),
        title: item.title.filter(|t| !t.trim().is_empty()),
        categories: item.categories,
        price: item.price,
        rating: item.rating,
        review_count: item.review_count,
        ranks: item.ranks,
        raw: raw.clone(),
    })
}
