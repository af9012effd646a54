//! Multidimensional comparison of a main product against its competitors.
//!
//! `gather` reads snapshots; everything else here is pure and works only on
//! the snapshots it is handed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::product::{RankEntry, Snapshot};
use crate::reports::params::ReportParams;
use crate::store::ProductStore;

#[derive(Debug, Clone, Serialize)]
pub struct ProductFigures {
    pub identifier: String,
    pub has_data: bool,
    pub snapshot_date: Option<NaiveDate>,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub primary_rank: Option<RankEntry>,
    pub ranks: Vec<RankEntry>,
}

impl ProductFigures {
    fn from_snapshot(identifier: &str, snapshot: Option<&Snapshot>) -> Self {
        match snapshot {
            Some(s) => Self {
                identifier: identifier.to_string(),
                has_data: true,
                snapshot_date: Some(s.snapshot_date),
                price: s.price,
                rating: s.rating,
                review_count: s.review_count,
                primary_rank: s.primary_rank().cloned(),
                ranks: s.ranks.clone(),
            },
            None => Self {
                identifier: identifier.to_string(),
                has_data: false,
                snapshot_date: None,
                price: None,
                rating: None,
                review_count: None,
                primary_rank: None,
                ranks: vec![],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Spread {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl Spread {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.collect();
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self { min, max, avg })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompetitorAggregates {
    pub competitors_with_data: usize,
    pub price: Option<Spread>,
    pub rating: Option<Spread>,
    pub review_count: Option<Spread>,
}

/// Competitor minus main, per metric. `primary_rank_diff` is only set when
/// both primary ranks are in the same category.
#[derive(Debug, Clone, Serialize)]
pub struct CompetitorDelta {
    pub identifier: String,
    pub price_diff: Option<f64>,
    pub price_diff_percent: Option<f64>,
    pub rating_diff: Option<f64>,
    pub review_count_diff: Option<i64>,
    pub primary_rank_diff: Option<i64>,
}

/// Change between the first and last snapshot inside the window.
#[derive(Debug, Clone, Serialize)]
pub struct Trend {
    pub identifier: String,
    pub snapshots_in_window: usize,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub price_change: Option<f64>,
    pub rating_change: Option<f64>,
    pub review_count_change: Option<i64>,
    pub primary_rank_change: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonData {
    pub window_days: u32,
    pub generated_at: DateTime<Utc>,
    pub main: ProductFigures,
    pub competitors: Vec<ProductFigures>,
    pub aggregates: CompetitorAggregates,
    pub deltas: Vec<CompetitorDelta>,
    pub trends: Vec<Trend>,
}

impl ComparisonData {
    pub fn products_with_data(&self) -> usize {
        usize::from(self.main.has_data) + self.aggregates.competitors_with_data
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Computation
// ────────────────────────────────────────────────────────────────────────────

fn diff<T: std::ops::Sub<Output = T> + Copy>(main: Option<T>, other: Option<T>) -> Option<T> {
    Some(other? - main?)
}

fn same_category_rank_diff(main: Option<&RankEntry>, other: Option<&RankEntry>) -> Option<i64> {
    match (main, other) {
        (Some(m), Some(o)) if m.category == o.category => Some(o.rank - m.rank),
        _ => None,
    }
}

fn delta(main: &ProductFigures, other: &ProductFigures) -> CompetitorDelta {
    let price_diff = diff(main.price, other.price);
    let price_diff_percent = match (price_diff, main.price) {
        (Some(d), Some(base)) if base != 0.0 => Some(d / base * 100.0),
        _ => None,
    };
    CompetitorDelta {
        identifier: other.identifier.clone(),
        price_diff,
        price_diff_percent,
        rating_diff: diff(main.rating, other.rating),
        review_count_diff: diff(main.review_count, other.review_count),
        primary_rank_diff: same_category_rank_diff(
            main.primary_rank.as_ref(),
            other.primary_rank.as_ref(),
        ),
    }
}

fn trend(identifier: &str, window: &[Snapshot]) -> Trend {
    let (first, last) = match (window.first(), window.last()) {
        (Some(f), Some(l)) if window.len() >= 2 => (Some(f), Some(l)),
        _ => (None, None),
    };
    Trend {
        identifier: identifier.to_string(),
        snapshots_in_window: window.len(),
        from_date: first.map(|s| s.snapshot_date),
        to_date: last.map(|s| s.snapshot_date),
        price_change: first.zip(last).and_then(|(f, l)| diff(f.price, l.price)),
        rating_change: first.zip(last).and_then(|(f, l)| diff(f.rating, l.rating)),
        review_count_change: first
            .zip(last)
            .and_then(|(f, l)| diff(f.review_count, l.review_count)),
        primary_rank_change: first
            .zip(last)
            .and_then(|(f, l)| same_category_rank_diff(f.primary_rank(), l.primary_rank())),
    }
}

/// Builds the comparison from already-loaded snapshots. `history` holds each
/// identifier's in-window snapshots, oldest first.
pub fn build(
    params: &ReportParams,
    main_latest: &Snapshot,
    competitor_latest: &HashMap<String, Snapshot>,
    history: &HashMap<String, Vec<Snapshot>>,
    generated_at: DateTime<Utc>,
) -> ComparisonData {
    let main = ProductFigures::from_snapshot(&params.main_identifier, Some(main_latest));
    let competitors: Vec<ProductFigures> = params
        .competitor_identifiers
        .iter()
        .map(|id| ProductFigures::from_snapshot(id, competitor_latest.get(id)))
        .collect();

    let with_data: Vec<&ProductFigures> = competitors.iter().filter(|c| c.has_data).collect();
    let aggregates = CompetitorAggregates {
        competitors_with_data: with_data.len(),
        price: Spread::of(with_data.iter().filter_map(|c| c.price)),
        rating: Spread::of(with_data.iter().filter_map(|c| c.rating)),
        review_count: Spread::of(with_data.iter().filter_map(|c| c.review_count.map(|v| v as f64))),
    };

    let deltas = with_data.iter().map(|c| delta(&main, c)).collect();
    let empty = Vec::new();
    let trends = params
        .all_identifiers()
        .map(|id| trend(id, history.get(id).unwrap_or(&empty)))
        .collect();

    ComparisonData {
        window_days: params.window_days,
        generated_at,
        main,
        competitors,
        aggregates,
        deltas,
        trends,
    }
}

/// Loads the latest and in-window snapshots for every identifier in `params`
/// and builds the comparison. Fails with `InsufficientData` when the main
/// identifier has never been observed.
pub async fn gather(
    products: &dyn ProductStore,
    params: &ReportParams,
    now: DateTime<Utc>,
) -> Result<ComparisonData, AppError> {
    let main_latest = products
        .latest_snapshot(&params.main_identifier)
        .await?
        .ok_or_else(|| {
            AppError::InsufficientData(format!(
                "no snapshot available for main identifier {}",
                params.main_identifier
            ))
        })?;

    let mut competitor_latest = HashMap::new();
    for id in &params.competitor_identifiers {
        if let Some(snapshot) = products.latest_snapshot(id).await? {
            competitor_latest.insert(id.clone(), snapshot);
        }
    }

    let since = now.date_naive() - Duration::days(i64::from(params.window_days));
    let mut history = HashMap::new();
    for id in params.all_identifiers() {
        history.insert(id.to_string(), products.snapshots_since(id, since).await?);
    }

    Ok(build(params, &main_latest, &competitor_latest, &history, now))
}
