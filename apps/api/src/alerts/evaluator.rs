//! Alert Rule Evaluator: pure comparison of two consecutive snapshots
//! against an immutable rule set.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::alert::{AlertRecord, AlertRule, ChangeKind, Direction, ThresholdKind};
use crate::models::product::Snapshot;

/// An immutable, consistent view of the active rules, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<AlertRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: rules.into_iter().filter(|r| r.enabled).collect(),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One rule firing on one value pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredAlert {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub change_kind: ChangeKind,
    /// Rank category for rank rules.
    pub category: Option<String>,
    pub previous_value: f64,
    pub current_value: f64,
    /// Signed change in the rule's threshold units (percent or absolute).
    pub change_value: f64,
    pub threshold_kind: ThresholdKind,
}

impl FiredAlert {
    pub fn message(&self) -> String {
        let change = match self.threshold_kind {
            ThresholdKind::Percentage => format!("{:+.2}%", self.change_value),
            ThresholdKind::Absolute => format!("{:+.2}", self.change_value),
        };
        match (&self.change_kind, &self.category) {
            (ChangeKind::Rank, Some(category)) => format!(
                "rank in {category} changed from #{} to #{} ({change})",
                self.previous_value, self.current_value
            ),
            (ChangeKind::ReviewCount, _) => format!(
                "review_count changed from {} to {} ({change})",
                self.previous_value, self.current_value
            ),
            (kind, _) => format!(
                "{kind} changed from {:.2} to {:.2} ({change})",
                self.previous_value, self.current_value
            ),
        }
    }

    pub fn into_record(self, latest: &Snapshot) -> AlertRecord {
        AlertRecord {
            id: Uuid::new_v4(),
            identifier: latest.identifier.clone(),
            rule_id: self.rule_id,
            message: self.message(),
            category: self.category.unwrap_or_default(),
            previous_value: self.previous_value,
            current_value: self.current_value,
            change_value: self.change_value,
            snapshot_id: latest.id,
            snapshot_date: latest.snapshot_date,
            created_at: Utc::now(),
        }
    }
}

/// Value pairs a rule of `kind` compares, with the rank category where one
/// applies. Pairs with a missing side are left out.
fn value_pairs(
    kind: ChangeKind,
    previous: &Snapshot,
    latest: &Snapshot,
) -> Vec<(Option<String>, f64, f64)> {
    let scalar = |prev: Option<f64>, cur: Option<f64>| match (prev, cur) {
        (Some(p), Some(c)) => vec![(None, p, c)],
        _ => vec![],
    };
    match kind {
        ChangeKind::Price => scalar(previous.price, latest.price),
        ChangeKind::Rating => scalar(previous.rating, latest.rating),
        ChangeKind::ReviewCount => scalar(
            previous.review_count.map(|v| v as f64),
            latest.review_count.map(|v| v as f64),
        ),
        ChangeKind::Rank => latest
            .ranks
            .iter()
            .filter_map(|cur| {
                previous
                    .ranks
                    .iter()
                    .find(|p| p.category == cur.category)
                    .map(|p| (Some(cur.category.clone()), p.rank as f64, cur.rank as f64))
            })
            .collect(),
    }
}

/// Signed change in the rule's units, or `None` when a percentage cannot be
/// computed against a zero base.
fn signed_change(kind: ThresholdKind, previous: f64, current: f64) -> Option<f64> {
    match kind {
        ThresholdKind::Percentage if previous == 0.0 => None,
        ThresholdKind::Percentage => Some((current - previous) / previous * 100.0),
        ThresholdKind::Absolute => Some(current - previous),
    }
}

fn fires(rule: &AlertRule, change: f64) -> bool {
    let direction_matches = match rule.direction {
        Direction::Increase => change > 0.0,
        Direction::Decrease => change < 0.0,
        Direction::Any => true,
    };
    direction_matches && change.abs() >= rule.threshold
}

/// Rules that fire between `previous` and `latest`, in rule order. With no
/// previous snapshot there is nothing to compare and nothing fires.
pub fn evaluate(
    previous: Option<&Snapshot>,
    latest: &Snapshot,
    rules: &RuleSet,
) -> Vec<FiredAlert> {
    let Some(previous) = previous else {
        return vec![];
    };

    let mut fired = Vec::new();
    for rule in rules.rules().iter().filter(|r| r.enabled) {
        for (category, prev, cur) in value_pairs(rule.change_kind, previous, latest) {
            let Some(change) = signed_change(rule.threshold_kind, prev, cur) else {
                continue;
            };
            if fires(rule, change) {
                fired.push(FiredAlert {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    change_kind: rule.change_kind,
                    category,
                    previous_value: prev,
                    current_value: cur,
                    change_value: change,
                    threshold_kind: rule.threshold_kind,
                });
            }
        }
    }
    fired
}
