//! Report request parameters: validation, canonical form and idempotency hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::models::product::normalize_identifier;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 30;
pub const MAX_COMPETITORS: usize = 10;
pub const COMPETITOR_ANALYSIS: &str = "competitor_analysis";

const SUPPORTED_REPORT_TYPES: &[&str] = &[COMPETITOR_ANALYSIS];

/// A report request as received from the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub main_identifier: String,
    #[serde(default)]
    pub competitor_identifiers: Vec<String>,
    pub window_days: Option<u32>,
    pub report_type: Option<String>,
}

/// Canonical parameters. Two requests that mean the same thing produce equal
/// values here, and therefore equal hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportParams {
    pub main_identifier: String,
    pub competitor_identifiers: Vec<String>,
    pub window_days: u32,
    pub report_type: String,
}

impl ReportRequest {
    pub fn canonicalize(self) -> Result<ReportParams, AppError> {
        let main_identifier = normalize_identifier(&self.main_identifier)
            .ok_or_else(|| AppError::Validation("main_identifier cannot be empty".to_string()))?;

        let mut competitors = Vec::with_capacity(self.competitor_identifiers.len());
        for raw in &self.competitor_identifiers {
            let id = normalize_identifier(raw).ok_or_else(|| {
                AppError::Validation("competitor_identifiers cannot contain blanks".to_string())
            })?;
            if id != main_identifier {
                competitors.push(id);
            }
        }
        competitors.sort();
        competitors.dedup();

        if competitors.is_empty() {
            return Err(AppError::Validation(
                "at least one competitor other than the main identifier is required".to_string(),
            ));
        }
        if competitors.len() > MAX_COMPETITORS {
            return Err(AppError::Validation(format!(
                "at most {MAX_COMPETITORS} competitors are allowed, got {}",
                competitors.len()
            )));
        }

        let window_days = self.window_days.unwrap_or(DEFAULT_WINDOW_DAYS);
        if !(1..=MAX_WINDOW_DAYS).contains(&window_days) {
            return Err(AppError::Validation(format!(
                "window_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }

        let report_type = self
            .report_type
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| COMPETITOR_ANALYSIS.to_string());
        if !SUPPORTED_REPORT_TYPES.contains(&report_type.as_str()) {
            return Err(AppError::Validation(format!(
                "unsupported report_type '{report_type}'"
            )));
        }

        Ok(ReportParams {
            main_identifier,
            competitor_identifiers: competitors,
            window_days,
            report_type,
        })
    }
}

impl ReportParams {
    /// Hex SHA-256 of the canonical JSON encoding. Field order is fixed by the
    /// struct, and competitors are already sorted.
    pub fn hash(&self) -> Result<String, AppError> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("encode report params: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn all_identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.main_identifier.as_str())
            .chain(self.competitor_identifiers.iter().map(String::as_str))
    }
}
