//! Report content generation: comparison data in, Markdown prose out.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::llm_client::LlmClient;
use crate::reports::comparison::ComparisonData;
use crate::reports::prompts::{COMPETITOR_REPORT_PROMPT_TEMPLATE, REPORT_SYSTEM};

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Turns structured comparison data into report text.
///
/// Carried by the report orchestrator as `Arc<dyn ReportGenerator>`.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, data: &ComparisonData) -> Result<String, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LlmReportGenerator
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmReportGenerator(pub LlmClient);

#[async_trait]
impl ReportGenerator for LlmReportGenerator {
    async fn generate(&self, data: &ComparisonData) -> Result<String, AppError> {
        let prompt = build_prompt(data)?;
        self.0
            .call_text(&prompt, REPORT_SYSTEM)
            .await
            .map_err(|e| AppError::Llm(format!("Report generation failed: {e}")))
    }
}

fn build_prompt(data: &ComparisonData) -> Result<String, AppError> {
    let comparison_json = serde_json::to_string_pretty(data)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("encode comparison data: {e}")))?;
    Ok(COMPETITOR_REPORT_PROMPT_TEMPLATE
        .replace("{main_identifier}", &data.main.identifier)
        .replace("{competitor_count}", &data.competitors.len().to_string())
        .replace("{window_days}", &data.window_days.to_string())
        .replace("{comparison_json}", &comparison_json))
}
