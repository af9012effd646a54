// Prompt constants for competitor report generation.

/// System prompt for report writing. Output is Markdown prose, not JSON.
pub const REPORT_SYSTEM: &str = "You are a marketplace analyst writing competitor reports \
    for e-commerce sellers. Base every statement on the figures provided. \
    Do NOT invent prices, ratings, ranks or review counts. \
    When a figure is missing, say that it is unavailable instead of estimating it. \
    Respond with a Markdown document only.";

/// Report prompt template.
/// Replace: {main_identifier}, {competitor_count}, {window_days}, {comparison_json}
pub const COMPETITOR_REPORT_PROMPT_TEMPLATE: &str = r#"Write a competitor analysis report for product {main_identifier} against {competitor_count} competitors, covering the last {window_days} days.

The comparison data below is JSON:
- `main` and `competitors` hold each product's latest observed figures (`has_data = false` means the product has never been observed).
- `aggregates` summarises competitor price, rating and review count (min / max / avg).
- `deltas` are competitor minus main for each metric; a negative `primary_rank_diff` means the competitor ranks better.
- `trends` compare the first and last snapshot inside the window for each product.

Structure the report with these sections:

## 1. Executive summary
Position of the main product and the two or three most important differences.

## 2. Main product
Current price, rating, review count and rank, and how they moved over the window.

## 3. Competitors
One short paragraph per competitor with data.

## 4. Head-to-head comparison
Price competitiveness, quality signals (rating, reviews) and rank position.

## 5. Recommendations
Concrete pricing and positioning actions, each tied to a figure above.

COMPARISON DATA:
{comparison_json}"#;
