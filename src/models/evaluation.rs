use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::SchemaContext;
use super::translation::TranslationResult;

const FILTER_WORDS: &[&str] = &[
    "greater than", "less than", "more than", "fewer than", "at least", "at most", "above",
    "below", "over", "under", "equals", "equal to", "between", "negative", "positive",
    "exceed", "where", "with", "containing",
];
const AGGREGATE_WORDS: &[&str] = &[
    "total", "sum", "average", "avg", "mean", "count", "how many", "number of", "minimum",
    "maximum",
];
const GROUP_WORDS: &[&str] = &[" per ", " across ", " for each ", " by "];
const RANKING_WORDS: &[&str] = &["top", "bottom", "highest", "lowest", "best", "worst"];

/// The SQL shape a query should produce, used to grade translations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedShape {
    #[serde(default)]
    pub expects_where: bool,
    #[serde(default)]
    pub expects_aggregation: bool,
    #[serde(default)]
    pub expects_grouping: bool,
    #[serde(default)]
    pub expects_ranking: bool,
}

impl ExpectedShape {
    /// Rough shape guess for unlabeled queries, from vocabulary alone
    pub fn infer(query: &str) -> Self {
        let lowered = format!(" {} ", query.to_lowercase());
        let has_word = |word: &str| {
            lowered
                .match_indices(word)
                .any(|(idx, _)| {
                    let before = lowered[..idx].chars().last().map(|c| !c.is_alphanumeric()).unwrap_or(true);
                    let after = lowered[idx + word.len()..]
                        .chars()
                        .next()
                        .map(|c| !c.is_alphanumeric())
                        .unwrap_or(true);
                    before && after
                })
        };

        let expects_ranking = RANKING_WORDS.iter().any(|w| has_word(w));
        Self {
            expects_where: FILTER_WORDS.iter().any(|w| has_word(w)),
            expects_aggregation: AGGREGATE_WORDS.iter().any(|w| has_word(w)),
            expects_grouping: !expects_ranking && GROUP_WORDS.iter().any(|w| lowered.contains(w)),
            expects_ranking,
        }
    }

    /// An explicit column list is the right answer
    pub fn expects_specific_select(&self) -> bool {
        self.expects_aggregation || self.expects_grouping
    }
}

/// One entry of a harness query set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledQuery {
    pub query: String,
    #[serde(default)]
    pub expected: Option<ExpectedShape>,
}

impl LabeledQuery {
    pub fn new(query: impl Into<String>, expected: ExpectedShape) -> Self {
        Self {
            query: query.into(),
            expected: Some(expected),
        }
    }

    pub fn unlabeled(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            expected: None,
        }
    }

    pub fn expected_shape(&self) -> ExpectedShape {
        self.expected.unwrap_or_else(|| ExpectedShape::infer(&self.query))
    }
}

/// Rubric grade of a single translation, 0-100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub where_clause_score: f64,
    pub select_specificity_score: f64,
    pub aggregation_score: f64,
    pub limit_score: f64,
    pub confidence_score: f64,
    pub success_score: f64,
    pub total: f64,
}

impl QualityScore {
    /// Zero credit, used for failed translations
    pub fn zero() -> Self {
        Self::default()
    }
}

/// One strategy's attempt at one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub result: TranslationResult,
    pub score: QualityScore,
    pub elapsed_ms: f64,
}

/// Side-by-side results of every strategy for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub query: String,
    pub expected: ExpectedShape,
    pub per_strategy: BTreeMap<String, StrategyRun>,
}

/// Aggregate over the whole query set for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy: String,
    pub queries: usize,
    pub total_points: f64,
    pub mean_total: f64,
    pub success_rate: f64,
    pub mean_confidence: f64,
    pub mean_elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub table_name: String,
    pub strategies: Vec<String>,
    pub comparisons: Vec<StrategyComparison>,
    pub summaries: Vec<StrategySummary>,
    pub recommended_strategy: Option<String>,
}

/// Listing row for stored reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub table_name: String,
    pub recommended_strategy: Option<String>,
    pub query_count: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluationRequest {
    #[serde(default)]
    pub schema: Option<SchemaContext>,
    #[serde(default)]
    pub queries: Option<Vec<LabeledQuery>>,
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_ranking_shape() {
        let shape = ExpectedShape::infer("Top 5 regions by actual sales");
        assert!(shape.expects_ranking);
        assert!(!shape.expects_grouping);
        assert!(!shape.expects_where);
    }

    #[test]
    fn test_infer_filter_and_aggregate_shape() {
        let shape = ExpectedShape::infer("Total sales per region where profit is above 100");
        assert!(shape.expects_where);
        assert!(shape.expects_aggregation);
        assert!(shape.expects_grouping);
        assert!(shape.expects_specific_select());
    }

    #[test]
    fn test_infer_ignores_embedded_words() {
        // "overall" contains "over", "summary" contains "sum"
        let shape = ExpectedShape::infer("overall summary");
        assert!(!shape.expects_where);
        assert!(!shape.expects_aggregation);
    }

    #[test]
    fn test_labeled_query_prefers_label() {
        let labeled = LabeledQuery::new("show everything", ExpectedShape { expects_where: true, ..Default::default() });
        assert!(labeled.expected_shape().expects_where);
        assert!(!LabeledQuery::unlabeled("show everything").expected_shape().expects_where);
    }
}
