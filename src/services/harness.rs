// Evaluation harness
//
// Runs every (query, strategy) pair with bounded parallelism, grades each
// result, and aggregates per-strategy totals. Results are put back into
// (query, strategy) order before anything is summed, so the report does not
// depend on completion order.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::models::{
    ColumnInfo, ColumnType, ExpectedShape, HarnessReport, LabeledQuery, SchemaContext, StrategyComparison,
    StrategyRun, StrategySummary,
};
use crate::services::evaluator::QualityEvaluator;
use crate::services::strategies::TranslationStrategy;

pub struct EvaluationHarness {
    strategies: Vec<Arc<dyn TranslationStrategy>>,
    concurrency: usize,
}

impl EvaluationHarness {
    pub fn new(strategies: Vec<Arc<dyn TranslationStrategy>>, concurrency: usize) -> Self {
        Self {
            strategies,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, queries: &[LabeledQuery], schema: &SchemaContext) -> HarnessReport {
        let started = Instant::now();
        tracing::info!(
            "Evaluating {} queries against {} strategies (concurrency {})",
            queries.len(),
            self.strategies.len(),
            self.concurrency
        );

        let mut pending = Vec::with_capacity(queries.len() * self.strategies.len());
        for (qi, query) in queries.iter().enumerate() {
            for (si, strategy) in self.strategies.iter().enumerate() {
                pending.push(evaluate_one(qi, si, query, Arc::clone(strategy), schema));
            }
        }

        // learning strategies see the same state for every query of the run
        let batch = BatchGuard::begin(&self.strategies);
        let mut runs: Vec<(usize, usize, StrategyRun)> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        drop(batch);
        runs.sort_by_key(|(qi, si, _)| (*qi, *si));

        let mut comparisons: Vec<StrategyComparison> = queries
            .iter()
            .map(|query| StrategyComparison {
                query: query.query.clone(),
                expected: query.expected_shape(),
                per_strategy: BTreeMap::new(),
            })
            .collect();
        for (qi, si, run) in &runs {
            comparisons[*qi]
                .per_strategy
                .insert(self.strategies[*si].name().to_string(), run.clone());
        }

        let summaries: Vec<StrategySummary> = self
            .strategies
            .iter()
            .enumerate()
            .map(|(si, strategy)| {
                let own: Vec<&StrategyRun> = runs.iter().filter(|(_, s, _)| *s == si).map(|(_, _, r)| r).collect();
                summarize(strategy.name(), &own)
            })
            .collect();
        let recommended_strategy = recommend(&summaries);

        tracing::info!(
            "Evaluation finished in {:.1}ms, recommended strategy: {}",
            started.elapsed().as_secs_f64() * 1000.0,
            recommended_strategy.as_deref().unwrap_or("none")
        );

        HarnessReport {
            id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            table_name: schema.table_name.clone(),
            strategies: self.strategies.iter().map(|s| s.name().to_string()).collect(),
            comparisons,
            summaries,
            recommended_strategy,
        }
    }
}

async fn evaluate_one(
    qi: usize,
    si: usize,
    query: &LabeledQuery,
    strategy: Arc<dyn TranslationStrategy>,
    schema: &SchemaContext,
) -> (usize, usize, StrategyRun) {
    let expected = query.expected_shape();
    let timer = Instant::now();
    let result = strategy.translate(&query.query, schema).await;
    let elapsed_ms = timer.elapsed().as_secs_f64() * 1000.0;
    let score = QualityEvaluator::score(&result, &expected);
    if !result.success {
        tracing::debug!(
            "Strategy {} failed on '{}': {:?}",
            strategy.name(),
            query.query,
            result.error_message
        );
    }
    (qi, si, StrategyRun { result, score, elapsed_ms })
}

/// Ends the batch on every strategy even if the run future is dropped
struct BatchGuard<'a> {
    strategies: &'a [Arc<dyn TranslationStrategy>],
}

impl<'a> BatchGuard<'a> {
    fn begin(strategies: &'a [Arc<dyn TranslationStrategy>]) -> Self {
        for strategy in strategies {
            strategy.begin_batch();
        }
        Self { strategies }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        for strategy in self.strategies {
            strategy.end_batch();
        }
    }
}

fn summarize(strategy: &str, runs: &[&StrategyRun]) -> StrategySummary {
    let queries = runs.len();
    let total_points: f64 = runs.iter().map(|r| r.score.total).sum();
    let mean = |sum: f64| if queries == 0 { 0.0 } else { sum / queries as f64 };

    StrategySummary {
        strategy: strategy.to_string(),
        queries,
        total_points,
        mean_total: mean(total_points),
        success_rate: mean(runs.iter().filter(|r| r.result.success).count() as f64),
        mean_confidence: mean(runs.iter().map(|r| r.result.confidence).sum()),
        mean_elapsed_ms: mean(runs.iter().map(|r| r.elapsed_ms).sum()),
    }
}

/// Highest mean total; ties go to the strategy name that sorts first.
/// Latency is reported but never decides, so the pick is reproducible.
pub fn recommend(summaries: &[StrategySummary]) -> Option<String> {
    summaries
        .iter()
        .filter(|s| s.queries > 0)
        .min_by(|a, b| {
            let by_total = if (a.mean_total - b.mean_total).abs() < 1e-9 {
                std::cmp::Ordering::Equal
            } else {
                b.mean_total.total_cmp(&a.mean_total)
            };
            by_total.then_with(|| a.strategy.cmp(&b.strategy))
        })
        .map(|s| s.strategy.clone())
}

/// Plain-text rendering of a report for terminals
pub fn render_text(report: &HarnessReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Evaluation {} on table '{}'", report.id, report.table_name);
    let _ = writeln!(out, "Generated at {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out);

    for comparison in &report.comparisons {
        let _ = writeln!(out, "Query: {}", comparison.query);
        for (name, run) in &comparison.per_strategy {
            let sql = if run.result.success {
                run.result.sql_query.as_str()
            } else {
                run.result.error_message.as_deref().unwrap_or("failed")
            };
            let _ = writeln!(
                out,
                "  {:<10} {:>6.1} pts  conf {:.2}  {:>7.2}ms  {}",
                name, run.score.total, run.result.confidence, run.elapsed_ms, sql
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<10} {:>8} {:>10} {:>9} {:>10} {:>10}",
        "strategy", "queries", "mean pts", "success", "mean conf", "mean ms"
    );
    for summary in &report.summaries {
        let _ = writeln!(
            out,
            "{:<10} {:>8} {:>10.1} {:>8.0}% {:>10.2} {:>10.2}",
            summary.strategy,
            summary.queries,
            summary.mean_total,
            summary.success_rate * 100.0,
            summary.mean_confidence,
            summary.mean_elapsed_ms
        );
    }
    let _ = writeln!(
        out,
        "\nRecommended strategy: {}",
        report.recommended_strategy.as_deref().unwrap_or("none")
    );
    out
}

/// Demo financial table matching `default_query_set`
pub fn sample_schema() -> SchemaContext {
    SchemaContext::new(
        "financial_data",
        vec![
            ColumnInfo::new("region", ColumnType::Categorical).with_samples(["North", "South", "East", "West"]),
            ColumnInfo::new("product", ColumnType::Categorical).with_samples(["Widgets", "Gadgets", "Services"]),
            ColumnInfo::new("month", ColumnType::Date).with_samples(["2024-01-01", "2024-02-01"]),
            ColumnInfo::new("actual_sales", ColumnType::Numeric).with_samples(["52000", "61000", "75500"]),
            ColumnInfo::new("budget_sales", ColumnType::Numeric).with_samples(["50000", "65000", "70000"]),
            ColumnInfo::new("sales_variance", ColumnType::Numeric).with_samples(["2000", "-4000", "5500"]),
            ColumnInfo::new("price_variance", ColumnType::Numeric).with_samples(["-120", "340", "15"]),
            ColumnInfo::new("customer_satisfaction", ColumnType::Numeric).with_samples(["4.2", "3.8", "4.7"]),
            ColumnInfo::new("profit_margin", ColumnType::Numeric).with_samples(["0.12", "0.08", "0.21"]),
        ],
    )
}

/// Fixed labeled financial query set
pub fn default_query_set() -> Vec<LabeledQuery> {
    let shape = |expects_where, expects_aggregation, expects_grouping, expects_ranking| ExpectedShape {
        expects_where,
        expects_aggregation,
        expects_grouping,
        expects_ranking,
    };

    vec![
        LabeledQuery::new("Show me sales greater than 60000", shape(true, false, false, false)),
        LabeledQuery::new("Top 5 regions by actual sales", shape(false, false, false, true)),
        LabeledQuery::new("Find transactions where sales variance is negative", shape(true, false, false, false)),
        LabeledQuery::new("What is the total actual sales by region", shape(false, true, true, false)),
        LabeledQuery::new("Average customer satisfaction per product", shape(false, true, true, false)),
        LabeledQuery::new("How many products have price variance below 0", shape(true, true, false, false)),
        LabeledQuery::new("Show regions with profit margin above 10%", shape(true, false, false, false)),
        LabeledQuery::new("Bottom 3 products by customer satisfaction", shape(false, false, false, true)),
        LabeledQuery::new(
            "Actual sales greater than budget sales in the North region",
            shape(true, false, false, false),
        ),
        LabeledQuery::new("Which region has the highest sales variance", shape(false, false, false, true)),
        LabeledQuery::new("Show records with unfavorable price variance", shape(true, false, false, false)),
        LabeledQuery::new("Actual vs budget", shape(false, false, false, false)),
        LabeledQuery::new("asdkjf qwerty", shape(false, false, false, false)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::models::{QualityScore, TranslationResult};
    use crate::services::strategies::{PatternStrategy, SemanticStrategy, StrategyKind};
    use crate::services::synonyms::SynonymDictionary;
    use crate::services::translator::TranslationPipeline;

    /// Always fails, to check one bad strategy never stops a run
    struct BrokenStrategy;

    #[async_trait::async_trait]
    impl TranslationStrategy for BrokenStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::LlmEnhanced
        }

        async fn translate(&self, _query: &str, _schema: &SchemaContext) -> TranslationResult {
            TranslationResult::failed("Could not assemble SQL: broken", "")
        }
    }

    fn strategies() -> Vec<Arc<dyn TranslationStrategy>> {
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        vec![
            Arc::new(PatternStrategy::new(Arc::clone(&pipeline))),
            Arc::new(BrokenStrategy),
            Arc::new(SemanticStrategy::new(pipeline)),
        ]
    }

    #[tokio::test]
    async fn test_run_covers_every_pair() {
        let queries = default_query_set();
        let report = EvaluationHarness::new(strategies(), 4).run(&queries, &sample_schema()).await;

        assert_eq!(report.comparisons.len(), queries.len());
        for comparison in &report.comparisons {
            assert_eq!(comparison.per_strategy.len(), 3);
            for run in comparison.per_strategy.values() {
                assert!((0.0..=100.0).contains(&run.score.total));
            }
        }
        assert_eq!(report.summaries.len(), 3);
        assert_ne!(report.recommended_strategy.as_deref(), Some("llm"));
    }

    #[tokio::test]
    async fn test_failures_are_zero_credit() {
        let queries = vec![LabeledQuery::unlabeled("Show me sales greater than 60000")];
        let report = EvaluationHarness::new(strategies(), 2).run(&queries, &sample_schema()).await;
        let broken = &report.comparisons[0].per_strategy["llm"];
        assert_eq!(broken.score, QualityScore::zero());
        assert!(report.comparisons[0].per_strategy["pattern"].result.success);
    }

    #[tokio::test]
    async fn test_totals_do_not_depend_on_concurrency() {
        let queries = default_query_set();
        let schema = sample_schema();
        let sequential = EvaluationHarness::new(strategies(), 1).run(&queries, &schema).await;
        let parallel = EvaluationHarness::new(strategies(), 8).run(&queries, &schema).await;

        for (a, b) in sequential.summaries.iter().zip(&parallel.summaries) {
            assert_eq!(a.strategy, b.strategy);
            assert_eq!(a.total_points, b.total_points);
            assert_eq!(a.success_rate, b.success_rate);
        }
    }

    #[test]
    fn test_recommend_ignores_latency_on_ties() {
        let summary = |name: &str, mean_total: f64, mean_elapsed_ms: f64| StrategySummary {
            strategy: name.to_string(),
            queries: 3,
            total_points: mean_total * 3.0,
            mean_total,
            success_rate: 1.0,
            mean_confidence: 1.0,
            mean_elapsed_ms,
        };
        let summaries = vec![
            summary("semantic", 80.0, 1.0),
            summary("pattern", 80.0, 9.0),
            summary("llm", 70.0, 0.5),
        ];
        assert_eq!(recommend(&summaries).as_deref(), Some("pattern"));

        // swapping the latencies must not change the pick
        let swapped = vec![
            summary("semantic", 80.0, 9.0),
            summary("pattern", 80.0, 1.0),
            summary("llm", 70.0, 0.5),
        ];
        assert_eq!(recommend(&swapped).as_deref(), Some("pattern"));
        assert_eq!(recommend(&[]), None);
    }

    #[tokio::test]
    async fn test_semantic_learning_is_deferred_until_run_ends() {
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        let semantic = Arc::new(SemanticStrategy::new(pipeline));
        let schema = SchemaContext::new(
            "staff",
            vec![
                ColumnInfo::new("region", ColumnType::Categorical),
                ColumnInfo::new("headcount", ColumnType::Numeric),
            ],
        );
        let queries = vec![
            LabeledQuery::unlabeled("headcont above 10"),
            LabeledQuery::unlabeled("headcont above 10"),
        ];

        let shared: Vec<Arc<dyn TranslationStrategy>> = vec![semantic.clone() as Arc<dyn TranslationStrategy>];
        let report = EvaluationHarness::new(shared, 1).run(&queries, &schema).await;

        let first = &report.comparisons[0].per_strategy["semantic"];
        let second = &report.comparisons[1].per_strategy["semantic"];
        assert_eq!(first.result.sql_query, second.result.sql_query);
        assert_eq!(first.result.confidence, second.result.confidence);
        assert_eq!(semantic.cache().len(&schema.fingerprint()), 1);
    }

    #[test]
    fn test_render_text_mentions_recommendation() {
        let report = HarnessReport {
            id: "r1".to_string(),
            generated_at: Utc::now(),
            table_name: "t".to_string(),
            strategies: vec![],
            comparisons: vec![],
            summaries: vec![],
            recommended_strategy: Some("pattern".to_string()),
        };
        assert!(render_text(&report).contains("Recommended strategy: pattern"));
    }
}
