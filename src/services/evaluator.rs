use crate::models::{ExpectedShape, QualityScore, TranslationResult};
use crate::validation::SqlValidator;

pub const WHERE_POINTS: f64 = 25.0;
pub const SELECT_POINTS: f64 = 15.0;
pub const AGGREGATION_POINTS: f64 = 15.0;
pub const LIMIT_POINTS: f64 = 10.0;
pub const CONFIDENCE_POINTS: f64 = 5.0;
pub const SUCCESS_POINTS: f64 = 30.0;

/// Rubric grading of a translation against the shape its query should produce.
/// Independent of the translator's own confidence apart from the 5 points that report it.
pub struct QualityEvaluator;

impl QualityEvaluator {
    pub fn score(result: &TranslationResult, expected: &ExpectedShape) -> QualityScore {
        if !result.success {
            return QualityScore::zero();
        }

        let confidence_score = CONFIDENCE_POINTS * result.confidence.clamp(0.0, 1.0);
        let shape = match SqlValidator::inspect(&result.sql_query) {
            Ok(shape) => shape,
            Err(e) => {
                tracing::warn!("Scoring unparseable SQL '{}': {}", result.sql_query, e);
                let total = SUCCESS_POINTS + confidence_score;
                return QualityScore {
                    confidence_score,
                    success_score: SUCCESS_POINTS,
                    total,
                    ..QualityScore::zero()
                };
            }
        };

        let where_clause_score = if shape.has_where == expected.expects_where {
            WHERE_POINTS
        } else {
            0.0
        };

        let select_specificity_score = if !expected.expects_specific_select() || !shape.select_star {
            SELECT_POINTS
        } else {
            0.0
        };

        let aggregates = shape.has_aggregate || shape.has_group_by;
        let wants_aggregate = expected.expects_aggregation || expected.expects_grouping;
        let aggregation_score = if wants_aggregate {
            if aggregates { AGGREGATION_POINTS } else { 0.0 }
        } else if expected.expects_ranking || !aggregates {
            // Ranking may be answered over raw rows or over groups
            AGGREGATION_POINTS
        } else {
            0.0
        };

        let limit_score = if !expected.expects_ranking {
            LIMIT_POINTS
        } else {
            match (shape.has_limit, shape.has_order_by) {
                (true, true) => LIMIT_POINTS,
                (true, false) => LIMIT_POINTS / 2.0,
                _ => 0.0,
            }
        };

        let total = where_clause_score
            + select_specificity_score
            + aggregation_score
            + limit_score
            + confidence_score
            + SUCCESS_POINTS;

        QualityScore {
            where_clause_score,
            select_specificity_score,
            aggregation_score,
            limit_score,
            confidence_score,
            success_score: SUCCESS_POINTS,
            total: total.clamp(0.0, 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(sql: &str, confidence: f64) -> TranslationResult {
        TranslationResult::succeeded(sql.to_string(), String::new(), confidence, None)
    }

    #[test]
    fn test_perfect_filter_query() {
        let expected = ExpectedShape {
            expects_where: true,
            ..Default::default()
        };
        let score = QualityEvaluator::score(&ok("SELECT * FROM sales WHERE sales > 60000 LIMIT 100", 1.0), &expected);
        assert_eq!(score.total, 100.0);
    }

    #[test]
    fn test_ranking_without_order_gets_half_limit_credit() {
        let expected = ExpectedShape {
            expects_ranking: true,
            ..Default::default()
        };
        let score = QualityEvaluator::score(&ok("SELECT * FROM sales LIMIT 10", 1.0), &expected);
        assert_eq!(score.limit_score, 5.0);

        let ranked = "SELECT region, SUM(actual_sales) AS actual_sales FROM sales GROUP BY region ORDER BY actual_sales DESC LIMIT 5";
        let score = QualityEvaluator::score(&ok(ranked, 1.0), &expected);
        assert_eq!(score.limit_score, 10.0);
        assert_eq!(score.aggregation_score, 15.0);
    }

    #[test]
    fn test_select_star_for_aggregate_question_loses_points() {
        let expected = ExpectedShape {
            expects_aggregation: true,
            ..Default::default()
        };
        let score = QualityEvaluator::score(&ok("SELECT * FROM sales LIMIT 100", 0.5), &expected);
        assert_eq!(score.select_specificity_score, 0.0);
        assert_eq!(score.aggregation_score, 0.0);
        assert_eq!(score.confidence_score, 2.5);
        assert_eq!(score.total, 25.0 + 10.0 + 2.5 + 30.0);
    }

    #[test]
    fn test_failed_translation_scores_zero() {
        let failed = TranslationResult::failed("Could not assemble SQL", "");
        let score = QualityEvaluator::score(&failed, &ExpectedShape::default());
        assert_eq!(score, QualityScore::zero());
    }

    #[test]
    fn test_total_within_bounds() {
        let expected = ExpectedShape::infer("top 5 regions by total sales where profit is negative");
        for sql in [
            "SELECT * FROM t LIMIT 1",
            "SELECT COUNT(*) AS record_count FROM t WHERE a > 1",
            "not sql at all",
        ] {
            let score = QualityEvaluator::score(&ok(sql, 1.0), &expected);
            assert!((0.0..=100.0).contains(&score.total));
        }
    }
}
