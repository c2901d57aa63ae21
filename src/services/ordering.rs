use crate::models::{Aggregation, ColumnType, Extraction, OrderBy, ResolutionIssue, SortDirection};
use crate::services::query_context::QueryContext;
use crate::services::synonyms::TypeHint;

/// LIMIT used for "top"/"bottom" without a number
pub const DEFAULT_TOP_N: u64 = 10;

/// How far after a ranking word the metric may be named ("top 5 regions by actual sales")
const METRIC_WINDOW: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankWord {
    /// "top"/"bottom": always limited
    Bounded,
    /// "highest"/"worst": limited only with a number or "the"
    Superlative,
}

const RANK_WORDS: &[(&str, SortDirection, RankWord)] = &[
    ("top", SortDirection::Desc, RankWord::Bounded),
    ("bottom", SortDirection::Asc, RankWord::Bounded),
    ("highest", SortDirection::Desc, RankWord::Superlative),
    ("largest", SortDirection::Desc, RankWord::Superlative),
    ("biggest", SortDirection::Desc, RankWord::Superlative),
    ("greatest", SortDirection::Desc, RankWord::Superlative),
    ("best", SortDirection::Desc, RankWord::Superlative),
    ("lowest", SortDirection::Asc, RankWord::Superlative),
    ("smallest", SortDirection::Asc, RankWord::Superlative),
    ("worst", SortDirection::Asc, RankWord::Superlative),
];

const SORT_PHRASES: &[&[&str]] = &[
    &["order", "by"],
    &["ordered", "by"],
    &["sort", "by"],
    &["sorted", "by"],
    &["rank", "by"],
    &["ranked", "by"],
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingOutcome {
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
}

pub struct OrderingDetector;

impl OrderingDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect ranking/sorting and the row limit.
    ///
    /// `aggregation` is the aggregate already detected, used as the sort
    /// column when the ranking phrase names no metric of its own.
    pub fn detect(&self, ctx: &QueryContext<'_>, aggregation: Option<&Aggregation>) -> Extraction<OrderingOutcome> {
        let mut outcome = OrderingOutcome::default();
        let mut issues = Vec::new();

        if let Some((idx, direction, kind)) = self.rank_word(ctx) {
            let count = self.count_near(ctx, idx);
            outcome.limit = match (count, kind) {
                (Some(n), _) => Some(n),
                (None, RankWord::Bounded) => Some(DEFAULT_TOP_N),
                (None, RankWord::Superlative) if idx > 0 && ctx.word(idx - 1) == "the" => Some(1),
                (None, RankWord::Superlative) => None,
            };

            match self.rank_column(ctx, idx, aggregation) {
                Some(column) => outcome.order_by = Some(OrderBy::new(column, direction)),
                None => {
                    tracing::debug!("Ranking word '{}' has no metric to sort by", ctx.word(idx));
                    issues.push(ResolutionIssue::UnresolvedTerm {
                        term: ctx.word(idx).to_string(),
                    });
                }
            }
        }

        if let Some(explicit) = self.sort_phrase(ctx, outcome.order_by.as_ref(), &mut issues) {
            outcome.order_by = Some(explicit);
        }

        if let Some(order) = &outcome.order_by {
            tracing::debug!(
                "Ordering detected: {} {} limit {:?}",
                order.column,
                order.direction.as_sql(),
                outcome.limit
            );
        }
        Extraction::new(outcome, issues)
    }

    fn rank_word(&self, ctx: &QueryContext<'_>) -> Option<(usize, SortDirection, RankWord)> {
        (0..ctx.len()).find_map(|idx| {
            if ctx.mention_covering(idx).is_some() {
                return None;
            }
            RANK_WORDS
                .iter()
                .find(|(word, _, _)| ctx.word(idx) == *word)
                .map(|(_, direction, kind)| (idx, *direction, *kind))
        })
    }

    /// "top 5", "top five", "the 3 lowest"
    fn count_near(&self, ctx: &QueryContext<'_>, idx: usize) -> Option<u64> {
        let as_count = |n: f64| (n >= 1.0 && n.fract() == 0.0).then_some(n as u64);
        ctx.number_at(idx + 1)
            .filter(|n| !n.percent)
            .and_then(|n| as_count(n.value))
            .or_else(|| {
                idx.checked_sub(1)
                    .and_then(|prev| ctx.number_at(prev))
                    .filter(|n| !n.percent && n.end == idx)
                    .and_then(|n| as_count(n.value))
            })
    }

    fn rank_column(&self, ctx: &QueryContext<'_>, idx: usize, aggregation: Option<&Aggregation>) -> Option<String> {
        let numeric = |m: &crate::services::query_context::Mention| {
            m.resolve(TypeHint::Numeric)
                .filter(|r| r.column_type == ColumnType::Numeric)
                .map(|r| r.column)
        };

        // Named near the ranking word, after it first
        let after = ctx
            .mentions
            .iter()
            .filter(|m| m.start > idx && m.start <= idx + METRIC_WINDOW)
            .find_map(numeric);
        if after.is_some() {
            return after;
        }
        let before = ctx
            .mentions
            .iter()
            .rev()
            .filter(|m| m.end <= idx && m.end + 4 > idx)
            .find_map(numeric);
        if before.is_some() {
            return before;
        }

        if let Some(target) = aggregation.and_then(|a| a.target_column.clone()) {
            return Some(target);
        }
        if let Some(aggregation) = aggregation {
            return Some(aggregation.alias());
        }

        ctx.schema.first_numeric_column().map(|c| c.name.clone())
    }

    /// "order by X", "sorted by X descending"
    fn sort_phrase(
        &self,
        ctx: &QueryContext<'_>,
        ranked: Option<&OrderBy>,
        issues: &mut Vec<ResolutionIssue>,
    ) -> Option<OrderBy> {
        let idx = (0..ctx.len()).find(|i| SORT_PHRASES.iter().any(|p| ctx.phrase_at(*i, p)))?;
        let mut start = idx + 2;
        if ctx.word(start) == "the" {
            start += 1;
        }

        let Some(mention) = ctx.mention_at(start) else {
            let term = ctx.span(start, start + 1);
            if !term.is_empty() {
                issues.push(ResolutionIssue::UnresolvedTerm { term });
            }
            return None;
        };
        let resolution = mention.resolve(TypeHint::Any)?;

        let trailing = ctx.span(mention.end, mention.end + 3);
        let direction = if trailing.starts_with("desc")
            || trailing.starts_with("high to low")
            || trailing.starts_with("largest first")
        {
            SortDirection::Desc
        } else if trailing.starts_with("asc")
            || trailing.starts_with("low to high")
            || trailing.starts_with("smallest first")
        {
            SortDirection::Asc
        } else {
            ranked.map(|o| o.direction).unwrap_or(SortDirection::Asc)
        };

        Some(OrderBy::new(resolution.column, direction))
    }
}

impl Default for OrderingDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateFunction, SchemaContext};
    use crate::services::synonyms::{SynonymDictionary, SynonymResolver};
    use std::sync::Arc;

    fn resolver() -> SynonymResolver {
        SynonymResolver::new(Arc::new(SynonymDictionary::financial()), 0.80)
    }

    fn schema() -> SchemaContext {
        SchemaContext::new("sales", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("actual_sales", ColumnType::Numeric)
            .with_column("profit", ColumnType::Numeric)
    }

    fn detect(query: &str, aggregation: Option<&Aggregation>) -> Extraction<OrderingOutcome> {
        let resolver = resolver();
        let schema = schema();
        let ctx = QueryContext::new(query, &schema, &resolver, &[]);
        OrderingDetector::new().detect(&ctx, aggregation)
    }

    #[test]
    fn test_top_n_by_metric() {
        let result = detect("Top 5 regions by actual sales", None);
        assert_eq!(
            result.value.order_by,
            Some(OrderBy::new("actual_sales", SortDirection::Desc))
        );
        assert_eq!(result.value.limit, Some(5));
    }

    #[test]
    fn test_bottom_defaults_to_ten() {
        let result = detect("bottom regions by profit", None);
        assert_eq!(result.value.order_by, Some(OrderBy::new("profit", SortDirection::Asc)));
        assert_eq!(result.value.limit, Some(DEFAULT_TOP_N));
    }

    #[test]
    fn test_number_words_and_leading_numbers() {
        assert_eq!(detect("top five regions by profit", None).value.limit, Some(5));
        assert_eq!(detect("the 3 lowest profit regions", None).value.limit, Some(3));
    }

    #[test]
    fn test_superlative_limits() {
        let the_highest = detect("which region has the highest profit", None);
        assert_eq!(the_highest.value.limit, Some(1));
        assert_eq!(
            the_highest.value.order_by,
            Some(OrderBy::new("profit", SortDirection::Desc))
        );

        let highest = detect("regions with highest profit first", None);
        assert_eq!(highest.value.limit, None);
    }

    #[test]
    fn test_falls_back_to_aggregation_then_schema() {
        let aggregation = Aggregation::new(AggregateFunction::Sum, "profit");
        let result = detect("top regions", Some(&aggregation));
        assert_eq!(result.value.order_by.unwrap().column, "profit");

        let result = detect("top regions", None);
        assert_eq!(result.value.order_by.unwrap().column, "actual_sales");
    }

    #[test]
    fn test_explicit_sort_phrase() {
        let result = detect("show regions sorted by profit descending", None);
        assert_eq!(result.value.order_by, Some(OrderBy::new("profit", SortDirection::Desc)));
        assert_eq!(result.value.limit, None);

        let result = detect("order by region", None);
        assert_eq!(result.value.order_by, Some(OrderBy::new("region", SortDirection::Asc)));
    }

    #[test]
    fn test_no_ranking() {
        let result = detect("show me everything", None);
        assert_eq!(result.value, OrderingOutcome::default());
        assert!(result.issues.is_empty());
    }
}
