use crate::error::TranslationError;
use crate::models::{AggregateFunction, Aggregation, ColumnType, Extraction, ResolutionIssue};
use crate::services::conditions::note_ambiguity;
use crate::services::query_context::QueryContext;
use crate::services::synonyms::{is_stopword, TypeHint};

const AGGREGATE_PHRASES: &[(&[&str], AggregateFunction)] = &[
    (&["how", "many"], AggregateFunction::Count),
    (&["number", "of"], AggregateFunction::Count),
    (&["count", "of"], AggregateFunction::Count),
    (&["count"], AggregateFunction::Count),
    (&["sum", "of"], AggregateFunction::Sum),
    (&["sum"], AggregateFunction::Sum),
    (&["total"], AggregateFunction::Sum),
    (&["aggregate"], AggregateFunction::Sum),
    (&["average"], AggregateFunction::Avg),
    (&["avg"], AggregateFunction::Avg),
    (&["mean"], AggregateFunction::Avg),
    (&["minimum"], AggregateFunction::Min),
    (&["min"], AggregateFunction::Min),
    (&["maximum"], AggregateFunction::Max),
    (&["max"], AggregateFunction::Max),
    (&["peak"], AggregateFunction::Max),
];

const GROUP_PHRASES: &[&[&str]] = &[
    &["broken", "down", "by"],
    &["grouped", "by"],
    &["group", "by"],
    &["split", "by"],
    &["for", "each"],
    &["by"],
    &["per"],
    &["across"],
];

/// Words that make a following "by" an ordering phrase
const ORDERING_LEADS: &[&str] = &["order", "ordered", "sort", "sorted", "rank", "ranked"];
const TARGET_FILLERS: &[&str] = &["of", "the", "all", "our", "my", "a", "an", "each", "every"];

/// Aggregate function and grouping columns found in a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationOutcome {
    pub aggregation: Option<Aggregation>,
    pub group_by: Vec<String>,
}

pub struct AggregationDetector;

impl AggregationDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the aggregate and "by X" grouping.
    ///
    /// Fails only when SUM or AVG is asked for on a table with no numeric
    /// column at all; a keyword whose target cannot be found is dropped.
    pub fn detect(&self, ctx: &QueryContext<'_>) -> Result<Extraction<AggregationOutcome>, TranslationError> {
        let mut issues = Vec::new();
        let mut outcome = AggregationOutcome {
            group_by: self.grouping(ctx, &mut issues),
            ..Default::default()
        };

        let mut idx = 0;
        while idx < ctx.len() {
            let Some((words, function)) = aggregate_at(ctx, idx) else {
                idx += 1;
                continue;
            };
            let keyword_end = idx + words.len();

            // Part of a column name ("total_sales") or a comparison ("minimum of 500")
            let inside_mention = ctx.mention_covering(idx).is_some();
            let before_number = matches!(function, AggregateFunction::Min | AggregateFunction::Max)
                && ctx.number_at(skip(ctx, keyword_end)).is_some();
            if inside_mention || before_number {
                idx = keyword_end;
                continue;
            }

            match self.target(ctx, function, keyword_end, &outcome.group_by, &mut issues) {
                Some(aggregation) => {
                    tracing::debug!("Aggregation detected: {}", aggregation.to_sql());
                    outcome.aggregation = Some(aggregation);
                    break;
                }
                None => {
                    if function.requires_numeric() && ctx.schema.first_numeric_column().is_none() {
                        return Err(TranslationError::Assembly(format!(
                            "{} requested but table '{}' has no numeric column",
                            function.as_sql(),
                            ctx.schema.table_name
                        )));
                    }
                    let term = ctx.span(idx, keyword_end);
                    tracing::debug!("Dropping aggregation '{}': no target column", term);
                    issues.push(ResolutionIssue::UnresolvedTerm { term });
                    idx = keyword_end;
                }
            }
        }

        // "sales by region" has no verb but still means a per-group total
        if outcome.aggregation.is_none() && !outcome.group_by.is_empty() {
            let measure = ctx
                .numeric_mentions()
                .filter_map(|m| m.resolve(TypeHint::Numeric))
                .find(|r| r.column_type == ColumnType::Numeric && !outcome.group_by.contains(&r.column));
            match measure {
                Some(resolution) => {
                    note_ambiguity(&resolution, &mut issues);
                    outcome.aggregation = Some(Aggregation::new(AggregateFunction::Sum, resolution.column));
                }
                None if !ranking_requested(ctx) => {
                    let groups = outcome.group_by.join(", ");
                    issues.push(ResolutionIssue::DroppedCondition {
                        phrase: format!("by {}", groups),
                        reason: "grouping without a measure to aggregate".to_string(),
                    });
                    outcome.group_by.clear();
                }
                None => {}
            }
        }

        Ok(Extraction::new(outcome, issues))
    }

    fn target(
        &self,
        ctx: &QueryContext<'_>,
        function: AggregateFunction,
        keyword_end: usize,
        group_by: &[String],
        issues: &mut Vec<ResolutionIssue>,
    ) -> Option<Aggregation> {
        let hint = if function == AggregateFunction::Count {
            TypeHint::Any
        } else {
            TypeHint::Numeric
        };
        let fits = |column_type: ColumnType| match function {
            AggregateFunction::Sum | AggregateFunction::Avg => column_type == ColumnType::Numeric,
            AggregateFunction::Min | AggregateFunction::Max => column_type.is_orderable(),
            AggregateFunction::Count => true,
        };

        // Named right after the keyword: "total actual sales"
        let start = skip(ctx, keyword_end);
        if let Some(mention) = ctx.mention_at(start) {
            if let Some(resolution) = mention.resolve(hint) {
                if fits(resolution.column_type) && !group_by.contains(&resolution.column) {
                    note_ambiguity(&resolution, issues);
                    return Some(Aggregation::new(function, resolution.column));
                }
            }
        }

        if function == AggregateFunction::Count {
            return Some(Aggregation::count_rows());
        }

        // Otherwise the first measure mentioned anywhere
        ctx.numeric_mentions()
            .filter_map(|m| m.resolve(TypeHint::Numeric))
            .find(|r| fits(r.column_type) && !group_by.contains(&r.column))
            .map(|resolution| {
                note_ambiguity(&resolution, issues);
                Aggregation::new(function, resolution.column)
            })
    }

    fn grouping(&self, ctx: &QueryContext<'_>, issues: &mut Vec<ResolutionIssue>) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        let mut idx = 0;
        while idx < ctx.len() {
            let Some(words) = GROUP_PHRASES.iter().find(|p| ctx.phrase_at(idx, p)) else {
                idx += 1;
                continue;
            };
            let phrase_end = idx + words.len();
            if idx > 0 && ORDERING_LEADS.contains(&ctx.word(idx - 1)) {
                idx = phrase_end;
                continue;
            }

            let start = skip(ctx, phrase_end);
            let resolution = match ctx.mention_at(start) {
                Some(mention) => mention.resolve(TypeHint::Dimension),
                None => {
                    let word = ctx.word(start);
                    if word.is_empty() || is_stopword(word) || ctx.number_at(start).is_some() {
                        idx = phrase_end;
                        continue;
                    }
                    let term = ctx.span(start, start + 1);
                    let found = ctx.resolve_term(&term, TypeHint::Dimension);
                    if found.is_none() && words.len() == 1 && words[0] != "across" {
                        tracing::debug!("Grouping term '{}' did not resolve", term);
                        issues.push(ResolutionIssue::UnresolvedTerm { term });
                    }
                    found
                }
            };

            if let Some(resolution) = resolution {
                if resolution.column_type.is_dimension() && !groups.contains(&resolution.column) {
                    note_ambiguity(&resolution, issues);
                    groups.push(resolution.column);
                }
            }
            idx = phrase_end;
        }
        groups
    }
}

impl Default for AggregationDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate_at(ctx: &QueryContext<'_>, idx: usize) -> Option<(&'static [&'static str], AggregateFunction)> {
    AGGREGATE_PHRASES
        .iter()
        .find(|(words, _)| ctx.phrase_at(idx, words))
        .map(|(words, function)| (*words, *function))
}

fn skip(ctx: &QueryContext<'_>, mut idx: usize) -> usize {
    while idx < ctx.len() && TARGET_FILLERS.contains(&ctx.word(idx)) {
        idx += 1;
    }
    idx
}

fn ranking_requested(ctx: &QueryContext<'_>) -> bool {
    ["top", "bottom", "highest", "lowest", "best", "worst"]
        .iter()
        .any(|w| ctx.has_word(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SchemaContext;
    use crate::services::synonyms::{SynonymDictionary, SynonymResolver};
    use std::sync::Arc;

    fn resolver() -> SynonymResolver {
        SynonymResolver::new(Arc::new(SynonymDictionary::financial()), 0.80)
    }

    fn schema() -> SchemaContext {
        SchemaContext::new("sales", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("product", ColumnType::Text)
            .with_column("actual_sales", ColumnType::Numeric)
            .with_column("total_cost", ColumnType::Numeric)
            .with_column("customer_satisfaction", ColumnType::Numeric)
    }

    fn detect(query: &str) -> Extraction<AggregationOutcome> {
        let resolver = resolver();
        let schema = schema();
        let ctx = QueryContext::new(query, &schema, &resolver, &[]);
        AggregationDetector::new().detect(&ctx).unwrap()
    }

    fn sql(outcome: &AggregationOutcome) -> Option<String> {
        outcome.aggregation.as_ref().map(|a| a.to_sql())
    }

    #[test]
    fn test_sum_by_dimension() {
        let result = detect("What is the total actual sales by region");
        assert_eq!(sql(&result.value).as_deref(), Some("SUM(actual_sales) AS actual_sales"));
        assert_eq!(result.value.group_by, vec!["region"]);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_average_uses_synonyms() {
        let result = detect("average satisfaction per product");
        assert_eq!(
            sql(&result.value).as_deref(),
            Some("AVG(customer_satisfaction) AS customer_satisfaction")
        );
        assert_eq!(result.value.group_by, vec!["product"]);
    }

    #[test]
    fn test_count_defaults_to_rows() {
        let result = detect("How many transactions have actual sales above 1000");
        assert_eq!(sql(&result.value).as_deref(), Some("COUNT(*) AS record_count"));
        assert!(result.value.group_by.is_empty());
    }

    #[test]
    fn test_keyword_inside_column_name_is_ignored() {
        let result = detect("show total cost");
        // "total cost" names the column, it is not a SUM request
        assert!(result.value.aggregation.is_none());
    }

    #[test]
    fn test_grouping_implies_sum() {
        let result = detect("actual sales by region");
        assert_eq!(sql(&result.value).as_deref(), Some("SUM(actual_sales) AS actual_sales"));
        assert_eq!(result.value.group_by, vec!["region"]);
    }

    #[test]
    fn test_numeric_by_is_not_grouping() {
        let result = detect("regions sorted by actual sales");
        assert!(result.value.group_by.is_empty());
        let result = detect("products by actual sales");
        assert!(result.value.group_by.is_empty());
    }

    #[test]
    fn test_unresolvable_target_is_dropped() {
        let schema = SchemaContext::new("t", vec![]).with_column("region", ColumnType::Categorical);
        let resolver = resolver();
        let ctx = QueryContext::new("average of everything", &schema, &resolver, &[]);
        assert!(matches!(
            AggregationDetector::new().detect(&ctx),
            Err(TranslationError::Assembly(_))
        ));

        let result = detect("average of everything");
        assert_eq!(sql(&result.value).as_deref(), None);
        assert_eq!(
            result.issues,
            vec![ResolutionIssue::UnresolvedTerm {
                term: "average".to_string()
            }]
        );
    }

    #[test]
    fn test_grouping_without_measure_is_dropped() {
        let schema = SchemaContext::new("t", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("product", ColumnType::Text);
        let resolver = resolver();
        let ctx = QueryContext::new("products by region", &schema, &resolver, &[]);
        let result = AggregationDetector::new().detect(&ctx).unwrap();
        assert!(result.value.group_by.is_empty());
        assert!(matches!(result.issues[0], ResolutionIssue::DroppedCondition { .. }));
    }
}
