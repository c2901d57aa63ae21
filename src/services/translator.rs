// Translation pipeline
//
// query → special cases → conditions → aggregation/grouping → ordering/limit
//       → assembler → confidence
//
// Every failure is folded into the returned TranslationResult; nothing here
// returns an error to the caller.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;

use crate::config::TranslatorConfig;
use crate::error::TranslationError;
use crate::models::{
    parse_numeric_value, AggregateFunction, Aggregation, CandidateAggregation, CandidateCondition, ColumnInfo,
    ColumnType, ConditionValue, IntentHints, Literal, Operator, ParsedCondition, ParsedIntent, ResolutionIssue,
    SchemaContext, SortDirection, TranslationResult,
};
use crate::services::aggregation::AggregationDetector;
use crate::services::assembler::{check_operator, SqlAssembler};
use crate::services::conditions::ConditionExtractor;
use crate::services::confidence::ConfidenceScorer;
use crate::services::ordering::OrderingDetector;
use crate::services::query_context::QueryContext;
use crate::services::special_cases::{Claims, SpecialCaseMatcher};
use crate::services::synonyms::{SynonymDictionary, SynonymResolver, TypeHint};

/// Intent plus everything learned while extracting it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Understanding {
    pub intent: ParsedIntent,
    pub issues: Vec<ResolutionIssue>,
    pub special_case: Option<&'static str>,
}

pub struct TranslationPipeline {
    resolver: SynonymResolver,
    matcher: SpecialCaseMatcher,
    conditions: ConditionExtractor,
    aggregation: AggregationDetector,
    ordering: OrderingDetector,
    assembler: SqlAssembler,
    scorer: ConfidenceScorer,
}

impl TranslationPipeline {
    pub fn new(config: &TranslatorConfig, dictionary: Arc<SynonymDictionary>) -> Self {
        Self {
            resolver: SynonymResolver::new(dictionary, config.similarity_floor),
            matcher: SpecialCaseMatcher::new(),
            conditions: ConditionExtractor::new(),
            aggregation: AggregationDetector::new(),
            ordering: OrderingDetector::new(),
            assembler: SqlAssembler::new(config.default_limit),
            scorer: ConfidenceScorer::new(config.penalties.clone()),
        }
    }

    /// Built-in financial dictionary, extended from `synonyms_path` when set
    pub fn from_config(config: &TranslatorConfig) -> Result<Self> {
        let mut dictionary = SynonymDictionary::financial();
        if let Some(path) = &config.synonyms_path {
            dictionary = dictionary.extend_from_file(path)?;
        }
        Ok(Self::new(config, Arc::new(dictionary)))
    }

    pub fn resolver(&self) -> &SynonymResolver {
        &self.resolver
    }

    pub fn default_limit(&self) -> u64 {
        self.assembler.default_limit()
    }

    pub fn translate(&self, query: &str, schema: &SchemaContext) -> TranslationResult {
        self.run(query, schema, &IntentHints::default(), Vec::new())
    }

    /// Translate with strategy-provided hints; `prior_issues` are problems the
    /// strategy already met (an LLM fallback, say) and count against confidence.
    pub fn run(
        &self,
        query: &str,
        schema: &SchemaContext,
        hints: &IntentHints,
        prior_issues: Vec<ResolutionIssue>,
    ) -> TranslationResult {
        let started = Instant::now();

        if schema.columns.is_empty() {
            let err = TranslationError::Assembly(format!("table '{}' has no columns", schema.table_name));
            tracing::warn!("Translation failed: {}", err);
            return TranslationResult::failed(err.to_string(), "The table schema is empty");
        }

        let mut understanding = match self.understand(query, schema, hints) {
            Ok(understanding) => understanding,
            Err(err) => {
                tracing::warn!("Translation failed for '{}': {}", query, err);
                return TranslationResult::failed(err.to_string(), "Could not build a query from the request");
            }
        };
        let mut issues = prior_issues;
        issues.append(&mut understanding.issues);

        let sql = match self.assembler.assemble(&understanding.intent, schema) {
            Ok(sql) => sql,
            Err(err) => {
                tracing::warn!("Assembly failed for '{}': {}", query, err);
                return TranslationResult::failed(err.to_string(), explain(&understanding, &issues, None));
            }
        };

        let confidence = self.scorer.score(query, &understanding.intent, &issues);
        let applied_limit = understanding.intent.limit.or_else(|| {
            let grouped = understanding.intent.aggregation.is_some() || !understanding.intent.group_by.is_empty();
            (!grouped).then_some(self.assembler.default_limit())
        });
        let explanation = explain(&understanding, &issues, applied_limit);

        tracing::info!(
            special_case = understanding.special_case.unwrap_or("none"),
            issues = issues.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Translated query with confidence {:.2}: {}",
            confidence,
            sql
        );

        TranslationResult::succeeded(sql, explanation, confidence, understanding.special_case.map(str::to_string))
    }

    /// Extract the intent without assembling it
    pub fn understand(
        &self,
        query: &str,
        schema: &SchemaContext,
        hints: &IntentHints,
    ) -> Result<Understanding, TranslationError> {
        let ctx = QueryContext::new(query, schema, &self.resolver, &hints.learned_terms);
        let mut understanding = Understanding::default();

        let claims = match self.matcher.match_query(&ctx) {
            Some(found) => {
                understanding.intent = found.intent;
                understanding.issues = found.issues;
                understanding.special_case = Some(found.name);
                found.claims
            }
            None => Claims::default(),
        };
        let intent = &mut understanding.intent;
        let issues = &mut understanding.issues;

        // Columns a template filtered on; other sources may not add to them
        let pinned: Vec<String> = if claims.conditions {
            intent.conditions.iter().map(|c| c.column.clone()).collect()
        } else {
            Vec::new()
        };

        let extraction = self.conditions.extract(&ctx);
        let conditions_all_unresolved = extraction.value.all_unresolved();
        issues.extend(extraction.issues);
        for condition in extraction.value.conditions {
            admit(intent, &pinned, condition);
        }
        for condition in &hints.resolved_conditions {
            admit(intent, &pinned, condition.clone());
        }
        for candidate in &hints.candidate_conditions {
            match hinted_condition(&ctx, candidate) {
                Ok(condition) => admit(intent, &pinned, condition),
                Err(TranslationError::UnresolvedTerm(term)) => {
                    issues.push(ResolutionIssue::UnresolvedTerm { term });
                }
                Err(err) => {
                    tracing::debug!("Dropping hinted condition on '{}': {}", candidate.column, err);
                    issues.push(ResolutionIssue::DroppedCondition {
                        phrase: format!("{} {} {}", candidate.column, candidate.operator, candidate.value),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if conditions_all_unresolved && intent.conditions.is_empty() {
            let terms: Vec<String> = issues
                .iter()
                .filter_map(|issue| match issue {
                    ResolutionIssue::UnresolvedTerm { term } => Some(term.clone()),
                    _ => None,
                })
                .collect();
            return Err(TranslationError::UnresolvedTerm(terms.join(", ")));
        }

        if !claims.aggregation {
            let extraction = self.aggregation.detect(&ctx)?;
            issues.extend(extraction.issues);
            intent.aggregation = extraction.value.aggregation;
            intent.group_by = extraction.value.group_by;

            if let Some(candidate) = &hints.candidate_aggregation {
                match hinted_aggregation(&ctx, candidate) {
                    Some(aggregation) => intent.aggregation = Some(aggregation),
                    None => issues.push(ResolutionIssue::UnresolvedTerm {
                        term: candidate.column.clone().unwrap_or_else(|| candidate.function.clone()),
                    }),
                }
            }
            let hinted_groups: Vec<String> = hints
                .candidate_grouping
                .iter()
                .filter_map(|term| {
                    let found = ctx
                        .resolve_term(term, TypeHint::Dimension)
                        .filter(|r| r.column_type.is_dimension());
                    if found.is_none() {
                        issues.push(ResolutionIssue::UnresolvedTerm { term: term.clone() });
                    }
                    found.map(|r| r.column)
                })
                .collect();
            if !hinted_groups.is_empty() {
                intent.group_by = hinted_groups;
            }
        }

        if !claims.ordering {
            let extraction = self.ordering.detect(&ctx, intent.aggregation.as_ref());
            issues.extend(extraction.issues);
            intent.order_by = extraction.value.order_by;
            intent.limit = extraction.value.limit;
        }

        reconcile_grouping(&ctx, intent, issues);
        Ok(understanding)
    }
}

fn admit(intent: &mut ParsedIntent, pinned: &[String], condition: ParsedCondition) {
    if pinned.iter().any(|p| p.eq_ignore_ascii_case(&condition.column)) {
        tracing::debug!("Skipping '{}': column already set by the template", condition.source_phrase);
        return;
    }
    intent.push_condition(condition);
}

/// Make grouping, aggregation and ordering agree with each other
fn reconcile_grouping(ctx: &QueryContext<'_>, intent: &mut ParsedIntent, issues: &mut Vec<ResolutionIssue>) {
    if !intent.group_by.is_empty() && intent.aggregation.is_none() {
        let target = ctx
            .numeric_mentions()
            .find_map(|m| m.resolve(TypeHint::Numeric))
            .filter(|r| r.column_type == ColumnType::Numeric);
        match target {
            Some(target) => intent.aggregation = Some(Aggregation::new(AggregateFunction::Sum, target.column)),
            None => {
                issues.push(ResolutionIssue::DroppedCondition {
                    phrase: format!("by {}", intent.group_by.join(", ")),
                    reason: "grouping without a numeric column to aggregate".to_string(),
                });
                intent.group_by.clear();
            }
        }
    }

    // Grouped rows can only be ordered by a group column or the aggregate
    if let (Some(order), Some(aggregation)) = (intent.order_by.as_mut(), intent.aggregation.as_ref()) {
        let in_groups = intent.group_by.iter().any(|g| g.eq_ignore_ascii_case(&order.column));
        if !in_groups && !aggregation.covers(&order.column) {
            tracing::debug!(
                "Ordering by aggregate '{}' instead of ungrouped column '{}'",
                aggregation.alias(),
                order.column
            );
            order.column = aggregation.alias();
        }
    }
}

fn hinted_condition(ctx: &QueryContext<'_>, candidate: &CandidateCondition) -> Result<ParsedCondition, TranslationError> {
    let resolution = ctx
        .resolve_term(&candidate.column, TypeHint::Any)
        .ok_or_else(|| TranslationError::UnresolvedTerm(candidate.column.clone()))?;
    let column = ctx
        .schema
        .column(&resolution.column)
        .ok_or_else(|| TranslationError::UnresolvedTerm(candidate.column.clone()))?;
    let operator = Operator::parse(&candidate.operator)
        .ok_or_else(|| TranslationError::InvalidSql(format!("unknown operator '{}'", candidate.operator)))?;
    let value = hinted_value(&candidate.value, operator, column)?;
    check_operator(column, operator, &value, ctx.schema)?;

    Ok(ParsedCondition::new(
        column.name.clone(),
        operator,
        value,
        format!("{} {} {}", candidate.column, candidate.operator, candidate.value),
    ))
}

fn hinted_literal(value: &Value, column: &ColumnInfo) -> Option<Literal> {
    match value {
        Value::Number(n) => n.as_f64().map(Literal::Number),
        Value::String(s) if column.inferred_type == ColumnType::Numeric => parse_numeric_value(s).map(Literal::Number),
        Value::String(s) => Some(Literal::Text(s.clone())),
        _ => None,
    }
}

fn hinted_value(value: &Value, operator: Operator, column: &ColumnInfo) -> Result<ConditionValue, TranslationError> {
    let unsupported = || TranslationError::InvalidSql(format!("unsupported value {} for '{}'", value, column.name));
    match (operator, value) {
        (Operator::Between, Value::Array(items)) if items.len() == 2 => {
            let low = hinted_literal(&items[0], column).ok_or_else(unsupported)?;
            let high = hinted_literal(&items[1], column).ok_or_else(unsupported)?;
            Ok(ConditionValue::Range(low, high))
        }
        (Operator::Between, _) => Err(unsupported()),
        (Operator::Like, Value::String(s)) if !s.contains('%') => Ok(ConditionValue::text(format!("%{}%", s))),
        _ => hinted_literal(value, column).map(ConditionValue::Single).ok_or_else(unsupported),
    }
}

fn hinted_aggregation(ctx: &QueryContext<'_>, candidate: &CandidateAggregation) -> Option<Aggregation> {
    let function = AggregateFunction::parse(&candidate.function)?;
    match candidate.column.as_deref() {
        None | Some("*") if function == AggregateFunction::Count => Some(Aggregation::count_rows()),
        None | Some("*") => None,
        Some(term) => {
            let hint = if function.requires_numeric() {
                TypeHint::Numeric
            } else {
                TypeHint::Any
            };
            let resolution = ctx.resolve_term(term, hint)?;
            if function.requires_numeric() && resolution.column_type != ColumnType::Numeric {
                return None;
            }
            Some(Aggregation::new(function, resolution.column))
        }
    }
}

/// Plain-language account of what the SQL does
fn explain(understanding: &Understanding, issues: &[ResolutionIssue], applied_limit: Option<u64>) -> String {
    let intent = &understanding.intent;
    let mut parts = Vec::new();

    if intent.conditions.is_empty() {
        parts.push("No filters applied".to_string());
    } else {
        let filters: Vec<String> = intent
            .conditions
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let text = format!("{} {} {}", c.column, c.operator.describe(), c.value);
                if i == 0 {
                    text
                } else {
                    format!("{} {}", c.connector.as_sql().to_lowercase(), text)
                }
            })
            .collect();
        parts.push(format!("Filters rows where {}", filters.join(" ")));
    }

    if let Some(aggregation) = &intent.aggregation {
        let target = match aggregation.target_column.as_deref() {
            Some(column) if aggregation.distinct => format!("distinct {}", column),
            Some(column) => column.to_string(),
            None => "rows".to_string(),
        };
        parts.push(format!("Computes the {} of {}", aggregation.function.describe(), target));
    }
    if !intent.group_by.is_empty() {
        parts.push(format!("Groups by {}", intent.group_by.join(", ")));
    }
    if let Some(order) = &intent.order_by {
        let direction = match order.direction {
            SortDirection::Asc => "ascending",
            SortDirection::Desc => "descending",
        };
        parts.push(format!("Orders by {} {}", order.column, direction));
    }
    if let Some(limit) = applied_limit {
        parts.push(format!("Returns at most {} rows", limit));
    }
    if let Some(name) = understanding.special_case {
        parts.push(format!("Matched template '{}'", name));
    }

    let unresolved: Vec<&str> = issues
        .iter()
        .filter_map(|issue| match issue {
            ResolutionIssue::UnresolvedTerm { term } => Some(term.as_str()),
            _ => None,
        })
        .collect();
    if !unresolved.is_empty() {
        parts.push(format!("Could not match: {}", unresolved.join(", ")));
    }
    if issues.iter().any(|i| matches!(i, ResolutionIssue::LlmFallback { .. })) {
        parts.push("LLM hints unavailable, used pattern matching".to_string());
    }

    format!("{}.", parts.join(". "))
}
