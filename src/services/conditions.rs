// Condition Extractor
//
// Scans the token stream for comparison vocabulary and turns each match into
// one ParsedCondition: subject column on the left, literal (or another
// column) on the right. Conditions join left to right; OR only appears where
// the user wrote "or".

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{
    ColumnInfo, ColumnType, ConditionValue, Connector, Extraction, Literal, Operator,
    ParsedCondition, ResolutionIssue,
};
use crate::services::assembler::check_operator;
use crate::services::query_context::QueryContext;
use crate::services::synonyms::{is_stopword, Resolution, TypeHint};

static DATE_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}(-\d{2}(-\d{2})?)?|\d{1,2}/\d{1,2}/\d{2,4})$").expect("date literal pattern is valid")
});

/// Whether a missing subject or value is worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strength {
    /// Unambiguous comparison wording ("greater than"); failures are recorded
    Strict,
    /// Words with everyday meanings ("over", "is"); failures are ignored
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeKind {
    Contains,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhraseKind {
    Compare(Operator, Strength),
    Between,
    Like(LikeKind),
}

struct OperatorPhrase {
    words: &'static [&'static str],
    kind: PhraseKind,
}

const fn strict(words: &'static [&'static str], op: Operator) -> OperatorPhrase {
    OperatorPhrase {
        words,
        kind: PhraseKind::Compare(op, Strength::Strict),
    }
}

const fn soft(words: &'static [&'static str], op: Operator) -> OperatorPhrase {
    OperatorPhrase {
        words,
        kind: PhraseKind::Compare(op, Strength::Soft),
    }
}

const fn like(words: &'static [&'static str], kind: LikeKind) -> OperatorPhrase {
    OperatorPhrase {
        words,
        kind: PhraseKind::Like(kind),
    }
}

const PHRASES: &[OperatorPhrase] = &[
    strict(&["greater", "than", "or", "equal", "to"], Operator::Gte),
    strict(&["more", "than", "or", "equal", "to"], Operator::Gte),
    strict(&["less", "than", "or", "equal", "to"], Operator::Lte),
    strict(&["in", "excess", "of"], Operator::Gt),
    strict(&["not", "equal", "to"], Operator::NotEq),
    strict(&["no", "less", "than"], Operator::Gte),
    strict(&["no", "more", "than"], Operator::Lte),
    strict(&["greater", "than"], Operator::Gt),
    strict(&["more", "than"], Operator::Gt),
    strict(&["higher", "than"], Operator::Gt),
    strict(&["larger", "than"], Operator::Gt),
    strict(&["bigger", "than"], Operator::Gt),
    strict(&["less", "than"], Operator::Lt),
    strict(&["lower", "than"], Operator::Lt),
    strict(&["fewer", "than"], Operator::Lt),
    strict(&["smaller", "than"], Operator::Lt),
    strict(&["at", "least"], Operator::Gte),
    strict(&["at", "most"], Operator::Lte),
    strict(&["equal", "to"], Operator::Eq),
    strict(&["other", "than"], Operator::NotEq),
    strict(&["is", "not"], Operator::NotEq),
    like(&["starting", "with"], LikeKind::Prefix),
    like(&["starts", "with"], LikeKind::Prefix),
    like(&["beginning", "with"], LikeKind::Prefix),
    like(&["begins", "with"], LikeKind::Prefix),
    like(&["ending", "with"], LikeKind::Suffix),
    like(&["ends", "with"], LikeKind::Suffix),
    like(&["containing"], LikeKind::Contains),
    like(&["contains"], LikeKind::Contains),
    OperatorPhrase {
        words: &["between"],
        kind: PhraseKind::Between,
    },
    strict(&["exceeds"], Operator::Gt),
    strict(&["exceeding"], Operator::Gt),
    strict(&["exceed"], Operator::Gt),
    strict(&["equals"], Operator::Eq),
    strict(&[">="], Operator::Gte),
    strict(&["<="], Operator::Lte),
    strict(&["!="], Operator::NotEq),
    strict(&["<>"], Operator::NotEq),
    strict(&["=="], Operator::Eq),
    strict(&["="], Operator::Eq),
    strict(&[">"], Operator::Gt),
    strict(&["<"], Operator::Lt),
    soft(&["above"], Operator::Gt),
    soft(&["over"], Operator::Gt),
    soft(&["after"], Operator::Gt),
    soft(&["below"], Operator::Lt),
    soft(&["under"], Operator::Lt),
    soft(&["before"], Operator::Lt),
    soft(&["since"], Operator::Gte),
    soft(&["is"], Operator::Eq),
];

const NEGATIVE_WORDS: &[&str] = &["negative", "unfavorable", "unfavourable"];
const POSITIVE_WORDS: &[&str] = &["positive", "favorable", "favourable"];
const CONNECTOR_WORDS: &[&str] = &["and", "or", "but", "also"];
const VALUE_FILLERS: &[&str] = &["the", "a", "an", "that", "of"];
/// Ranking and aggregate vocabulary never reads as a text value ("which region is the best")
const RESERVED_WORDS: &[&str] = &[
    "average", "best", "biggest", "bottom", "count", "highest", "largest", "least", "lowest",
    "max", "maximum", "mean", "min", "minimum", "most", "smallest", "sum", "top", "total",
    "worst",
];

fn token_is(ctx: &QueryContext<'_>, idx: usize, expected: &str) -> bool {
    ctx.word(idx) == expected || ctx.raw(idx) == expected
}

fn phrase_at(ctx: &QueryContext<'_>, idx: usize) -> Option<&'static OperatorPhrase> {
    PHRASES.iter().find(|phrase| {
        phrase
            .words
            .iter()
            .enumerate()
            .all(|(offset, w)| token_is(ctx, idx + offset, w))
    })
}

fn sign_at(ctx: &QueryContext<'_>, idx: usize) -> Option<Operator> {
    let word = ctx.word(idx);
    if NEGATIVE_WORDS.contains(&word) {
        Some(Operator::Lt)
    } else if POSITIVE_WORDS.contains(&word) {
        Some(Operator::Gt)
    } else {
        None
    }
}

/// Conditions found in a query plus bookkeeping for the all-failed rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    pub conditions: Vec<ParsedCondition>,
    /// Comparison phrases that got as far as needing a subject column
    pub attempted: usize,
    /// Of those, how many were dropped because the subject term did not resolve
    pub unresolved: usize,
}

impl ConditionSet {
    /// Every attempted condition failed on an unresolved term
    pub fn all_unresolved(&self) -> bool {
        self.conditions.is_empty() && self.unresolved > 0 && self.unresolved == self.attempted
    }
}

/// The column a condition is about
struct Subject {
    column: ColumnInfo,
    /// Token index the subject starts at, for phrases and OR detection
    start: usize,
}

pub struct ConditionExtractor;

impl ConditionExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, ctx: &QueryContext<'_>) -> Extraction<ConditionSet> {
        let mut set = ConditionSet::default();
        let mut issues = Vec::new();

        let has_operator = (0..ctx.len()).any(|i| {
            sign_at(ctx, i).is_some()
                || phrase_at(ctx, i)
                    .map(|p| !matches!(p.kind, PhraseKind::Compare(_, Strength::Soft)))
                    .unwrap_or(false)
        });
        let mut floor = 0;
        let mut idx = 0;

        while idx < ctx.len() {
            // "actual vs budget" compares two measures without saying how
            if matches!(ctx.word(idx), "vs" | "versus") && !has_operator {
                let left = ctx
                    .mention_before(idx, floor)
                    .map(|m| m.phrase.clone())
                    .unwrap_or_else(|| ctx.span(idx.saturating_sub(1), idx));
                let right = ctx
                    .mention_after(idx + 1, idx + 3)
                    .map(|m| m.phrase.clone())
                    .unwrap_or_else(|| ctx.span(idx + 1, idx + 2));
                let term = format!("{} vs {}", left, right);
                tracing::debug!("Comparison without operator: {}", term);
                issues.push(ResolutionIssue::UnresolvedTerm { term });
                idx += 1;
                continue;
            }

            if let Some(operator) = sign_at(ctx, idx) {
                if let Some((condition, start, end)) = self.sign_condition(ctx, idx, operator, floor) {
                    set.attempted += 1;
                    self.push(ctx, &mut set, condition, floor, start);
                    floor = end;
                    idx = end;
                    continue;
                }
                idx += 1;
                continue;
            }

            let Some(phrase) = phrase_at(ctx, idx) else {
                idx += 1;
                continue;
            };
            let op_end = idx + phrase.words.len();

            // A bare "is" in front of real comparison wording is not itself a comparison
            if phrase.words == ["is"]
                && (phrase_at(ctx, op_end).is_some() || sign_at(ctx, op_end).is_some())
            {
                idx = op_end;
                continue;
            }

            let strength = match phrase.kind {
                PhraseKind::Compare(_, strength) => strength,
                _ => Strength::Strict,
            };

            // Ambiguity notes only count once the condition is actually used
            let mut pending = Vec::new();
            let subject = match self.subject(ctx, idx, floor, &set, &mut pending) {
                SubjectLookup::Found(subject) => subject,
                SubjectLookup::Unresolved(term) => {
                    if strength == Strength::Strict {
                        set.attempted += 1;
                        set.unresolved += 1;
                        let phrase_text = ctx.span(idx.saturating_sub(term.split(' ').count()), op_end + 1);
                        tracing::warn!("Dropping condition '{}': unresolved term '{}'", phrase_text, term);
                        issues.push(ResolutionIssue::UnresolvedTerm { term: term.clone() });
                        issues.push(ResolutionIssue::DroppedCondition {
                            phrase: phrase_text,
                            reason: format!("no column matches '{}'", term),
                        });
                    }
                    idx = op_end;
                    continue;
                }
                SubjectLookup::Missing => {
                    if strength == Strength::Strict {
                        issues.push(ResolutionIssue::DroppedCondition {
                            phrase: ctx.span(idx, op_end + 1),
                            reason: "comparison has no subject column".to_string(),
                        });
                    }
                    idx = op_end;
                    continue;
                }
            };

            let parsed = match phrase.kind {
                PhraseKind::Compare(operator, _) => {
                    parse_value(ctx, op_end, &subject.column, operator).map(|(v, end)| (operator, v, end))
                }
                PhraseKind::Between => parse_range(ctx, op_end, &subject.column)
                    .map(|(v, end)| (Operator::Between, v, end)),
                PhraseKind::Like(kind) => {
                    parse_pattern(ctx, op_end, kind).map(|(v, end)| (Operator::Like, v, end))
                }
            };

            let Some((operator, value, end)) = parsed else {
                if strength == Strength::Strict {
                    set.attempted += 1;
                    issues.push(ResolutionIssue::DroppedCondition {
                        phrase: ctx.span(subject.start, op_end + 1),
                        reason: "comparison has no value".to_string(),
                    });
                }
                idx = op_end;
                continue;
            };

            set.attempted += 1;
            issues.append(&mut pending);
            let source_phrase = ctx.span(subject.start, end);
            if let Err(err) = check_operator(&subject.column, operator, &value, ctx.schema) {
                tracing::warn!("Dropping condition '{}': {}", source_phrase, err);
                issues.push(ResolutionIssue::DroppedCondition {
                    phrase: source_phrase,
                    reason: err.to_string(),
                });
                floor = end;
                idx = end;
                continue;
            }

            let condition = ParsedCondition::new(subject.column.name.clone(), operator, value, source_phrase);
            let start = subject.start.min(idx);
            self.push(ctx, &mut set, condition, floor, start);
            floor = end;
            idx = end;
        }

        tracing::debug!(
            "Extracted {} condition(s) from {} attempt(s)",
            set.conditions.len(),
            set.attempted
        );
        Extraction::new(set, issues)
    }

    fn push(
        &self,
        ctx: &QueryContext<'_>,
        set: &mut ConditionSet,
        condition: ParsedCondition,
        floor: usize,
        start: usize,
    ) {
        let explicit_or = (floor..start.max(floor)).any(|i| ctx.word(i) == "or");
        let connector = if explicit_or && !set.conditions.is_empty() {
            Connector::Or
        } else {
            Connector::And
        };
        let condition = condition.with_connector(connector);
        if set.conditions.iter().any(|c| c.same_predicate(&condition)) {
            tracing::debug!("Merged duplicate condition '{}'", condition.source_phrase);
            return;
        }
        set.conditions.push(condition);
    }

    /// "negative variance", "variance is negative"
    fn sign_condition(
        &self,
        ctx: &QueryContext<'_>,
        idx: usize,
        operator: Operator,
        floor: usize,
    ) -> Option<(ParsedCondition, usize, usize)> {
        let after = ctx
            .mention_after(idx + 1, idx + 3)
            .filter(|m| (idx + 1..m.start).all(|i| VALUE_FILLERS.contains(&ctx.word(i))));

        let (resolution, start, end) = match after {
            Some(mention) => (mention.resolve(TypeHint::Numeric)?, idx, mention.end),
            None => {
                let before = ctx.mention_before(idx, floor)?;
                (before.resolve(TypeHint::Numeric)?, before.start, idx + 1)
            }
        };

        if resolution.column_type != ColumnType::Numeric {
            return None;
        }
        let condition = ParsedCondition::new(
            resolution.column,
            operator,
            ConditionValue::number(0.0),
            ctx.span(start, end),
        );
        Some((condition, start, end))
    }

    fn subject(
        &self,
        ctx: &QueryContext<'_>,
        op_start: usize,
        floor: usize,
        set: &ConditionSet,
        issues: &mut Vec<ResolutionIssue>,
    ) -> SubjectLookup {
        if let Some(mention) = ctx.mention_before(op_start, floor) {
            let hint = if phrase_at(ctx, op_start).map(|p| is_ordering_phrase(p.kind)).unwrap_or(false) {
                TypeHint::Numeric
            } else {
                TypeHint::Any
            };
            if let Some(resolution) = mention.resolve(hint) {
                note_ambiguity(&resolution, issues);
                if let Some(column) = ctx.schema.column(&resolution.column) {
                    return SubjectLookup::Found(Subject {
                        column: column.clone(),
                        start: mention.start,
                    });
                }
            }
        }

        // "sales above 100 and below 500": the second comparison reuses the first subject
        let gap_is_connective = (floor..op_start).all(|i| {
            let w = ctx.word(i);
            CONNECTOR_WORDS.contains(&w) || is_stopword(w)
        });
        if gap_is_connective && floor > 0 {
            if let Some(previous) = set.conditions.last() {
                if let Some(column) = ctx.schema.column(&previous.column) {
                    return SubjectLookup::Found(Subject {
                        column: column.clone(),
                        start: op_start,
                    });
                }
            }
        }

        // Free words right before the operator, resolved fuzzily
        let mut end = op_start;
        while end > floor && is_stopword(ctx.word(end - 1)) {
            end -= 1;
        }
        let mut start = end;
        while start > floor && end - start < 3 {
            let w = ctx.word(start - 1);
            if w.is_empty() || is_stopword(w) || CONNECTOR_WORDS.contains(&w) || ctx.number_at(start - 1).is_some() {
                break;
            }
            start -= 1;
        }
        if start == end {
            return SubjectLookup::Missing;
        }

        let term = ctx.span(start, end);
        match ctx.resolve_phrase(&term, TypeHint::Numeric) {
            Some(resolution) => {
                note_ambiguity(&resolution, issues);
                match ctx.schema.column(&resolution.column) {
                    Some(column) => SubjectLookup::Found(Subject {
                        column: column.clone(),
                        start,
                    }),
                    None => SubjectLookup::Unresolved(term),
                }
            }
            None => SubjectLookup::Unresolved(term),
        }
    }
}

impl Default for ConditionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

enum SubjectLookup {
    Found(Subject),
    Unresolved(String),
    Missing,
}

fn is_ordering_phrase(kind: PhraseKind) -> bool {
    match kind {
        PhraseKind::Compare(op, _) => op.is_ordering(),
        PhraseKind::Between => true,
        PhraseKind::Like(_) => false,
    }
}

pub(crate) fn note_ambiguity(resolution: &Resolution, issues: &mut Vec<ResolutionIssue>) {
    if resolution.is_ambiguous() {
        let mut candidates = vec![resolution.column.clone()];
        candidates.extend(resolution.tied_with.iter().cloned());
        let issue = ResolutionIssue::AmbiguousColumn {
            term: resolution.term.clone(),
            candidates,
        };
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    }
}

fn skip_fillers(ctx: &QueryContext<'_>, mut idx: usize) -> usize {
    while idx < ctx.len() && VALUE_FILLERS.contains(&ctx.word(idx)) {
        idx += 1;
    }
    idx
}

fn looks_like_date(raw: &str) -> bool {
    DATE_LITERAL.is_match(raw.trim_end_matches(['.', ',']))
}

pub(crate) fn number_literal(ctx: &QueryContext<'_>, idx: usize, column: &ColumnInfo) -> Option<(Literal, usize)> {
    let number = ctx.number_at(idx)?;
    let value = if number.percent && column.stores_fractions() {
        number.value / 100.0
    } else {
        number.value
    };
    Some((Literal::Number(value), number.end))
}

/// Text with the casing of a matching sample value, else the user's casing
fn text_literal(ctx: &QueryContext<'_>, lowered: &str, column: &ColumnInfo) -> Literal {
    let from_samples = column
        .sample_values
        .iter()
        .find(|s| s.to_lowercase() == lowered)
        .cloned();
    Literal::Text(from_samples.unwrap_or_else(|| ctx.recover_casing(lowered)))
}

/// `'North East'` or `"North East"`, possibly spanning several tokens
fn quoted_text(ctx: &QueryContext<'_>, idx: usize) -> Option<(String, usize)> {
    let first = ctx.raw(idx);
    let quote = first.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let mut parts = Vec::new();
    let mut end = idx;
    while end < ctx.len() {
        let raw = ctx.raw(end).trim_end_matches(['.', ',']);
        parts.push(raw);
        end += 1;
        let closes = raw.ends_with(quote) && !(end - 1 == idx && raw.len() == 1);
        if closes {
            let joined = parts.join(" ");
            let inner = joined.trim_matches(quote).to_string();
            return (!inner.is_empty()).then_some((inner, end));
        }
    }
    None
}

fn parse_value(
    ctx: &QueryContext<'_>,
    start: usize,
    column: &ColumnInfo,
    operator: Operator,
) -> Option<(ConditionValue, usize)> {
    let idx = skip_fillers(ctx, start);
    if idx >= ctx.len() {
        return None;
    }

    if let Some((text, end)) = quoted_text(ctx, idx) {
        return Some((ConditionValue::Single(text_literal(ctx, &text, column)), end));
    }

    if column.inferred_type == ColumnType::Date && looks_like_date(ctx.raw(idx)) {
        let raw = ctx.raw(idx).trim_end_matches(['.', ',']).to_string();
        return Some((ConditionValue::text(raw), idx + 1));
    }

    if let Some((literal, end)) = number_literal(ctx, idx, column) {
        return Some((ConditionValue::Single(literal), end));
    }

    // "actual sales greater than budget sales"
    if let Some(mention) = ctx.mention_at(idx) {
        let hint = if column.inferred_type == ColumnType::Numeric {
            TypeHint::Numeric
        } else {
            TypeHint::Any
        };
        if let Some(other) = mention.resolve(hint) {
            if !other.column.eq_ignore_ascii_case(&column.name) {
                return Some((ConditionValue::Single(Literal::Column(other.column)), mention.end));
            }
        }
    }

    if matches!(operator, Operator::Eq | Operator::NotEq) && !column.inferred_type.is_orderable() {
        // Multi-word sample values first: "north east"
        for len in (1..=3).rev() {
            let phrase = ctx.span(idx, idx + len);
            if phrase.split(' ').count() == len
                && column.sample_values.iter().any(|s| s.to_lowercase() == phrase)
            {
                return Some((ConditionValue::Single(text_literal(ctx, &phrase, column)), idx + len));
            }
        }
        let word = ctx.word(idx);
        if !word.is_empty()
            && !is_stopword(word)
            && !CONNECTOR_WORDS.contains(&word)
            && !RESERVED_WORDS.contains(&word)
            && phrase_at(ctx, idx).is_none()
        {
            return Some((ConditionValue::Single(text_literal(ctx, word, column)), idx + 1));
        }
    }

    None
}

fn parse_bound(ctx: &QueryContext<'_>, idx: usize, column: &ColumnInfo) -> Option<(Literal, usize)> {
    let idx = skip_fillers(ctx, idx);
    if column.inferred_type == ColumnType::Date && looks_like_date(ctx.raw(idx)) {
        let raw = ctx.raw(idx).trim_end_matches(['.', ',']).to_string();
        return Some((Literal::Text(raw), idx + 1));
    }
    number_literal(ctx, idx, column)
}

fn parse_range(ctx: &QueryContext<'_>, start: usize, column: &ColumnInfo) -> Option<(ConditionValue, usize)> {
    let (low, after_low) = parse_bound(ctx, start, column)?;
    if !matches!(ctx.word(after_low), "and" | "to") {
        return None;
    }
    let (high, end) = parse_bound(ctx, after_low + 1, column)?;
    // "between 10 and 5" means the same rows as "between 5 and 10"
    let (low, high) = match (&low, &high) {
        (Literal::Number(a), Literal::Number(b)) if a > b => (high, low),
        _ => (low, high),
    };
    Some((ConditionValue::Range(low, high), end))
}

fn parse_pattern(ctx: &QueryContext<'_>, start: usize, kind: LikeKind) -> Option<(ConditionValue, usize)> {
    let idx = skip_fillers(ctx, start);
    let (text, end) = match quoted_text(ctx, idx) {
        Some(quoted) => quoted,
        None => {
            let word = ctx.word(idx);
            if word.is_empty() || is_stopword(word) || RESERVED_WORDS.contains(&word) {
                return None;
            }
            (word.to_string(), idx + 1)
        }
    };
    let text = ctx.recover_casing(&text);
    let pattern = match kind {
        LikeKind::Contains => format!("%{}%", text),
        LikeKind::Prefix => format!("{}%", text),
        LikeKind::Suffix => format!("%{}", text),
    };
    Some((ConditionValue::text(pattern), end))
}
