// Special-Case Matcher
//
// Hand-written templates for frequent financial phrasings. Each template is a
// data record {pattern, builder}; the first one whose pattern matches and
// whose builder resolves the captured phrases wins. A template claims the
// parts of the intent it pins down; the generic extractors fill the rest.
// Conditions are never claimed wholesale: a template pins the columns it
// filters on, and extracted conditions on any other column still apply.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::{
    AggregateFunction, Aggregation, ColumnType, ConditionValue, OrderBy, Operator, ParsedCondition, ParsedIntent,
    ResolutionIssue, SortDirection,
};
use crate::services::assembler::check_operator;
use crate::services::conditions::{note_ambiguity, number_literal};
use crate::services::ordering::DEFAULT_TOP_N;
use crate::services::query_context::QueryContext;
use crate::services::synonyms::{Resolution, TypeHint};

/// Parts of the intent a template has pinned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Claims {
    /// Template conditions win over other conditions on the same columns
    pub conditions: bool,
    pub aggregation: bool,
    pub ordering: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialCaseMatch {
    pub name: &'static str,
    pub intent: ParsedIntent,
    pub claims: Claims,
    pub issues: Vec<ResolutionIssue>,
}

struct Built {
    intent: ParsedIntent,
    claims: Claims,
    issues: Vec<ResolutionIssue>,
}

type Builder = fn(&Captures<'_>, &QueryContext<'_>) -> Option<Built>;

struct SpecialCase {
    name: &'static str,
    pattern: &'static LazyLock<Regex>,
    build: Builder,
}

const PHRASE: &str = r"[a-z][a-z0-9_ ]*?";
const COUNT_WORDS: &[(&str, u64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("fifteen", 15),
    ("twenty", 20),
];

fn compile(pattern: &str) -> Regex {
    let pattern = pattern.replace("{phrase}", PHRASE);
    Regex::new(&pattern).expect("special case pattern is valid")
}

static TOP_N_BY_METRIC: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:(?:show|list|find|get|give|display|what are|which are)\s+(?:me\s+)?)?(?:the\s+)?(top|bottom|highest|lowest)\s+(?:(\d+|[a-z]+teen|one|two|three|four|five|six|seven|eight|nine|ten|twenty)\s+)?({phrase})\s+(?:by|in terms of|based on)\s+(?:the\s+)?(?:total\s+)?({phrase})(?:\s+(?:where|with|having|whose|that|which|when|for|in)\s+.*?)?\.?$",
    )
});

static METRIC_SIGN: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:.*?\b(?:where|with|having|whose)\s+)?(?:the\s+)?(?P<metric>{phrase})\s+(?:is|are|was|were)\s+(?P<sign>negative|unfavou?rable|positive|favou?rable)\.?$|^.*?\b(?P<sign2>negative|unfavou?rable|positive|favou?rable)\s+(?P<metric2>{phrase})\.?$",
    )
});

static DIMENSION_THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:show|list|find|which|what|display|get)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?(?P<dimension>{phrase})\s+(?:with|where|having|whose|that have|have|has)\s+(?:an?\s+)?(?:the\s+)?(?P<metric>{phrase})\s+(?:is\s+|are\s+|of\s+)?(?P<op>above|over|exceeding|greater than|more than|below|under|less than)\s+(?P<value>\S+(?:\s+(?:thousand|million|billion|percent))?)\.?$",
    )
});

static COUNT_WHERE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?:how many|number of|count of|count)\s+(?:the\s+)?({phrase})\s+(?:have|has|had|with|where|are|were)\s+\S.*$")
});

static AGGREGATE_BY_DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:(?:show|get|what is|what are|give)\s+(?:me\s+)?)?(?:the\s+)?(?P<function>average|avg|mean|total|sum of|sum|maximum|max|minimum|min)\s+(?:of\s+)?(?:the\s+)?(?P<metric>{phrase})\s+(?:by|per|for each|across)\s+(?:the\s+)?(?P<dimension>{phrase})\.?$",
    )
});

/// Templates in priority order
static SPECIAL_CASES: [SpecialCase; 5] = [
    SpecialCase {
        name: "top_n_by_metric",
        pattern: &TOP_N_BY_METRIC,
        build: top_n_by_metric,
    },
    SpecialCase {
        name: "metric_sign",
        pattern: &METRIC_SIGN,
        build: metric_sign,
    },
    SpecialCase {
        name: "dimension_above_threshold",
        pattern: &DIMENSION_THRESHOLD,
        build: dimension_above_threshold,
    },
    SpecialCase {
        name: "count_where",
        pattern: &COUNT_WHERE,
        build: count_where,
    },
    SpecialCase {
        name: "aggregate_by_dimension",
        pattern: &AGGREGATE_BY_DIMENSION,
        build: aggregate_by_dimension,
    },
];

pub struct SpecialCaseMatcher;

impl SpecialCaseMatcher {
    pub fn new() -> Self {
        Self
    }

    /// First template that both matches the query and resolves against the schema
    pub fn match_query(&self, ctx: &QueryContext<'_>) -> Option<SpecialCaseMatch> {
        SPECIAL_CASES.iter().find_map(|case| {
            let captures = case.pattern.captures(&ctx.normalized)?;
            let built = (case.build)(&captures, ctx)?;
            tracing::debug!("Special case '{}' matched", case.name);
            Some(SpecialCaseMatch {
                name: case.name,
                intent: built.intent,
                claims: built.claims,
                issues: built.issues,
            })
        })
    }

    pub fn template_names(&self) -> Vec<&'static str> {
        SPECIAL_CASES.iter().map(|case| case.name).collect()
    }
}

impl Default for SpecialCaseMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric(ctx: &QueryContext<'_>, phrase: &str) -> Option<Resolution> {
    ctx.resolve_phrase(phrase, TypeHint::Numeric)
        .filter(|r| r.column_type == ColumnType::Numeric)
}

fn dimension(ctx: &QueryContext<'_>, phrase: &str) -> Option<Resolution> {
    ctx.resolve_phrase(phrase, TypeHint::Dimension)
        .filter(|r| r.column_type.is_dimension())
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .or_else(|| COUNT_WORDS.iter().find(|(word, _)| *word == raw).map(|(_, n)| *n))
        .filter(|n| *n > 0)
}

/// Token index of a byte offset into the normalized query
fn token_index(ctx: &QueryContext<'_>, offset: usize) -> usize {
    ctx.normalized[..offset].split(' ').filter(|t| !t.is_empty()).count()
}

// "top 5 regions by actual sales"
fn top_n_by_metric(caps: &Captures<'_>, ctx: &QueryContext<'_>) -> Option<Built> {
    let direction = match &caps[1] {
        "top" | "highest" => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    let limit = caps
        .get(2)
        .and_then(|m| parse_count(m.as_str()))
        .unwrap_or(DEFAULT_TOP_N);
    let metric = numeric(ctx, &caps[4])?;

    let mut issues = Vec::new();
    note_ambiguity(&metric, &mut issues);

    let mut intent = ParsedIntent {
        order_by: Some(OrderBy::new(metric.column.clone(), direction)),
        limit: Some(limit),
        ..Default::default()
    };
    // Without a dimension column ("top 5 deals by revenue") this ranks raw rows
    if let Some(group) = dimension(ctx, &caps[3]) {
        note_ambiguity(&group, &mut issues);
        intent.group_by = vec![group.column];
        intent.aggregation = Some(Aggregation::new(AggregateFunction::Sum, metric.column));
    }

    Some(Built {
        intent,
        claims: Claims {
            aggregation: true,
            ordering: true,
            ..Default::default()
        },
        issues,
    })
}

// "transactions where sales variance is negative", "unfavorable price variance"
fn metric_sign(caps: &Captures<'_>, ctx: &QueryContext<'_>) -> Option<Built> {
    let (metric, sign) = match (caps.name("metric"), caps.name("sign")) {
        (Some(metric), Some(sign)) => (metric, sign),
        _ => (caps.name("metric2")?, caps.name("sign2")?),
    };
    let operator = if sign.as_str().starts_with("neg") || sign.as_str().starts_with("unfav") {
        Operator::Lt
    } else {
        Operator::Gt
    };
    let column = numeric(ctx, metric.as_str())?;

    let mut issues = Vec::new();
    note_ambiguity(&column, &mut issues);

    let phrase = format!("{} {}", metric.as_str(), sign.as_str());
    let mut intent = ParsedIntent::default();
    intent.push_condition(ParsedCondition::new(
        column.column,
        operator,
        ConditionValue::number(0.0),
        phrase,
    ));

    Some(Built {
        intent,
        claims: Claims {
            conditions: true,
            ..Default::default()
        },
        issues,
    })
}

// "show regions with actual sales above 60000"
fn dimension_above_threshold(caps: &Captures<'_>, ctx: &QueryContext<'_>) -> Option<Built> {
    let metric = numeric(ctx, caps.name("metric")?.as_str())?;
    let column = ctx.schema.column(&metric.column)?;
    let operator = match caps.name("op")?.as_str() {
        "above" | "over" | "exceeding" | "greater than" | "more than" => Operator::Gt,
        _ => Operator::Lt,
    };
    let value = caps.name("value")?;
    let (literal, _) = number_literal(ctx, token_index(ctx, value.start()), column)?;
    let value = ConditionValue::Single(literal);
    check_operator(column, operator, &value, ctx.schema).ok()?;

    let mut issues = Vec::new();
    note_ambiguity(&metric, &mut issues);

    let phrase = format!(
        "{} {} {}",
        caps.name("metric")?.as_str(),
        caps.name("op")?.as_str(),
        caps.name("value")?.as_str()
    );
    let mut intent = ParsedIntent::default();
    intent.push_condition(ParsedCondition::new(metric.column.clone(), operator, value, phrase));

    // "show regions with ..." lists the dimension next to the measure
    if let Some(dimension) = caps.name("dimension").and_then(|d| dimension(ctx, d.as_str())) {
        note_ambiguity(&dimension, &mut issues);
        intent.projection = vec![dimension.column, metric.column];
    }

    Some(Built {
        intent,
        claims: Claims {
            conditions: true,
            ..Default::default()
        },
        issues,
    })
}

// "how many regions have sales above 1000"
fn count_where(caps: &Captures<'_>, ctx: &QueryContext<'_>) -> Option<Built> {
    let mut issues = Vec::new();
    // counting a dimension counts its distinct values; anything else counts rows
    let aggregation = match dimension(ctx, &caps[1]) {
        Some(counted) => {
            note_ambiguity(&counted, &mut issues);
            Aggregation::count_distinct(counted.column)
        }
        None => Aggregation::count_rows(),
    };

    Some(Built {
        intent: ParsedIntent {
            aggregation: Some(aggregation),
            ..Default::default()
        },
        claims: Claims {
            aggregation: true,
            ..Default::default()
        },
        issues,
    })
}

// "average profit by region"
fn aggregate_by_dimension(caps: &Captures<'_>, ctx: &QueryContext<'_>) -> Option<Built> {
    let function = match caps.name("function")?.as_str() {
        "average" | "avg" | "mean" => AggregateFunction::Avg,
        "maximum" | "max" => AggregateFunction::Max,
        "minimum" | "min" => AggregateFunction::Min,
        _ => AggregateFunction::Sum,
    };
    let metric = numeric(ctx, caps.name("metric")?.as_str())?;
    let group = dimension(ctx, caps.name("dimension")?.as_str())?;

    let mut issues = Vec::new();
    note_ambiguity(&metric, &mut issues);
    note_ambiguity(&group, &mut issues);

    Some(Built {
        intent: ParsedIntent {
            aggregation: Some(Aggregation::new(function, metric.column)),
            group_by: vec![group.column],
            ..Default::default()
        },
        claims: Claims {
            aggregation: true,
            ..Default::default()
        },
        issues,
    })
}
