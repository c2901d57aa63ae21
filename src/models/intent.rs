use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operators a condition may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "BETWEEN")]
    Between,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::Between => "BETWEEN",
        }
    }

    /// Parse the loose spellings an LLM or a user might produce
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "=" | "==" | "eq" | "equals" | "equal" | "equal_to" | "is" => Some(Operator::Eq),
            "!=" | "<>" | "ne" | "neq" | "not_equal" | "not_equals" | "not_equal_to" | "is_not" => {
                Some(Operator::NotEq)
            }
            ">" | "gt" | "greater_than" | "above" | "more_than" => Some(Operator::Gt),
            "<" | "lt" | "less_than" | "below" | "under" => Some(Operator::Lt),
            ">=" | "gte" | "ge" | "greater_than_or_equal" | "at_least" => Some(Operator::Gte),
            "<=" | "lte" | "le" | "less_than_or_equal" | "at_most" => Some(Operator::Lte),
            "like" | "contains" => Some(Operator::Like),
            "between" => Some(Operator::Between),
            _ => None,
        }
    }

    /// Operators that only make sense on ordered values
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte | Operator::Between
        )
    }

    /// Human wording used in explanations
    pub fn describe(&self) -> &'static str {
        match self {
            Operator::Eq => "equals",
            Operator::NotEq => "is not",
            Operator::Gt => "is greater than",
            Operator::Lt => "is less than",
            Operator::Gte => "is at least",
            Operator::Lte => "is at most",
            Operator::Like => "matches",
            Operator::Between => "is between",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A scalar appearing on the right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Number(f64),
    Text(String),
    /// Another column of the same table
    Column(String),
}

impl Literal {
    pub fn to_sql(&self) -> String {
        match self {
            Literal::Number(n) => format_number(*n),
            Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Column(c) => quote_identifier(c),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Literal::Number(_))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => f.write_str(&format_number(*n)),
            Literal::Text(s) => write!(f, "'{}'", s),
            Literal::Column(c) => f.write_str(c),
        }
    }
}

/// Render a float without a trailing `.0` when it is integral
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

const SQL_KEYWORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "count", "date", "day", "default",
    "desc", "distinct", "end", "from", "group", "having", "in", "interval", "is", "key",
    "level", "like", "limit", "month", "not", "null", "or", "order", "position", "rank",
    "select", "table", "time", "timestamp", "to", "type", "user", "value", "values", "when",
    "where", "year",
];

/// Quote an identifier when it is not a plain lowercase-safe name or clashes with a keyword
pub fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain && !SQL_KEYWORDS.contains(&name.to_lowercase().as_str()) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionValue {
    Single(Literal),
    Range(Literal, Literal),
}

impl ConditionValue {
    pub fn number(n: f64) -> Self {
        ConditionValue::Single(Literal::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        ConditionValue::Single(Literal::Text(s.into()))
    }

    pub fn to_sql(&self) -> String {
        match self {
            ConditionValue::Single(lit) => lit.to_sql(),
            ConditionValue::Range(low, high) => format!("{} AND {}", low.to_sql(), high.to_sql()),
        }
    }

    pub fn literals(&self) -> Vec<&Literal> {
        match self {
            ConditionValue::Single(lit) => vec![lit],
            ConditionValue::Range(low, high) => vec![low, high],
        }
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Single(lit) => write!(f, "{}", lit),
            ConditionValue::Range(low, high) => write!(f, "{} and {}", low, high),
        }
    }
}

/// How a condition joins onto the conditions before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// One filter predicate extracted from the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCondition {
    pub column: String,
    pub operator: Operator,
    pub value: ConditionValue,
    pub source_phrase: String,
    #[serde(default)]
    pub connector: Connector,
}

impl ParsedCondition {
    pub fn new(
        column: impl Into<String>,
        operator: Operator,
        value: ConditionValue,
        source_phrase: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            source_phrase: source_phrase.into(),
            connector: Connector::And,
        }
    }

    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = connector;
        self
    }

    /// Same column, operator and value; the phrase and connector do not matter
    pub fn same_predicate(&self, other: &ParsedCondition) -> bool {
        self.column.eq_ignore_ascii_case(&other.column)
            && self.operator == other.operator
            && self.value == other.value
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{} {} {}",
            quote_identifier(&self.column),
            self.operator.as_sql(),
            self.value.to_sql()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "sum" | "total" => Some(AggregateFunction::Sum),
            "avg" | "average" | "mean" => Some(AggregateFunction::Avg),
            "count" => Some(AggregateFunction::Count),
            "min" | "minimum" => Some(AggregateFunction::Min),
            "max" | "maximum" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    /// Whether the function needs a numeric argument
    pub fn requires_numeric(&self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Avg)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "total",
            AggregateFunction::Avg => "average",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "minimum",
            AggregateFunction::Max => "maximum",
        }
    }
}

/// Alias given to `COUNT(*)`
pub const COUNT_ALIAS: &str = "record_count";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// `None` is only meaningful for COUNT, which then counts rows
    pub target_column: Option<String>,
    /// Aggregate over distinct values only
    #[serde(default)]
    pub distinct: bool,
}

impl Aggregation {
    pub fn new(function: AggregateFunction, target_column: impl Into<String>) -> Self {
        Self {
            function,
            target_column: Some(target_column.into()),
            distinct: false,
        }
    }

    pub fn count_rows() -> Self {
        Self {
            function: AggregateFunction::Count,
            target_column: None,
            distinct: false,
        }
    }

    /// `COUNT(DISTINCT column)`
    pub fn count_distinct(column: impl Into<String>) -> Self {
        Self {
            function: AggregateFunction::Count,
            target_column: Some(column.into()),
            distinct: true,
        }
    }

    /// Output column name of the aggregate expression
    pub fn alias(&self) -> String {
        match (&self.function, &self.target_column) {
            (AggregateFunction::Count, None) => COUNT_ALIAS.to_string(),
            (AggregateFunction::Count, Some(col)) => format!("{}_count", col),
            (_, Some(col)) => col.clone(),
            (_, None) => COUNT_ALIAS.to_string(),
        }
    }

    pub fn to_sql(&self) -> String {
        let argument = match self.target_column.as_deref() {
            Some(column) if self.distinct => format!("DISTINCT {}", quote_identifier(column)),
            Some(column) => quote_identifier(column),
            None => "*".to_string(),
        };
        format!(
            "{}({}) AS {}",
            self.function.as_sql(),
            argument,
            quote_identifier(&self.alias())
        )
    }

    /// True when ordering by `column` means ordering by this aggregate
    pub fn covers(&self, column: &str) -> bool {
        self.alias().eq_ignore_ascii_case(column)
            || self
                .target_column
                .as_deref()
                .map(|t| t.eq_ignore_ascii_case(column))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Structured form of everything understood from one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub conditions: Vec<ParsedCondition>,
    pub aggregation: Option<Aggregation>,
    pub group_by: Vec<String>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    /// Columns to list for ungrouped queries; empty selects every column
    #[serde(default)]
    pub projection: Vec<String>,
}

impl ParsedIntent {
    /// Nothing at all was understood
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
            && self.aggregation.is_none()
            && self.group_by.is_empty()
            && self.order_by.is_none()
            && self.limit.is_none()
    }

    /// Append a condition unless an identical predicate is already present
    pub fn push_condition(&mut self, condition: ParsedCondition) -> bool {
        if self.conditions.iter().any(|c| c.same_predicate(&condition)) {
            return false;
        }
        self.conditions.push(condition);
        true
    }

    /// Every column the intent touches, in first-use order
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for condition in &self.conditions {
            columns.push(&condition.column);
            for literal in condition.value.literals() {
                if let Literal::Column(other) = literal {
                    columns.push(other);
                }
            }
        }
        if let Some(target) = self.aggregation.as_ref().and_then(|a| a.target_column.as_deref()) {
            columns.push(target);
        }
        columns.extend(self.group_by.iter().map(String::as_str));
        columns.extend(self.projection.iter().map(String::as_str));
        if let Some(order) = &self.order_by {
            columns.push(&order.column);
        }
        columns
    }
}

/// Why part of a query could not be used.
///
/// Collected alongside the intent so that confidence can be recomputed from
/// the extraction output alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionIssue {
    /// A business term had no column candidate above the similarity floor
    UnresolvedTerm { term: String },
    /// A detected condition was discarded
    DroppedCondition { phrase: String, reason: String },
    /// More than one column ranked equally for a term
    AmbiguousColumn { term: String, candidates: Vec<String> },
    /// The LLM hint step failed and pattern extraction was used instead
    LlmFallback { reason: String },
}

/// Output of one extraction stage: the value found plus any problems met on the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction<T> {
    pub value: T,
    pub issues: Vec<ResolutionIssue>,
}

impl<T> Extraction<T> {
    pub fn new(value: T, issues: Vec<ResolutionIssue>) -> Self {
        Self { value, issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(60000.0), "60000");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(1.25), "1.25");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("actual_sales"), "actual_sales");
        assert_eq!(quote_identifier("date"), "\"date\"");
        assert_eq!(quote_identifier("Net Profit"), "\"Net Profit\"");
        assert_eq!(quote_identifier("1st_quarter"), "\"1st_quarter\"");
    }

    #[test]
    fn test_condition_sql() {
        let cond = ParsedCondition::new("sales", Operator::Gt, ConditionValue::number(60000.0), "sales greater than 60000");
        assert_eq!(cond.to_sql(), "sales > 60000");

        let text = ParsedCondition::new("region", Operator::Eq, ConditionValue::text("O'Neil"), "");
        assert_eq!(text.to_sql(), "region = 'O''Neil'");

        let range = ParsedCondition::new(
            "sales",
            Operator::Between,
            ConditionValue::Range(Literal::Number(100.0), Literal::Number(500.0)),
            "",
        );
        assert_eq!(range.to_sql(), "sales BETWEEN 100 AND 500");
    }

    #[test]
    fn test_push_condition_deduplicates() {
        let mut intent = ParsedIntent::default();
        let a = ParsedCondition::new("sales", Operator::Gt, ConditionValue::number(5.0), "above 5");
        let b = ParsedCondition::new("SALES", Operator::Gt, ConditionValue::number(5.0), "more than 5");
        assert!(intent.push_condition(a));
        assert!(!intent.push_condition(b));
        assert_eq!(intent.conditions.len(), 1);
    }

    #[test]
    fn test_aggregation_alias() {
        assert_eq!(Aggregation::count_rows().to_sql(), "COUNT(*) AS record_count");
        assert_eq!(
            Aggregation::new(AggregateFunction::Sum, "actual_sales").to_sql(),
            "SUM(actual_sales) AS actual_sales"
        );
        assert!(Aggregation::new(AggregateFunction::Avg, "sales").covers("sales"));
        assert_eq!(
            Aggregation::count_distinct("region").to_sql(),
            "COUNT(DISTINCT region) AS region_count"
        );
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("greater than"), Some(Operator::Gt));
        assert_eq!(Operator::parse(">="), Some(Operator::Gte));
        assert_eq!(Operator::parse("not-equal"), Some(Operator::NotEq));
        assert_eq!(Operator::parse("roughly"), None);
    }
}
