use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;

/// Number of distinct sample values kept per column
pub const MAX_SAMPLE_VALUES: usize = 5;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}(-\d{2})?([ T]\d{2}:\d{2}(:\d{2})?)?|\d{1,2}/\d{1,2}/\d{2,4})$")
        .expect("date pattern is valid")
});

/// Semantic type inferred for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
    Date,
    Categorical,
}

impl ColumnType {
    /// Map a declared SQL type name to a semantic type
    pub fn from_sql_type(sql_type: &str) -> Self {
        let lowered = sql_type.to_lowercase();
        let base = lowered.split('(').next().unwrap_or("").trim();
        match base {
            "int" | "integer" | "smallint" | "bigint" | "tinyint" | "int2" | "int4" | "int8"
            | "float" | "float4" | "float8" | "double" | "double precision" | "real"
            | "decimal" | "numeric" | "number" | "money" | "i32" | "i64" | "f32" | "f64" => {
                ColumnType::Numeric
            }
            "date" | "datetime" | "timestamp" | "timestamptz" | "time"
            | "timestamp with time zone" | "timestamp without time zone" => ColumnType::Date,
            "bool" | "boolean" | "enum" | "category" | "categorical" => ColumnType::Categorical,
            _ => ColumnType::Text,
        }
    }

    /// Infer a semantic type from observed values
    pub fn infer<S: AsRef<str>>(values: &[S]) -> Self {
        let observed: Vec<&str> = values
            .iter()
            .map(|v| v.as_ref().trim())
            .filter(|v| !v.is_empty())
            .collect();

        if observed.is_empty() {
            return ColumnType::Text;
        }

        if observed.iter().all(|v| parse_numeric_value(v).is_some()) {
            return ColumnType::Numeric;
        }

        if observed.iter().all(|v| DATE_PATTERN.is_match(v)) {
            return ColumnType::Date;
        }

        let distinct: HashSet<String> = observed.iter().map(|v| v.to_lowercase()).collect();
        let short_labels = observed
            .iter()
            .all(|v| v.len() <= 24 && v.split_whitespace().count() <= 3);

        if distinct.len() <= 20 && (distinct.len() * 2 <= observed.len() || short_labels) {
            ColumnType::Categorical
        } else {
            ColumnType::Text
        }
    }

    /// Whether ordering comparisons (`>`, `<`, `BETWEEN`) make sense
    pub fn is_orderable(&self) -> bool {
        matches!(self, ColumnType::Numeric | ColumnType::Date)
    }

    /// Whether the column reads as a grouping dimension
    pub fn is_dimension(&self) -> bool {
        matches!(self, ColumnType::Categorical | ColumnType::Text | ColumnType::Date)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Categorical => "categorical",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a number written the way spreadsheets export it: `$60,000`, `12.5%`, `-3`
pub fn parse_numeric_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%' | ' '))
        .collect();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "." {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A single column of the dataset being queried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub inferred_type: ColumnType,
    #[serde(default)]
    pub sample_values: Vec<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, inferred_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            inferred_type,
            sample_values: Vec::new(),
        }
    }

    pub fn with_samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_values = samples.into_iter().map(Into::into).collect();
        self
    }

    /// True when every numeric sample lies in [-1, 1], i.e. percentages are stored as fractions
    pub fn stores_fractions(&self) -> bool {
        let numbers: Vec<f64> = self
            .sample_values
            .iter()
            .filter_map(|v| parse_numeric_value(v))
            .collect();
        !numbers.is_empty() && numbers.iter().all(|n| n.abs() <= 1.0)
    }
}

/// Read-only description of the table a query targets.
///
/// Built once per dataset by the caller and rebuilt when the dataset changes;
/// the translator only ever borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaContext {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
}

impl SchemaContext {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Convenience builder used heavily in tests
    pub fn with_column(mut self, name: impl Into<String>, inferred_type: ColumnType) -> Self {
        self.columns.push(ColumnInfo::new(name, inferred_type));
        self
    }

    /// Build a schema from raw tabular data, inferring column types from the values
    pub fn from_records(
        table_name: impl Into<String>,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let values: Vec<&str> = rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(|v| v.as_str())
                    .collect();

                let mut seen = HashSet::new();
                let samples: Vec<String> = values
                    .iter()
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
                    .take(MAX_SAMPLE_VALUES)
                    .map(str::to_string)
                    .collect();

                ColumnInfo {
                    name: header.trim().to_string(),
                    inferred_type: ColumnType::infer(&values),
                    sample_values: samples,
                }
            })
            .collect();

        Self::new(table_name, columns)
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).map(|c| c.inferred_type)
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns
            .iter()
            .filter(|c| c.inferred_type == ColumnType::Numeric)
    }

    pub fn first_numeric_column(&self) -> Option<&ColumnInfo> {
        self.numeric_columns().next()
    }

    /// Stable identity of the table shape, used to key per-schema caches
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.table_name.to_lowercase().hash(&mut hasher);
        for column in &self.columns {
            column.name.to_lowercase().hash(&mut hasher);
            column.inferred_type.hash(&mut hasher);
        }
        format!("{}:{:x}", self.table_name, hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sql_type() {
        assert_eq!(ColumnType::from_sql_type("DECIMAL(10,2)"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_sql_type("bigint"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_sql_type("TIMESTAMP"), ColumnType::Date);
        assert_eq!(ColumnType::from_sql_type("varchar(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type("boolean"), ColumnType::Categorical);
    }

    #[test]
    fn test_infer_column_types() {
        assert_eq!(ColumnType::infer(&["$60,000", "1,200.50", "-3"]), ColumnType::Numeric);
        assert_eq!(ColumnType::infer(&["12%", "4.5%"]), ColumnType::Numeric);
        assert_eq!(ColumnType::infer(&["2024-01-31", "2024-02"]), ColumnType::Date);
        assert_eq!(
            ColumnType::infer(&["North", "South", "North", "East"]),
            ColumnType::Categorical
        );
        assert_eq!(ColumnType::infer::<&str>(&[]), ColumnType::Text);
    }

    #[test]
    fn test_from_records() {
        let headers = vec!["Region".to_string(), "Actual_Sales".to_string()];
        let rows = vec![
            vec!["North".to_string(), "100".to_string()],
            vec!["South".to_string(), "250.5".to_string()],
            vec!["North".to_string(), "75".to_string()],
        ];

        let schema = SchemaContext::from_records("sales", &headers, &rows);
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.column_type("region"), Some(ColumnType::Categorical));
        assert_eq!(schema.column_type("actual_sales"), Some(ColumnType::Numeric));
        assert_eq!(schema.column("region").unwrap().sample_values, vec!["North", "South"]);
    }

    #[test]
    fn test_fingerprint_tracks_shape() {
        let a = SchemaContext::new("t", vec![]).with_column("sales", ColumnType::Numeric);
        let b = SchemaContext::new("t", vec![]).with_column("sales", ColumnType::Numeric);
        let c = SchemaContext::new("t", vec![]).with_column("sales", ColumnType::Text);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_stores_fractions() {
        let margin = ColumnInfo::new("margin", ColumnType::Numeric).with_samples(["0.12", "0.3"]);
        let pct = ColumnInfo::new("pct", ColumnType::Numeric).with_samples(["12", "30"]);
        assert!(margin.stores_fractions());
        assert!(!pct.stores_fractions());
    }
}
