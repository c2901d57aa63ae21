use serde::{Deserialize, Serialize};

use super::intent::ParsedCondition;

/// A condition proposed by an external model, not yet checked against the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCondition {
    pub column: String,
    pub operator: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAggregation {
    pub function: String,
    #[serde(default)]
    pub column: Option<String>,
}

/// A term→column mapping remembered from earlier successful translations
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearnedTerm {
    pub term: String,
    pub column: String,
}

impl LearnedTerm {
    pub fn new(term: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            column: column.into(),
        }
    }
}

/// Pre-extracted intent fragments handed to the pipeline by a strategy.
///
/// Everything in here is untrusted: candidates are re-resolved against the
/// schema and pass the same type checks as pattern-extracted fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentHints {
    #[serde(default)]
    pub candidate_conditions: Vec<CandidateCondition>,
    #[serde(default)]
    pub candidate_aggregation: Option<CandidateAggregation>,
    #[serde(default)]
    pub candidate_grouping: Vec<String>,
    /// Extra vocabulary overlaid on the synonym map for this query only
    #[serde(skip)]
    pub learned_terms: Vec<LearnedTerm>,
    /// Conditions already resolved by the strategy itself
    #[serde(skip)]
    pub resolved_conditions: Vec<ParsedCondition>,
}

impl IntentHints {
    pub fn is_empty(&self) -> bool {
        self.candidate_conditions.is_empty()
            && self.candidate_aggregation.is_none()
            && self.candidate_grouping.is_empty()
            && self.learned_terms.is_empty()
            && self.resolved_conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_deserialize_with_missing_fields() {
        let hints: IntentHints = serde_json::from_str(
            r#"{"candidate_conditions": [{"column": "sales", "operator": ">", "value": 100}]}"#,
        )
        .unwrap();
        assert_eq!(hints.candidate_conditions.len(), 1);
        assert!(hints.candidate_aggregation.is_none());
        assert!(hints.candidate_grouping.is_empty());
        assert!(!hints.is_empty());
    }
}
