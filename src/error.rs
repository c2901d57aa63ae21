use thiserror::Error;

use crate::models::{ColumnType, Operator};

/// Failure modes of the translation engine.
///
/// Only `Assembly` and `InvalidSql` can make a translation unsuccessful; the
/// other variants are recovered inside the pipeline and surface as lowered
/// confidence.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslationError {
    #[error("No column matches the term '{0}'")]
    UnresolvedTerm(String),

    #[error("Operator {operator} cannot be applied to {column_type} column '{column}'")]
    TypeMismatch {
        column: String,
        column_type: ColumnType,
        operator: Operator,
    },

    #[error("Could not assemble SQL: {0}")]
    Assembly(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),
}

impl TranslationError {
    /// Short machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TranslationError::UnresolvedTerm(_) => "UNRESOLVED_TERM",
            TranslationError::TypeMismatch { .. } => "TYPE_MISMATCH",
            TranslationError::Assembly(_) => "ASSEMBLY_ERROR",
            TranslationError::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            TranslationError::InvalidSql(_) => "INVALID_SQL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let err = TranslationError::TypeMismatch {
            column: "region".to_string(),
            column_type: ColumnType::Categorical,
            operator: Operator::Gt,
        };
        assert_eq!(
            err.to_string(),
            "Operator > cannot be applied to categorical column 'region'"
        );
        assert_eq!(err.code(), "TYPE_MISMATCH");
    }
}
