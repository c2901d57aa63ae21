use serde::{Deserialize, Serialize};

use super::schema::SchemaContext;

/// What a caller gets back from a translation.
///
/// Failures are encoded here rather than raised: `success == false` comes
/// with an `error_message` and an empty `sql_query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub success: bool,
    pub sql_query: String,
    pub explanation: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_special_case: Option<String>,
}

impl TranslationResult {
    pub fn succeeded(
        sql_query: String,
        explanation: String,
        confidence: f64,
        matched_special_case: Option<String>,
    ) -> Self {
        Self {
            success: true,
            sql_query,
            explanation,
            confidence: confidence.clamp(0.0, 1.0),
            error_message: None,
            matched_special_case,
        }
    }

    pub fn failed(error_message: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            success: false,
            sql_query: String::new(),
            explanation: explanation.into(),
            confidence: 0.0,
            error_message: Some(error_message.into()),
            matched_special_case: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub query: String,
    pub schema: SchemaContext,
    /// Strategy name (`pattern`, `llm`, `semantic`); defaults to `pattern`
    #[serde(default)]
    pub strategy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_shape() {
        let result = TranslationResult::failed("no columns", "nothing to query");
        assert!(!result.success);
        assert!(result.sql_query.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("no columns"));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let result = TranslationResult::succeeded("SELECT 1".into(), String::new(), 1.7, None);
        assert_eq!(result.confidence, 1.0);
    }
}
