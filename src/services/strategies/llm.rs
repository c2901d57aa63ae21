use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::TranslationError;
use crate::models::{IntentHints, ResolutionIssue, SchemaContext, TranslationResult};
use crate::services::translator::TranslationPipeline;

use super::{StrategyKind, TranslationStrategy};

/// The external model capability: prompt in, structured intent hints out
#[async_trait::async_trait]
pub trait IntentProvider: Send + Sync {
    async fn infer_intent(&self, prompt: &str) -> Result<IntentHints, TranslationError>;
}

/// Intent provider backed by an HTTP LLM gateway
pub struct HttpIntentProvider {
    gateway_url: String,
    api_key: Option<String>,
    configured: bool,
    http_client: HttpClient,
}

impl HttpIntentProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            configured: config.is_configured(),
            http_client: HttpClient::new(),
        }
    }
}

#[async_trait::async_trait]
impl IntentProvider for HttpIntentProvider {
    async fn infer_intent(&self, prompt: &str) -> Result<IntentHints, TranslationError> {
        if !self.configured {
            return Err(TranslationError::LlmUnavailable(
                "no LLM gateway configured".to_string(),
            ));
        }

        let mut request = self.http_client.post(&self.gateway_url).json(&json!({
            "prompt": prompt,
            "max_tokens": 500,
            "temperature": 0.0,
        }));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslationError::LlmUnavailable(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TranslationError::LlmUnavailable(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TranslationError::LlmUnavailable(format!("Failed to parse LLM response: {}", e)))?;

        parse_hints(&body)
    }
}

/// Schema-aware prompt asking for intent fragments rather than SQL
pub fn build_prompt(query: &str, schema: &SchemaContext) -> String {
    let mut context = format!("Table: {}\nColumns:\n", schema.table_name);
    for column in &schema.columns {
        context.push_str(&format!("  * {} ({})", column.name, column.inferred_type.as_str()));
        if !column.sample_values.is_empty() {
            context.push_str(&format!(" e.g. {}", column.sample_values.join(", ")));
        }
        context.push('\n');
    }

    format!(
        r#"You extract query intent for a financial analytics table.

{context}
Question: {query}

Instructions:
1. Reply with ONLY a JSON object, no explanations or markdown
2. Use this shape:
   {{"candidate_conditions": [{{"column": "...", "operator": ">", "value": 0}}],
    "candidate_aggregation": {{"function": "SUM", "column": "..."}} or null,
    "candidate_grouping": ["..."]}}
3. Operators: =, !=, >, <, >=, <=, LIKE, BETWEEN (value is a two-element array)
4. Only use column names listed above

JSON:"#,
        context = context,
        query = query
    )
}

/// Read hints from a gateway reply: either the object itself or a string
/// field (`text`, `content`, `response`) holding it, possibly fenced.
pub fn parse_hints(body: &Value) -> Result<IntentHints, TranslationError> {
    let malformed = |e: serde_json::Error| TranslationError::LlmUnavailable(format!("Malformed intent JSON: {}", e));

    if body.get("candidate_conditions").is_some()
        || body.get("candidate_aggregation").is_some()
        || body.get("candidate_grouping").is_some()
    {
        return serde_json::from_value(body.clone()).map_err(malformed);
    }

    let text = body["text"]
        .as_str()
        .or_else(|| body["content"].as_str())
        .or_else(|| body["response"].as_str())
        .ok_or_else(|| TranslationError::LlmUnavailable("LLM response does not contain intent".to_string()))?;

    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(malformed)
}

/// Pattern extraction seeded with LLM hints; degrades to pattern-only on any LLM failure
pub struct LlmStrategy {
    pipeline: Arc<TranslationPipeline>,
    provider: Arc<dyn IntentProvider>,
    timeout: Duration,
}

impl LlmStrategy {
    pub fn new(pipeline: Arc<TranslationPipeline>, provider: Arc<dyn IntentProvider>, timeout: Duration) -> Self {
        Self {
            pipeline,
            provider,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl TranslationStrategy for LlmStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LlmEnhanced
    }

    async fn translate(&self, query: &str, schema: &SchemaContext) -> TranslationResult {
        let prompt = build_prompt(query, schema);

        let outcome = match tokio::time::timeout(self.timeout, self.provider.infer_intent(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(TranslationError::LlmUnavailable(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        let (hints, issues) = match outcome {
            Ok(hints) => {
                tracing::debug!(
                    "LLM proposed {} conditions, aggregation {:?}",
                    hints.candidate_conditions.len(),
                    hints.candidate_aggregation
                );
                (hints, Vec::new())
            }
            Err(err) => {
                tracing::warn!("LLM hints unavailable, using pattern extraction: {}", err);
                (
                    IntentHints::default(),
                    vec![ResolutionIssue::LlmFallback {
                        reason: err.to_string(),
                    }],
                )
            }
        };

        self.pipeline.run(query, schema, &hints, issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::models::{CandidateCondition, ColumnType};
    use crate::services::synonyms::SynonymDictionary;

    struct FixedProvider(IntentHints);

    #[async_trait::async_trait]
    impl IntentProvider for FixedProvider {
        async fn infer_intent(&self, _prompt: &str) -> Result<IntentHints, TranslationError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl IntentProvider for FailingProvider {
        async fn infer_intent(&self, _prompt: &str) -> Result<IntentHints, TranslationError> {
            Err(TranslationError::LlmUnavailable("connection refused".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl IntentProvider for SlowProvider {
        async fn infer_intent(&self, _prompt: &str) -> Result<IntentHints, TranslationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(IntentHints::default())
        }
    }

    fn pipeline() -> Arc<TranslationPipeline> {
        Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ))
    }

    fn schema() -> SchemaContext {
        SchemaContext::new("sales", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("sales", ColumnType::Numeric)
            .with_column("profit", ColumnType::Numeric)
    }

    fn strategy(provider: Arc<dyn IntentProvider>) -> LlmStrategy {
        LlmStrategy::new(pipeline(), provider, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_hints_are_merged() {
        let hints = IntentHints {
            candidate_conditions: vec![CandidateCondition {
                column: "profit".to_string(),
                operator: ">".to_string(),
                value: json!(0),
            }],
            ..Default::default()
        };
        let result = strategy(Arc::new(FixedProvider(hints)))
            .translate("Show me sales greater than 60000 that made money", &schema())
            .await;
        assert!(result.success);
        assert!(result.sql_query.contains("sales > 60000"));
        assert!(result.sql_query.contains("profit > 0"));
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_failure_falls_back_with_lower_confidence() {
        let query = "Show me sales greater than 60000";
        let fallback = strategy(Arc::new(FailingProvider)).translate(query, &schema()).await;
        let pattern = pipeline().translate(query, &schema());

        assert!(fallback.success);
        assert_eq!(fallback.sql_query, pattern.sql_query);
        assert!(fallback.confidence < pattern.confidence);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let result = strategy(Arc::new(SlowProvider))
            .translate("Show me sales greater than 60000", &schema())
            .await;
        assert!(result.success);
        assert!(result.sql_query.contains("WHERE sales > 60000"));
        assert!(result.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_unavailable() {
        let config = LlmConfig {
            gateway_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_ms: 100,
        };
        let provider = HttpIntentProvider::new(&config);
        assert!(matches!(
            provider.infer_intent("prompt").await,
            Err(TranslationError::LlmUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_hints_from_fenced_text() {
        let body = json!({
            "text": "```json\n{\"candidate_conditions\": [{\"column\": \"sales\", \"operator\": \">\", \"value\": 5}], \"candidate_grouping\": [\"region\"]}\n```"
        });
        let hints = parse_hints(&body).unwrap();
        assert_eq!(hints.candidate_conditions.len(), 1);
        assert_eq!(hints.candidate_grouping, vec!["region".to_string()]);

        let direct = json!({"candidate_aggregation": {"function": "SUM", "column": "sales"}});
        assert!(parse_hints(&direct).unwrap().candidate_aggregation.is_some());

        assert!(parse_hints(&json!({"text": "not json"})).is_err());
        assert!(parse_hints(&json!({"other": 1})).is_err());
    }

    #[test]
    fn test_prompt_lists_columns() {
        let prompt = build_prompt("top regions", &schema());
        assert!(prompt.contains("* region (categorical)"));
        assert!(prompt.contains("Question: top regions"));
    }
}
