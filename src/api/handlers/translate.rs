use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{TranslateRequest, TranslationResult};
use crate::services::strategies::StrategyKind;

/// List registered strategies
pub async fn list_strategies(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "strategies": state.registry.names(),
        "default": StrategyKind::PatternOnly.as_str(),
    }))
}

/// Translate a natural-language question into SQL for the supplied schema
pub async fn translate_query(
    State(state): State<AppState>,
    Json(payload): Json<TranslateRequest>,
) -> Result<Json<TranslationResult>, AppError> {
    if payload.schema.table_name.trim().is_empty() {
        return Err(AppError::Validation("Schema table name cannot be empty".to_string()));
    }

    let strategy_name = payload
        .strategy
        .as_deref()
        .unwrap_or(StrategyKind::PatternOnly.as_str());
    let strategy = state.registry.by_name(strategy_name)?;

    tracing::info!(
        "Translating with {} strategy over table {}",
        strategy.name(),
        payload.schema.table_name
    );

    let result = strategy.translate(&payload.query, &payload.schema).await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support;
    use crate::models::{ColumnType, SchemaContext};

    fn request(query: &str, strategy: Option<&str>) -> TranslateRequest {
        TranslateRequest {
            query: query.to_string(),
            schema: SchemaContext::new("sales", vec![]).with_column("sales", ColumnType::Numeric),
            strategy: strategy.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_translate_defaults_to_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let Json(result) = translate_query(State(state), Json(request("Show me sales greater than 60000", None)))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.sql_query.contains("WHERE sales > 60000"));
    }

    #[tokio::test]
    async fn test_translate_rejects_unknown_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let err = translate_query(State(state.clone()), Json(request("sales", Some("magic"))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // registered kinds only
        let err = translate_query(State(state), Json(request("sales", Some("llm"))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let Json(body) = list_strategies(State(state)).await;
        assert_eq!(body["strategies"], serde_json::json!(["pattern", "semantic"]));
        assert_eq!(body["default"], "pattern");
    }
}
