use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{EvaluationRequest, HarnessReport};
use crate::services::harness::{default_query_set, sample_schema, EvaluationHarness};

/// Run the harness and persist the report.
/// Missing schema / queries fall back to the built-in financial sample set.
pub async fn run_evaluation(
    State(state): State<AppState>,
    Json(payload): Json<EvaluationRequest>,
) -> Result<(StatusCode, Json<HarnessReport>), AppError> {
    let queries = payload.queries.unwrap_or_else(default_query_set);
    if queries.is_empty() {
        return Err(AppError::Validation("Query set cannot be empty".to_string()));
    }
    let schema = payload.schema.unwrap_or_else(sample_schema);

    let strategies = state
        .registry
        .select(payload.strategies.as_deref().unwrap_or(&[]))?;
    let concurrency = payload
        .concurrency
        .unwrap_or(state.config.harness.concurrency);

    let harness = EvaluationHarness::new(strategies, concurrency);
    let report = harness.run(&queries, &schema).await;

    state.storage.save_report(&report).await?;
    tracing::info!(
        "Stored evaluation report {} (recommended: {:?})",
        report.id,
        report.recommended_strategy
    );

    Ok((StatusCode::CREATED, Json(report)))
}

/// List stored reports
pub async fn list_evaluations(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reports = state.storage.list_reports().await?;

    Ok(Json(serde_json::json!({
        "reports": reports
    })))
}

/// Get a stored report by ID
pub async fn get_evaluation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HarnessReport>, AppError> {
    let report = state
        .storage
        .get_report(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support;
    use crate::models::{EvaluationRequest, LabeledQuery};

    #[tokio::test]
    async fn test_run_then_fetch_report() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let request = EvaluationRequest {
            queries: Some(vec![LabeledQuery::unlabeled("Top 5 regions by actual sales")]),
            strategies: Some(vec!["pattern".to_string()]),
            ..Default::default()
        };
        let (status, Json(report)) = run_evaluation(State(state.clone()), Json(request)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report.strategies, vec!["pattern".to_string()]);
        assert_eq!(report.comparisons.len(), 1);

        let Json(stored) = get_evaluation(State(state.clone()), Path(report.id.clone())).await.unwrap();
        assert_eq!(stored.id, report.id);

        let Json(listing) = list_evaluations(State(state)).await.unwrap();
        assert_eq!(listing["reports"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_defaults_use_sample_set() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let (_, Json(report)) = run_evaluation(State(state), Json(EvaluationRequest::default()))
            .await
            .unwrap();
        assert_eq!(report.table_name, "financial_data");
        assert_eq!(report.comparisons.len(), default_query_set().len());
        assert!(report.recommended_strategy.is_some());
    }

    #[tokio::test]
    async fn test_empty_query_set_and_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(&dir).await;

        let request = EvaluationRequest {
            queries: Some(Vec::new()),
            ..Default::default()
        };
        assert!(matches!(
            run_evaluation(State(state.clone()), Json(request)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            get_evaluation(State(state), Path("missing".to_string())).await,
            Err(AppError::NotFound(_))
        ));
    }
}
