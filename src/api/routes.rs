use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::{evaluation, translate, AppState};
use crate::config::Config;
use crate::services::strategies::StrategyRegistry;
use crate::storage::SqliteStorage;

/// Create router with application state
pub fn create_router_with_state(
    storage: Arc<SqliteStorage>,
    config: Config,
    registry: Arc<StrategyRegistry>,
) -> Router {
    let state = AppState {
        storage,
        config,
        registry,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/strategies", get(translate::list_strategies))
        .route("/api/translate", post(translate::translate_query))
        .route(
            "/api/evaluations",
            get(evaluation::list_evaluations).post(evaluation::run_evaluation),
        )
        .route("/api/evaluations/{id}", get(evaluation::get_evaluation))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
