pub mod evaluation;
pub mod translate;

use std::sync::Arc;

use crate::config::Config;
use crate::services::strategies::StrategyRegistry;
use crate::storage::SqliteStorage;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub config: Config,
    pub registry: Arc<StrategyRegistry>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{
        DatabaseConfig, HarnessConfig, LlmConfig, LoggingConfig, ServerConfig, TranslatorConfig,
    };
    use crate::services::strategies::{PatternStrategy, SemanticStrategy};
    use crate::services::synonyms::SynonymDictionary;
    use crate::services::translator::TranslationPipeline;

    pub fn config(db_url: &str) -> Config {
        Config {
            database: DatabaseConfig {
                url: db_url.to_string(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            llm: LlmConfig {
                gateway_url: String::new(),
                api_key: None,
                timeout_ms: 100,
            },
            translator: TranslatorConfig::default(),
            harness: HarnessConfig { concurrency: 2 },
            logging: LoggingConfig {
                level: "info".to_string(),
                style: "auto".to_string(),
            },
        }
    }

    /// State with the pattern and semantic strategies over a temporary report store
    pub async fn state(dir: &tempfile::TempDir) -> AppState {
        let db_path = dir.path().join("reports.db");
        let storage = SqliteStorage::new(&db_path).await.unwrap();
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        let registry = StrategyRegistry::new(vec![
            Arc::new(PatternStrategy::new(Arc::clone(&pipeline))),
            Arc::new(SemanticStrategy::new(pipeline)),
        ]);

        AppState {
            storage: Arc::new(storage),
            config: config(&db_path.to_string_lossy()),
            registry: Arc::new(registry),
        }
    }
}
