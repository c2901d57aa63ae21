// Translation strategies: interchangeable implementations behind one trait
pub mod llm;
pub mod pattern;
pub mod semantic;
pub mod strategy;

pub use llm::{HttpIntentProvider, IntentProvider, LlmStrategy};
pub use pattern::PatternStrategy;
pub use semantic::{AdaptiveMappingCache, SemanticStrategy};
pub use strategy::TranslationStrategy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::translator::TranslationPipeline;

/// Strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    PatternOnly,
    LlmEnhanced,
    SemanticParsing,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::PatternOnly,
        StrategyKind::LlmEnhanced,
        StrategyKind::SemanticParsing,
    ];

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "pattern" | "pattern_only" | "patternonly" => Ok(StrategyKind::PatternOnly),
            "llm" | "llm_enhanced" | "llmenhanced" => Ok(StrategyKind::LlmEnhanced),
            "semantic" | "semantic_parsing" | "semanticparsing" => Ok(StrategyKind::SemanticParsing),
            _ => Err(AppError::Validation(format!("Unsupported strategy: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::PatternOnly => "pattern",
            StrategyKind::LlmEnhanced => "llm",
            StrategyKind::SemanticParsing => "semantic",
        }
    }
}

/// Every configured strategy, in registration order
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn TranslationStrategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Arc<dyn TranslationStrategy>>) -> Self {
        Self { strategies }
    }

    /// All three strategies sharing one pipeline (and so one synonym map cache)
    pub fn from_config(config: &Config) -> Result<Self> {
        let pipeline = Arc::new(TranslationPipeline::from_config(&config.translator)?);
        let provider: Arc<dyn IntentProvider> = Arc::new(HttpIntentProvider::new(&config.llm));

        if !config.llm.is_configured() {
            tracing::info!("LLM gateway not configured; the llm strategy will use pattern extraction");
        }

        Ok(Self::new(vec![
            Arc::new(PatternStrategy::new(Arc::clone(&pipeline))),
            Arc::new(LlmStrategy::new(
                Arc::clone(&pipeline),
                provider,
                Duration::from_millis(config.llm.timeout_ms),
            )),
            Arc::new(SemanticStrategy::new(pipeline)),
        ]))
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn TranslationStrategy>> {
        self.strategies.iter().find(|s| s.kind() == kind).cloned()
    }

    /// Look a strategy up by any accepted spelling of its name
    pub fn by_name(&self, name: &str) -> Result<Arc<dyn TranslationStrategy>, AppError> {
        let kind = StrategyKind::from_str(name)?;
        self.get(kind)
            .ok_or_else(|| AppError::NotFound(format!("Strategy '{}' is not registered", kind.as_str())))
    }

    /// Strategies for the given names, or all of them when `names` is empty
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn TranslationStrategy>>, AppError> {
        if names.is_empty() {
            return Ok(self.all());
        }
        let mut selected: Vec<Arc<dyn TranslationStrategy>> = Vec::new();
        for name in names {
            let strategy = self.by_name(name)?;
            if !selected.iter().any(|s| s.kind() == strategy.kind()) {
                selected.push(strategy);
            }
        }
        Ok(selected)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn TranslationStrategy>> {
        self.strategies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::services::synonyms::SynonymDictionary;

    fn registry() -> StrategyRegistry {
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        StrategyRegistry::new(vec![
            Arc::new(PatternStrategy::new(Arc::clone(&pipeline))),
            Arc::new(SemanticStrategy::new(pipeline)),
        ])
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(StrategyKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(StrategyKind::from_str("magic").is_err());
    }

    #[test]
    fn test_select() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["pattern", "semantic"]);

        let selected = registry
            .select(&["semantic".to_string(), "Pattern".to_string(), "semantic".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["semantic", "pattern"]);

        assert_eq!(registry.select(&[]).unwrap().len(), 2);
        assert!(matches!(registry.by_name("llm"), Err(AppError::NotFound(_))));
        assert!(matches!(registry.by_name("magic"), Err(AppError::Validation(_))));
    }
}
