use std::sync::Arc;

use crate::models::{SchemaContext, TranslationResult};
use crate::services::translator::TranslationPipeline;

use super::{StrategyKind, TranslationStrategy};

/// Rule-based extraction only; no I/O
pub struct PatternStrategy {
    pipeline: Arc<TranslationPipeline>,
}

impl PatternStrategy {
    pub fn new(pipeline: Arc<TranslationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl TranslationStrategy for PatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PatternOnly
    }

    async fn translate(&self, query: &str, schema: &SchemaContext) -> TranslationResult {
        self.pipeline.translate(query, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::models::ColumnType;
    use crate::services::synonyms::SynonymDictionary;

    #[tokio::test]
    async fn test_pattern_strategy_translates() {
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        let strategy = PatternStrategy::new(pipeline);
        let schema = SchemaContext::new("sales", vec![]).with_column("sales", ColumnType::Numeric);

        let result = strategy.translate("Show me sales greater than 60000", &schema).await;
        assert!(result.success);
        assert!(result.sql_query.contains("WHERE sales > 60000"));
        assert_eq!(strategy.name(), "pattern");
    }

    #[test]
    fn test_pattern_strategy_has_no_batch_state() {
        let pipeline = Arc::new(TranslationPipeline::new(
            &TranslatorConfig::default(),
            Arc::new(SynonymDictionary::financial()),
        ));
        let strategy = PatternStrategy::new(pipeline);
        let schema = SchemaContext::new("sales", vec![]).with_column("sales", ColumnType::Numeric);

        let before = tokio_test::block_on(strategy.translate("sales below 10", &schema));
        strategy.begin_batch();
        let during = tokio_test::block_on(strategy.translate("sales below 10", &schema));
        strategy.end_batch();
        assert_eq!(before, during);
        tokio_test::assert_ok!(crate::validation::SqlValidator::validate_select_only(&during.sql_query));
    }
}
