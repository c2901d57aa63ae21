// Strategy interface shared by every translation variant
use crate::models::{SchemaContext, TranslationResult};

use super::StrategyKind;

/// A complete, swappable implementation of query translation.
/// The harness and the HTTP layer depend only on this trait.
#[async_trait::async_trait]
pub trait TranslationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Registry and report name
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Never fails: errors are encoded in the returned result
    async fn translate(&self, query: &str, schema: &SchemaContext) -> TranslationResult;

    /// Called before a batch of translations whose results are compared with each other.
    /// Strategies with cross-call state must not let one call of the batch affect another.
    fn begin_batch(&self) {}

    /// Ends the batch opened by `begin_batch`
    fn end_batch(&self) {}
}
