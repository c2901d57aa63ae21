use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use crate::models::{
    ColumnType, ConditionValue, IntentHints, LearnedTerm, Operator, ParsedCondition, SchemaContext,
    TranslationResult,
};
use crate::services::query_context::QueryContext;
use crate::services::synonyms::{is_query_vocabulary, is_stopword, normalize_term, SynonymResolver};
use crate::services::translator::TranslationPipeline;

use super::{StrategyKind, TranslationStrategy};

/// Learned mappings kept per schema
const MAX_LEARNED_PER_SCHEMA: usize = 64;
/// Schemas remembered at once; the oldest is forgotten first
const MAX_SCHEMAS: usize = 32;
/// Leftover words must be at least this close to a column name to be learned
const LEARNING_SIMILARITY: f64 = 0.88;

/// Words that carry query structure rather than column meaning
const STRUCTURE_WORDS: &[&str] = &[
    "above", "below", "between", "biggest", "containing", "descending", "ascending", "equal",
    "equals", "exceeding", "greater", "largest", "least", "less", "more", "most", "negative",
    "over", "positive", "rows", "records", "smallest", "sorted", "under", "worst", "best",
];

/// Term→column mappings remembered across calls, keyed by schema fingerprint.
///
/// Writers never wait: an update that finds the lock held is dropped. A
/// poisoned lock still holds consistent data (entries are only ever
/// appended whole), so it is recovered rather than propagated.
///
/// While a batch is open, new mappings are parked and merged in sorted
/// order when the last batch closes.
#[derive(Default)]
pub struct AdaptiveMappingCache {
    entries: RwLock<LearnedMaps>,
    batch: Mutex<PendingBatch>,
}

#[derive(Default)]
struct LearnedMaps {
    by_schema: HashMap<String, Vec<LearnedTerm>>,
    order: VecDeque<String>,
}

#[derive(Default)]
struct PendingBatch {
    open: usize,
    parked: Vec<(String, LearnedTerm)>,
}

impl LearnedMaps {
    fn insert(&mut self, fingerprint: &str, terms: &[LearnedTerm]) {
        if !self.by_schema.contains_key(fingerprint) {
            while self.order.len() >= MAX_SCHEMAS {
                if let Some(oldest) = self.order.pop_front() {
                    tracing::debug!("Forgetting learned terms for schema {}", oldest);
                    self.by_schema.remove(&oldest);
                }
            }
            self.order.push_back(fingerprint.to_string());
        }

        let known = self.by_schema.entry(fingerprint.to_string()).or_default();
        for term in terms {
            if known.len() >= MAX_LEARNED_PER_SCHEMA {
                break;
            }
            if !known.iter().any(|k| k.term == term.term) {
                tracing::debug!("Learned '{}' -> {}", term.term, term.column);
                known.push(term.clone());
            }
        }
    }
}

impl AdaptiveMappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learned(&self, fingerprint: &str) -> Vec<LearnedTerm> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.by_schema.get(fingerprint).cloned().unwrap_or_default()
    }

    /// Record new mappings; returns false when the update was skipped under contention
    pub fn remember(&self, fingerprint: &str, terms: &[LearnedTerm]) -> bool {
        {
            let mut batch = self.batch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if batch.open > 0 {
                batch
                    .parked
                    .extend(terms.iter().map(|t| (fingerprint.to_string(), t.clone())));
                return true;
            }
        }

        let mut entries = match self.entries.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Adaptive mapping update skipped: cache busy");
                return false;
            }
        };
        entries.insert(fingerprint, terms);
        true
    }

    pub fn begin_batch(&self) {
        let mut batch = self.batch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        batch.open += 1;
    }

    /// Close a batch; the last one to close merges everything parked
    pub fn end_batch(&self) {
        let mut parked = {
            let mut batch = self.batch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            batch.open = batch.open.saturating_sub(1);
            if batch.open > 0 {
                return;
            }
            std::mem::take(&mut batch.parked)
        };
        if parked.is_empty() {
            return;
        }

        parked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.term.cmp(&b.1.term))
                .then_with(|| a.1.column.cmp(&b.1.column))
        });
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (fingerprint, term) in &parked {
            entries.insert(fingerprint, std::slice::from_ref(term));
        }
    }

    pub fn len(&self, fingerprint: &str) -> usize {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.by_schema.get(fingerprint).map(Vec::len).unwrap_or(0)
    }

    /// Number of schemas with learned terms
    pub fn schema_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.by_schema.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.by_schema.clear();
        entries.order.clear();
    }
}

/// Pattern extraction plus sample-value matching and adaptive vocabulary
pub struct SemanticStrategy {
    pipeline: Arc<TranslationPipeline>,
    cache: AdaptiveMappingCache,
}

impl SemanticStrategy {
    pub fn new(pipeline: Arc<TranslationPipeline>) -> Self {
        Self {
            pipeline,
            cache: AdaptiveMappingCache::new(),
        }
    }

    pub fn cache(&self) -> &AdaptiveMappingCache {
        &self.cache
    }

    /// Equality conditions for categorical sample values named in the query ("in the North East").
    /// Longer values win over values they contain ("North East" over "North").
    fn sample_value_conditions(&self, ctx: &QueryContext<'_>) -> Vec<ParsedCondition> {
        let mut found: Vec<(usize, usize, &str, &str)> = Vec::new();
        for column in &ctx.schema.columns {
            if !matches!(column.inferred_type, ColumnType::Categorical | ColumnType::Text) {
                continue;
            }
            for sample in &column.sample_values {
                let normalized = normalize_term(sample);
                let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
                if words.is_empty() || (words.len() == 1 && (is_stopword(words[0]) || words[0].len() < 3)) {
                    continue;
                }
                let start = (0..ctx.len()).find(|i| {
                    ctx.phrase_at(*i, &words) && (*i..*i + words.len()).all(|j| ctx.mention_covering(j).is_none())
                });
                if let Some(start) = start {
                    found.push((start, words.len(), column.name.as_str(), sample.as_str()));
                }
            }
        }

        found.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut taken: Vec<(usize, usize)> = Vec::new();
        let mut conditions = Vec::new();
        for (start, len, column, sample) in found {
            let end = start + len;
            if taken.iter().any(|(s, e)| start < *e && *s < end) {
                continue;
            }
            taken.push((start, end));
            conditions.push(ParsedCondition::new(
                column,
                Operator::Eq,
                ConditionValue::text(sample),
                ctx.span(start, end),
            ));
        }
        conditions
    }

    /// Leftover words close enough to a column name to be worth remembering
    fn fuzzy_terms(&self, ctx: &QueryContext<'_>) -> Vec<LearnedTerm> {
        let floor = ctx.resolver.similarity_floor().max(LEARNING_SIMILARITY);
        let mut terms: Vec<LearnedTerm> = Vec::new();

        for idx in 0..ctx.len() {
            let word = ctx.word(idx);
            if word.len() < 4
                || ctx.mention_covering(idx).is_some()
                || is_stopword(word)
                || is_query_vocabulary(word)
                || STRUCTURE_WORDS.contains(&word)
                || word.chars().any(|c| c.is_ascii_digit())
            {
                continue;
            }

            let best = ctx
                .schema
                .columns
                .iter()
                .map(|column| (column, SynonymResolver::similarity(word, &column.name)))
                .filter(|(_, score)| *score >= floor)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((column, _)) = best {
                if !terms.iter().any(|t| t.term == word) {
                    terms.push(LearnedTerm::new(word, column.name.clone()));
                }
            }
        }
        terms
    }
}

#[async_trait::async_trait]
impl TranslationStrategy for SemanticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SemanticParsing
    }

    async fn translate(&self, query: &str, schema: &SchemaContext) -> TranslationResult {
        let fingerprint = schema.fingerprint();
        let learned = self.cache.learned(&fingerprint);

        let (resolved_conditions, fresh) = {
            let ctx = QueryContext::new(query, schema, self.pipeline.resolver(), &learned);
            (self.sample_value_conditions(&ctx), self.fuzzy_terms(&ctx))
        };

        let mut learned_terms = learned;
        learned_terms.extend(fresh.iter().cloned());
        let hints = IntentHints {
            learned_terms,
            resolved_conditions,
            ..Default::default()
        };

        let result = self.pipeline.run(query, schema, &hints, Vec::new());
        if result.success && !fresh.is_empty() {
            self.cache.remember(&fingerprint, &fresh);
        }
        result
    }

    fn begin_batch(&self) {
        self.cache.begin_batch();
    }

    fn end_batch(&self) {
        self.cache.end_batch();
    }
}
