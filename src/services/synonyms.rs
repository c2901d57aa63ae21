// Synonym Resolver
//
// Maps business vocabulary ("actual sales", "satisfaction") onto the columns
// of a concrete schema. Static dictionary entries always outrank fuzzy
// matches; ties are broken by how well the column type fits the phrase.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::models::{ColumnType, LearnedTerm, SchemaContext};

/// Score given to an exact column-name match
const EXACT_SCORE: f64 = 1.0;
/// Score of the first static dictionary candidate; later ones step down by 0.01
const STATIC_SCORE: f64 = 0.95;
/// Synonym maps cached at once; the oldest schema is evicted first
const MAX_CACHED_SCHEMAS: usize = 32;
/// Score of a remembered mapping overlaid for one query
const LEARNED_SCORE: f64 = 0.9;
/// Score of a single word taken from a multi-word column name
const PARTIAL_SCORE: f64 = 0.7;
/// Bonus applied when the column type suits the phrase
const TYPE_BONUS: f64 = 0.05;

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "each", "find",
    "for", "from", "get", "give", "has", "have", "how", "in", "is", "list", "me", "of", "on",
    "or", "per", "show", "than", "that", "the", "their", "them", "there", "these", "this",
    "those", "to", "was", "we", "were", "what", "where", "which", "who", "with",
];

/// Aggregate and ranking vocabulary; never a partial column match ("total" in total_cost)
const QUERY_VOCABULARY: &[&str] = &[
    "average", "bottom", "count", "highest", "lowest", "maximum", "mean", "minimum", "number",
    "total", "top",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

pub fn is_query_vocabulary(word: &str) -> bool {
    QUERY_VOCABULARY.contains(&word)
}

/// Where a column candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// The phrase spells the column name
    Exact,
    /// Listed in the synonym dictionary
    Static,
    /// Remembered from an earlier translation
    Learned,
    /// One word of a multi-word column name
    Partial,
    /// String similarity above the floor
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCandidate {
    pub column: String,
    pub column_type: ColumnType,
    pub score: f64,
    pub source: MatchSource,
}

/// Type the surrounding phrase implies for the column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    Any,
    /// Comparisons, aggregates, ranking metrics
    Numeric,
    /// Grouping targets: categorical and text first
    Dimension,
}

impl TypeHint {
    fn bonus(&self, column_type: ColumnType) -> f64 {
        let fits = match self {
            TypeHint::Any => false,
            TypeHint::Numeric => column_type == ColumnType::Numeric,
            TypeHint::Dimension => {
                matches!(column_type, ColumnType::Categorical | ColumnType::Text)
            }
        };
        if fits {
            TYPE_BONUS
        } else {
            0.0
        }
    }
}

/// The column chosen for a term
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub term: String,
    pub column: String,
    pub column_type: ColumnType,
    pub source: MatchSource,
    /// Other columns that ranked exactly as high
    pub tied_with: Vec<String>,
}

impl Resolution {
    pub fn is_ambiguous(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

/// Lowercase, strip punctuation to spaces, collapse whitespace
pub fn normalize_term(term: &str) -> String {
    term.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a column name into the words a user would type: `ActualSales` / `actual_sales` -> "actual sales"
pub fn column_words(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        spaced.push(ch);
    }
    normalize_term(&spaced)
}

/// Naive English singular used for phrase lookup ("regions" -> "region")
pub fn singularize(phrase: &str) -> Option<String> {
    let (head, last) = match phrase.rsplit_once(' ') {
        Some((head, last)) => (Some(head), last),
        None => (None, phrase),
    };
    let singular = if last.len() > 4 && last.ends_with("ies") {
        format!("{}y", &last[..last.len() - 3])
    } else if last.len() > 3 && (last.ends_with("ses") || last.ends_with("xes")) {
        last[..last.len() - 2].to_string()
    } else if last.len() > 3 && last.ends_with('s') && !last.ends_with("ss") {
        last[..last.len() - 1].to_string()
    } else {
        return None;
    };
    Some(match head {
        Some(head) => format!("{} {}", head, singular),
        None => singular,
    })
}

/// Static business vocabulary, constructed once at startup and shared read-only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynonymDictionary {
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymDictionary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in financial/analytical vocabulary
    pub fn financial() -> Self {
        let defaults: &[(&str, &[&str])] = &[
            ("actual sales", &["actual_sales", "actual_revenue"]),
            ("actuals", &["actual_sales", "actual_amount", "actual"]),
            ("sales", &["sales", "actual_sales", "total_sales", "revenue", "sales_amount"]),
            ("revenue", &["revenue", "sales", "actual_sales", "total_revenue"]),
            ("budget", &["budget", "budget_sales", "budgeted_sales", "planned_sales", "budget_amount"]),
            ("budget sales", &["budget_sales", "budgeted_sales", "planned_sales"]),
            ("budgeted sales", &["budgeted_sales", "budget_sales"]),
            ("planned sales", &["planned_sales", "budget_sales"]),
            ("target", &["target", "sales_target", "budget"]),
            ("forecast", &["forecast", "forecast_sales"]),
            ("variance", &["variance", "sales_variance", "total_variance", "budget_variance"]),
            ("sales variance", &["sales_variance", "variance"]),
            ("budget variance", &["budget_variance", "variance"]),
            ("price variance", &["price_variance"]),
            ("volume variance", &["volume_variance"]),
            ("cost variance", &["cost_variance"]),
            ("satisfaction", &["customer_satisfaction", "satisfaction_score", "satisfaction", "csat"]),
            ("customer satisfaction", &["customer_satisfaction", "satisfaction_score", "csat"]),
            ("csat", &["csat", "customer_satisfaction"]),
            ("profit", &["profit", "net_profit", "gross_profit", "operating_profit"]),
            ("net profit", &["net_profit", "profit"]),
            ("gross profit", &["gross_profit", "profit"]),
            ("margin", &["profit_margin", "margin", "gross_margin"]),
            ("profit margin", &["profit_margin", "margin"]),
            ("cost", &["cost", "costs", "total_cost", "expenses"]),
            ("expenses", &["expenses", "expense", "cost", "costs"]),
            ("spend", &["spend", "expenses", "cost"]),
            ("quantity", &["quantity", "units_sold", "units", "volume"]),
            ("units", &["units_sold", "units", "quantity"]),
            ("volume", &["volume", "quantity", "units_sold"]),
            ("price", &["price", "unit_price", "selling_price"]),
            ("unit price", &["unit_price", "price"]),
            ("discount", &["discount", "discount_rate", "discount_amount"]),
            ("amount", &["amount", "transaction_amount", "total_amount"]),
            ("region", &["region", "sales_region", "territory", "area"]),
            ("territory", &["territory", "region"]),
            ("area", &["area", "region"]),
            ("country", &["country", "market"]),
            ("market", &["market", "country", "region"]),
            ("product", &["product", "product_name", "product_line", "sku"]),
            ("product line", &["product_line", "product_category", "category"]),
            ("category", &["category", "product_category", "segment"]),
            ("segment", &["segment", "customer_segment", "category"]),
            ("customer", &["customer", "customer_name", "client", "account"]),
            ("client", &["client", "customer", "customer_name"]),
            ("account", &["account", "account_name", "customer"]),
            ("salesperson", &["salesperson", "sales_rep", "rep", "employee"]),
            ("rep", &["sales_rep", "rep", "salesperson"]),
            ("channel", &["channel", "sales_channel"]),
            ("date", &["date", "transaction_date", "order_date", "period"]),
            ("month", &["month", "period", "date"]),
            ("quarter", &["quarter", "fiscal_quarter", "period"]),
            ("year", &["year", "fiscal_year"]),
            ("period", &["period", "month", "date"]),
        ];

        let entries = defaults
            .iter()
            .map(|(term, columns)| {
                (
                    term.to_string(),
                    columns.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect();

        Self { entries }
    }

    /// Add or replace a term; later calls win
    pub fn with_entry<I, S>(mut self, term: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.insert(
            normalize_term(term),
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Merge `{term: [columns]}` entries from a JSON file over this dictionary
    pub fn extend_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read synonyms file {}", path.display()))?;
        let extra: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw)
            .with_context(|| format!("Synonyms file {} is not a {{term: [columns]}} map", path.display()))?;
        let count = extra.len();
        for (term, columns) in extra {
            self.entries.insert(normalize_term(&term), columns);
        }
        tracing::info!("Loaded {} synonym entries from {}", count, path.display());
        Ok(self)
    }

    pub fn lookup(&self, term: &str) -> Option<&[String]> {
        self.entries.get(term).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }
}

/// Dictionary terms narrowed to one schema, plus terms derived from its column names
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    phrases: BTreeMap<String, Vec<ColumnCandidate>>,
    max_words: usize,
}

impl SynonymMap {
    pub fn build(dictionary: &SynonymDictionary, schema: &SchemaContext) -> Self {
        let mut map = Self::default();

        for column in &schema.columns {
            let words = column_words(&column.name);
            if words.is_empty() {
                continue;
            }
            map.insert(&words, column.name.clone(), column.inferred_type, EXACT_SCORE, MatchSource::Exact);
            let lowered = column.name.to_lowercase();
            if lowered != words {
                map.insert(&lowered, column.name.clone(), column.inferred_type, EXACT_SCORE, MatchSource::Exact);
            }
        }

        for (term, columns) in dictionary.iter() {
            let present = columns.iter().filter_map(|c| schema.column(c));
            for (rank, column) in present.enumerate() {
                let score = STATIC_SCORE - 0.01 * rank as f64;
                map.insert(term, column.name.clone(), column.inferred_type, score, MatchSource::Static);
            }
        }

        // Head and tail words of multi-word names ("units" for units_sold) as weak candidates
        for column in &schema.columns {
            let words = column_words(&column.name);
            let parts: Vec<&str> = words.split(' ').collect();
            if parts.len() < 2 {
                continue;
            }
            for part in [parts[0], parts[parts.len() - 1]] {
                if part.len() >= 4 && !is_stopword(part) && !QUERY_VOCABULARY.contains(&part) {
                    map.insert(part, column.name.clone(), column.inferred_type, PARTIAL_SCORE, MatchSource::Partial);
                }
            }
        }

        map
    }

    fn insert(
        &mut self,
        phrase: &str,
        column: String,
        column_type: ColumnType,
        score: f64,
        source: MatchSource,
    ) {
        let entry = self.phrases.entry(phrase.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|c| c.column == column) {
            if score > existing.score {
                existing.score = score;
                existing.source = source;
            }
            return;
        }
        entry.push(ColumnCandidate {
            column,
            column_type,
            score,
            source,
        });
        self.max_words = self.max_words.max(phrase.split(' ').count());
    }

    /// Candidates for an already-normalized phrase, trying the singular form too
    pub fn get(&self, phrase: &str) -> Option<&[ColumnCandidate]> {
        self.phrases
            .get(phrase)
            .or_else(|| singularize(phrase).and_then(|s| self.phrases.get(&s)))
            .map(Vec::as_slice)
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Resolves business terms to columns.
///
/// Holds the shared dictionary plus a per-schema cache of built synonym maps.
/// The cache is write-once per schema fingerprint, so concurrent translations
/// at worst build the same map twice.
pub struct SynonymResolver {
    dictionary: Arc<SynonymDictionary>,
    similarity_floor: f64,
    maps: RwLock<MapCache>,
}

#[derive(Default)]
struct MapCache {
    by_schema: HashMap<String, Arc<SynonymMap>>,
    order: VecDeque<String>,
}

impl MapCache {
    fn get_or_insert(&mut self, key: String, built: Arc<SynonymMap>) -> Arc<SynonymMap> {
        if let Some(existing) = self.by_schema.get(&key) {
            return existing.clone();
        }
        while self.order.len() >= MAX_CACHED_SCHEMAS {
            if let Some(oldest) = self.order.pop_front() {
                self.by_schema.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.by_schema.insert(key, built.clone());
        built
    }
}

impl SynonymResolver {
    pub fn new(dictionary: Arc<SynonymDictionary>, similarity_floor: f64) -> Self {
        Self {
            dictionary,
            similarity_floor,
            maps: RwLock::new(MapCache::default()),
        }
    }

    pub fn similarity_floor(&self) -> f64 {
        self.similarity_floor
    }

    /// Synonym map for `schema`, built on first use
    pub fn synonym_map(&self, schema: &SchemaContext) -> Arc<SynonymMap> {
        let key = schema.fingerprint();
        if let Some(map) = self
            .maps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .by_schema
            .get(&key)
        {
            return map.clone();
        }

        let built = Arc::new(SynonymMap::build(&self.dictionary, schema));
        tracing::debug!(
            "Built synonym map for {} ({} phrases)",
            schema.table_name,
            built.len()
        );
        self.maps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_insert(key, built)
    }

    /// Number of schemas with a cached synonym map
    pub fn cached_schemas(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .by_schema
            .len()
    }

    /// Ranked column candidates for `term`; empty when nothing clears the similarity floor
    pub fn resolve(&self, term: &str, schema: &SchemaContext, hint: TypeHint) -> Vec<ColumnCandidate> {
        let normalized = normalize_term(term);
        if normalized.is_empty() {
            return Vec::new();
        }

        let map = self.synonym_map(schema);
        let candidates = match map.get(&normalized) {
            Some(found) => found.to_vec(),
            None => self.fuzzy_candidates(&normalized, schema),
        };
        rank(candidates, hint)
    }

    /// Best column for `term`, or `None` when unresolved
    pub fn resolve_best(&self, term: &str, schema: &SchemaContext, hint: TypeHint) -> Option<Resolution> {
        let ranked = self.resolve(term, schema, hint);
        pick(term, &ranked, hint)
    }

    /// Candidates for phrases overlaid from remembered mappings
    pub fn learned_candidates(&self, learned: &[LearnedTerm], schema: &SchemaContext) -> BTreeMap<String, Vec<ColumnCandidate>> {
        let mut overlay: BTreeMap<String, Vec<ColumnCandidate>> = BTreeMap::new();
        for entry in learned {
            if let Some(column) = schema.column(&entry.column) {
                let candidates = overlay.entry(normalize_term(&entry.term)).or_default();
                if !candidates.iter().any(|c| c.column == column.name) {
                    candidates.push(ColumnCandidate {
                        column: column.name.clone(),
                        column_type: column.inferred_type,
                        score: LEARNED_SCORE,
                        source: MatchSource::Learned,
                    });
                }
            }
        }
        overlay
    }

    /// String similarity between a user phrase and a column name, 0.0-1.0
    pub fn similarity(term: &str, column: &str) -> f64 {
        let term = normalize_term(term);
        let column = column_words(column);
        if term.is_empty() || column.is_empty() {
            return 0.0;
        }

        let jw = jaro_winkler(&term, &column);
        let lev = normalized_levenshtein(&term, &column);

        // All words of the term appear in the column name ("margin" vs "profit margin")
        let term_words: Vec<&str> = term.split(' ').collect();
        let column_words: Vec<&str> = column.split(' ').collect();
        let contained = term_words.iter().all(|w| column_words.contains(w));
        let containment = if contained {
            let coverage = term_words.len() as f64 / column_words.len() as f64;
            0.8 + 0.15 * coverage
        } else {
            0.0
        };

        jw.max(lev).max(containment).min(1.0)
    }

    fn fuzzy_candidates(&self, term: &str, schema: &SchemaContext) -> Vec<ColumnCandidate> {
        let term_len = term.split(' ').count();
        schema
            .columns
            .iter()
            .filter_map(|column| {
                // A long phrase sharing a prefix with a short name is not a match
                if term_len > column_words(&column.name).split(' ').count() + 1 {
                    return None;
                }
                let score = Self::similarity(term, &column.name);
                (score >= self.similarity_floor).then(|| ColumnCandidate {
                    column: column.name.clone(),
                    column_type: column.inferred_type,
                    // Fuzzy never outranks a dictionary hit
                    score: score * 0.9,
                    source: MatchSource::Fuzzy,
                })
            })
            .collect()
    }
}

fn adjusted(candidate: &ColumnCandidate, hint: TypeHint) -> f64 {
    candidate.score + hint.bonus(candidate.column_type)
}

/// Order candidates by score plus type fit, breaking exact ties by name for determinism
pub fn rank(mut candidates: Vec<ColumnCandidate>, hint: TypeHint) -> Vec<ColumnCandidate> {
    candidates.sort_by(|a, b| {
        adjusted(b, hint)
            .partial_cmp(&adjusted(a, hint))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.column.cmp(&b.column))
    });
    candidates
}

/// Choose the top candidate and note any that tie with it
pub fn pick(term: &str, candidates: &[ColumnCandidate], hint: TypeHint) -> Option<Resolution> {
    let ranked = rank(candidates.to_vec(), hint);
    let best = ranked.first()?;
    let best_score = adjusted(best, hint);
    let tied_with = ranked
        .iter()
        .skip(1)
        .filter(|c| (adjusted(c, hint) - best_score).abs() < 1e-9)
        .map(|c| c.column.clone())
        .collect();

    Some(Resolution {
        term: term.to_string(),
        column: best.column.clone(),
        column_type: best.column_type,
        source: best.source,
        tied_with,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SynonymResolver {
        SynonymResolver::new(Arc::new(SynonymDictionary::financial()), 0.80)
    }

    fn schema() -> SchemaContext {
        SchemaContext::new("sales", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("actual_sales", ColumnType::Numeric)
            .with_column("budget_sales", ColumnType::Numeric)
            .with_column("price_variance", ColumnType::Numeric)
            .with_column("customer_satisfaction", ColumnType::Numeric)
    }

    #[test]
    fn test_static_mapping_wins() {
        let r = resolver();
        let best = r.resolve_best("actual sales", &schema(), TypeHint::Numeric).unwrap();
        assert_eq!(best.column, "actual_sales");
        assert!(!best.is_ambiguous());

        let best = r.resolve_best("satisfaction", &schema(), TypeHint::Numeric).unwrap();
        assert_eq!(best.column, "customer_satisfaction");
        assert_eq!(best.source, MatchSource::Static);
    }

    #[test]
    fn test_map_cache_is_bounded() {
        let r = resolver();
        for i in 0..MAX_CACHED_SCHEMAS + 5 {
            let schema = SchemaContext::new(format!("t{}", i), vec![]).with_column("region", ColumnType::Categorical);
            assert!(r.resolve_best("region", &schema, TypeHint::Dimension).is_some());
        }
        assert_eq!(r.cached_schemas(), MAX_CACHED_SCHEMAS);

        // a cached schema is served without growing the cache
        r.synonym_map(&schema());
        r.synonym_map(&schema());
        assert_eq!(r.cached_schemas(), MAX_CACHED_SCHEMAS);
    }

    #[test]
    fn test_plural_lookup() {
        let best = resolver().resolve_best("regions", &schema(), TypeHint::Dimension).unwrap();
        assert_eq!(best.column, "region");
    }

    #[test]
    fn test_fuzzy_fallback() {
        let best = resolver().resolve_best("price varience", &schema(), TypeHint::Numeric).unwrap();
        assert_eq!(best.column, "price_variance");
        assert_eq!(best.source, MatchSource::Fuzzy);
    }

    #[test]
    fn test_unresolvable_term_is_empty() {
        let r = resolver();
        assert!(r.resolve("qwerty", &schema(), TypeHint::Any).is_empty());
        assert!(r.resolve_best("", &schema(), TypeHint::Any).is_none());
    }

    #[test]
    fn test_type_hint_breaks_ties() {
        let schema = SchemaContext::new("t", vec![])
            .with_column("sales_region", ColumnType::Categorical)
            .with_column("sales_amount", ColumnType::Numeric);
        let r = resolver();

        // The dictionary maps "sales" to sales_amount; sales_region only shares the head word
        let numeric = r.resolve_best("sales", &schema, TypeHint::Numeric).unwrap();
        assert_eq!(numeric.column, "sales_amount");
        assert!(!numeric.is_ambiguous());
    }

    #[test]
    fn test_equal_candidates_are_ambiguous() {
        let schema = SchemaContext::new("t", vec![])
            .with_column("sales_north", ColumnType::Numeric)
            .with_column("sales_south", ColumnType::Numeric);
        let best = resolver().resolve_best("sales", &schema, TypeHint::Numeric).unwrap();
        assert_eq!(best.column, "sales_north");
        assert_eq!(best.tied_with, vec!["sales_south".to_string()]);
    }

    #[test]
    fn test_column_words_and_singularize() {
        assert_eq!(column_words("ActualSales"), "actual sales");
        assert_eq!(column_words("price_variance"), "price variance");
        assert_eq!(singularize("regions").as_deref(), Some("region"));
        assert_eq!(singularize("top categories").as_deref(), Some("top category"));
        assert_eq!(singularize("sales").as_deref(), Some("sale"));
        assert_eq!(singularize("gross"), None);
    }

    #[test]
    fn test_dictionary_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.json");
        std::fs::write(&path, r#"{"Turnover": ["actual_sales"]}"#).unwrap();

        let dictionary = SynonymDictionary::empty().extend_from_file(&path).unwrap();
        assert_eq!(dictionary.lookup("turnover"), Some(&["actual_sales".to_string()][..]));
    }
}
