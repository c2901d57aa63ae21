use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::models::{LearnedTerm, SchemaContext};
use crate::services::synonyms::{
    is_stopword, pick, singularize, ColumnCandidate, Resolution, SynonymMap, SynonymResolver,
    TypeHint,
};

static NUMBER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-)?\$?(-)?(\d[\d,]*(?:\.\d+)?|\.\d+)(%|k|mm|m|bn|b)?$")
        .expect("number pattern is valid")
});

const NUMBER_WORDS: &[(&str, f64)] = &[
    ("zero", 0.0),
    ("one", 1.0),
    ("two", 2.0),
    ("three", 3.0),
    ("four", 4.0),
    ("five", 5.0),
    ("six", 6.0),
    ("seven", 7.0),
    ("eight", 8.0),
    ("nine", 9.0),
    ("ten", 10.0),
    ("twelve", 12.0),
    ("fifteen", 15.0),
    ("twenty", 20.0),
];

/// Lowercase the query, keep characters that carry meaning for literals and
/// operators, pad symbolic operators with spaces, collapse whitespace
pub fn normalize(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    let mut in_symbol = false;
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '<' | '>' | '=' | '!') {
            if !in_symbol {
                out.push(' ');
            }
            out.push(ch);
            in_symbol = true;
            continue;
        }
        if in_symbol {
            out.push(' ');
            in_symbol = false;
        }
        if ch.is_alphanumeric() || matches!(ch, '.' | ',' | '%' | '$' | '-' | '_' | '\'' | '"') {
            out.push(ch);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A whitespace token of the normalized query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryToken {
    /// Token as written, punctuation included
    pub raw: String,
    /// Letters, digits and underscores only; used for vocabulary lookups
    pub word: String,
}

impl QueryToken {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            word: raw
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect(),
        }
    }
}

/// A run of tokens that names a column
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    /// First token index
    pub start: usize,
    /// One past the last token index
    pub end: usize,
    pub phrase: String,
    pub candidates: Vec<ColumnCandidate>,
}

impl Mention {
    pub fn resolve(&self, hint: TypeHint) -> Option<Resolution> {
        pick(&self.phrase, &self.candidates, hint)
    }

    /// Whether any candidate is a numeric column
    pub fn is_numeric(&self) -> bool {
        self.resolve(TypeHint::Numeric)
            .map(|r| r.column_type == crate::models::ColumnType::Numeric)
            .unwrap_or(false)
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.start && idx < self.end
    }
}

/// A numeric literal read from the token stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberLiteral {
    pub value: f64,
    pub percent: bool,
    /// One past the last token consumed
    pub end: usize,
}

/// Everything the extractors need to know about one query, computed once
pub struct QueryContext<'a> {
    pub original: &'a str,
    pub normalized: String,
    pub tokens: Vec<QueryToken>,
    pub schema: &'a SchemaContext,
    pub resolver: &'a SynonymResolver,
    pub mentions: Vec<Mention>,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        original: &'a str,
        schema: &'a SchemaContext,
        resolver: &'a SynonymResolver,
        learned: &[LearnedTerm],
    ) -> Self {
        let normalized = normalize(original);
        let tokens: Vec<QueryToken> = normalized.split(' ').filter(|t| !t.is_empty()).map(QueryToken::new).collect();
        let map = resolver.synonym_map(schema);
        let overlay = resolver.learned_candidates(learned, schema);
        let mentions = find_mentions(&tokens, &map, &overlay);

        tracing::debug!(
            "Query context: {} tokens, mentions [{}]",
            tokens.len(),
            mentions
                .iter()
                .map(|m| m.phrase.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            original,
            normalized,
            tokens,
            schema,
            resolver,
            mentions,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn word(&self, idx: usize) -> &str {
        self.tokens.get(idx).map(|t| t.word.as_str()).unwrap_or("")
    }

    pub fn raw(&self, idx: usize) -> &str {
        self.tokens.get(idx).map(|t| t.raw.as_str()).unwrap_or("")
    }

    /// Whether the words starting at `idx` spell `phrase`
    pub fn phrase_at(&self, idx: usize, phrase: &[&str]) -> bool {
        phrase
            .iter()
            .enumerate()
            .all(|(offset, expected)| self.word(idx + offset) == *expected)
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.tokens.iter().any(|t| t.word == word)
    }

    /// Words in `[start, end)` joined by spaces
    pub fn span(&self, start: usize, end: usize) -> String {
        let end = end.min(self.tokens.len());
        if start >= end {
            return String::new();
        }
        self.tokens[start..end]
            .iter()
            .map(|t| t.word.as_str())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn mention_at(&self, idx: usize) -> Option<&Mention> {
        self.mentions.iter().find(|m| m.start == idx)
    }

    pub fn mention_covering(&self, idx: usize) -> Option<&Mention> {
        self.mentions.iter().find(|m| m.contains(idx))
    }

    /// Nearest mention that ends at or before `before` and starts at or after `floor`
    pub fn mention_before(&self, before: usize, floor: usize) -> Option<&Mention> {
        self.mentions
            .iter()
            .filter(|m| m.end <= before && m.start >= floor)
            .max_by_key(|m| m.end)
    }

    /// First mention starting in `[from, to)`
    pub fn mention_after(&self, from: usize, to: usize) -> Option<&Mention> {
        self.mentions
            .iter()
            .filter(|m| m.start >= from && m.start < to)
            .min_by_key(|m| m.start)
    }

    pub fn numeric_mentions(&self) -> impl Iterator<Item = &Mention> {
        self.mentions.iter().filter(|m| m.is_numeric())
    }

    pub fn resolve_term(&self, term: &str, hint: TypeHint) -> Option<Resolution> {
        self.resolver.resolve_best(term, self.schema, hint)
    }

    /// Resolve a free phrase, dropping leading words until something matches
    /// ("the sales variance" -> "sales variance")
    pub fn resolve_phrase(&self, phrase: &str, hint: TypeHint) -> Option<Resolution> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        (0..words.len())
            .map(|skip| words[skip..].join(" "))
            .filter(|candidate| !is_stopword(candidate))
            .find_map(|candidate| self.resolve_term(&candidate, hint))
    }

    /// Read a number starting at `idx`: `60000`, `$60,000`, `1.5k`, `2 million`, `15%`, `five`
    pub fn number_at(&self, idx: usize) -> Option<NumberLiteral> {
        let mut idx = idx;
        if self.raw(idx) == "$" {
            idx += 1;
        }
        let raw = self.raw(idx).trim_end_matches(['.', ',']);
        if raw.is_empty() {
            return None;
        }

        if let Some((_, value)) = NUMBER_WORDS.iter().find(|(word, _)| *word == raw) {
            return Some(NumberLiteral {
                value: *value,
                percent: false,
                end: idx + 1,
            });
        }

        let captures = NUMBER_TOKEN.captures(raw)?;
        let digits = captures.get(3)?.as_str().replace(',', "");
        let mut value: f64 = digits.parse().ok()?;
        if captures.get(1).is_some() || captures.get(2).is_some() {
            value = -value;
        }

        let mut percent = false;
        match captures.get(4).map(|m| m.as_str()) {
            Some("%") => percent = true,
            Some("k") => value *= 1e3,
            Some("m") | Some("mm") => value *= 1e6,
            Some("b") | Some("bn") => value *= 1e9,
            _ => {}
        }

        let mut end = idx + 1;
        if captures.get(4).is_none() {
            match self.word(end) {
                "thousand" | "k" => {
                    value *= 1e3;
                    end += 1;
                }
                "million" | "millions" | "m" | "mm" => {
                    value *= 1e6;
                    end += 1;
                }
                "billion" | "billions" | "bn" => {
                    value *= 1e9;
                    end += 1;
                }
                "percent" | "pct" => {
                    percent = true;
                    end += 1;
                }
                _ => {}
            }
        }

        // digit runs past f64 range parse as infinity
        if !value.is_finite() {
            tracing::debug!("Ignoring number '{}': out of range", raw);
            return None;
        }

        Some(NumberLiteral {
            value,
            percent,
            end,
        })
    }

    /// Find `lowered` in the original query and return it with the user's casing
    pub fn recover_casing(&self, lowered: &str) -> String {
        let haystack = self.original.to_lowercase();
        if haystack.len() == self.original.len() {
            if let Some(pos) = haystack.find(lowered) {
                if let Some(original) = self.original.get(pos..pos + lowered.len()) {
                    return original.to_string();
                }
            }
        }
        lowered.to_string()
    }
}

/// Greedy longest-phrase scan for column mentions; learned phrases win over the synonym map
fn find_mentions(
    tokens: &[QueryToken],
    map: &Arc<SynonymMap>,
    learned: &BTreeMap<String, Vec<ColumnCandidate>>,
) -> Vec<Mention> {
    let learned_words = learned
        .keys()
        .map(|k| k.split(' ').count())
        .max()
        .unwrap_or(0);
    let max_words = map.max_words().max(learned_words).max(1);

    let mut mentions = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        let longest = max_words.min(tokens.len() - idx);
        let mut found = None;
        for len in (1..=longest).rev() {
            let words: Vec<&str> = tokens[idx..idx + len].iter().map(|t| t.word.as_str()).collect();
            if words.iter().any(|w| w.is_empty()) {
                continue;
            }
            if len == 1 && (is_stopword(words[0]) || words[0].chars().all(|c| c.is_ascii_digit())) {
                continue;
            }
            let phrase = words.join(" ");
            let candidates = learned
                .get(&phrase)
                .or_else(|| singularize(&phrase).and_then(|s| learned.get(&s)))
                .map(|c| c.to_vec())
                .or_else(|| map.get(&phrase).map(|c| c.to_vec()));
            if let Some(candidates) = candidates {
                found = Some(Mention {
                    start: idx,
                    end: idx + len,
                    phrase,
                    candidates,
                });
                break;
            }
        }

        match found {
            Some(mention) => {
                idx = mention.end;
                mentions.push(mention);
            }
            None => idx += 1,
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;
    use crate::services::synonyms::SynonymDictionary;

    fn resolver() -> SynonymResolver {
        SynonymResolver::new(Arc::new(SynonymDictionary::financial()), 0.80)
    }

    fn schema() -> SchemaContext {
        SchemaContext::new("sales", vec![])
            .with_column("region", ColumnType::Categorical)
            .with_column("actual_sales", ColumnType::Numeric)
            .with_column("budget_sales", ColumnType::Numeric)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Show me Sales>=60,000?"), "show me sales >= 60,000");
        assert_eq!(normalize("  Top 5   regions!"), "top 5 regions");
        assert_eq!(normalize("margin = 15%"), "margin = 15%");
    }

    #[test]
    fn test_mentions_prefer_longest_phrase() {
        let resolver = resolver();
        let schema = schema();
        let ctx = QueryContext::new("Top 5 regions by actual sales", &schema, &resolver, &[]);
        let phrases: Vec<&str> = ctx.mentions.iter().map(|m| m.phrase.as_str()).collect();
        assert_eq!(phrases, vec!["regions", "actual sales"]);
        assert_eq!(
            ctx.mentions[1].resolve(TypeHint::Numeric).unwrap().column,
            "actual_sales"
        );
    }

    #[test]
    fn test_learned_terms_overlay() {
        let resolver = resolver();
        let schema = schema();
        let learned = vec![LearnedTerm::new("turnover", "actual_sales")];
        let ctx = QueryContext::new("turnover above 10", &schema, &resolver, &learned);
        assert_eq!(ctx.mentions.len(), 1);
        assert_eq!(ctx.mentions[0].resolve(TypeHint::Any).unwrap().column, "actual_sales");
    }

    #[test]
    fn test_number_forms() {
        let resolver = resolver();
        let schema = schema();
        let ctx = QueryContext::new("$60,000 1.5k 2 million 15% five -3", &schema, &resolver, &[]);
        assert_eq!(ctx.number_at(0).unwrap().value, 60000.0);
        assert_eq!(ctx.number_at(1).unwrap().value, 1500.0);
        let million = ctx.number_at(2).unwrap();
        assert_eq!(million.value, 2_000_000.0);
        assert_eq!(million.end, 4);
        let pct = ctx.number_at(4).unwrap();
        assert!(pct.percent);
        assert_eq!(pct.value, 15.0);
        assert_eq!(ctx.number_at(5).unwrap().value, 5.0);
        assert_eq!(ctx.number_at(6).unwrap().value, -3.0);
        assert!(ctx.number_at(99).is_none());
    }

    #[test]
    fn test_overflowing_number_is_rejected() {
        let resolver = resolver();
        let schema = schema();
        let huge = "9".repeat(400);
        let query = format!("{} {}k", huge, "9".repeat(306));
        let ctx = QueryContext::new(&query, &schema, &resolver, &[]);
        assert!(ctx.number_at(0).is_none());
        assert!(ctx.number_at(1).is_none());
    }

    #[test]
    fn test_recover_casing() {
        let resolver = resolver();
        let schema = schema();
        let ctx = QueryContext::new("region is 'North East'", &schema, &resolver, &[]);
        assert_eq!(ctx.recover_casing("north east"), "North East");
    }
}
