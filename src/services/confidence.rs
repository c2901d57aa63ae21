use crate::config::ConfidencePenalties;
use crate::models::{ParsedIntent, ResolutionIssue};

/// Confidence from extraction output alone; no state survives between calls.
pub struct ConfidenceScorer {
    penalties: ConfidencePenalties,
}

impl ConfidenceScorer {
    pub fn new(penalties: ConfidencePenalties) -> Self {
        Self { penalties }
    }

    pub fn penalties(&self) -> &ConfidencePenalties {
        &self.penalties
    }

    /// 1.0 minus a fixed penalty per issue, and a large one when nothing at
    /// all was understood. Clamped to [0, 1].
    pub fn score(&self, query: &str, intent: &ParsedIntent, issues: &[ResolutionIssue]) -> f64 {
        if query.trim().is_empty() {
            return 0.0;
        }

        let mut confidence = 1.0;
        for issue in issues {
            confidence -= match issue {
                ResolutionIssue::UnresolvedTerm { .. } => self.penalties.unresolved_term,
                ResolutionIssue::DroppedCondition { .. } => self.penalties.dropped_condition,
                ResolutionIssue::AmbiguousColumn { .. } => self.penalties.ambiguous_column,
                ResolutionIssue::LlmFallback { .. } => self.penalties.llm_fallback,
            };
        }
        if intent.is_empty() {
            confidence -= self.penalties.empty_intent;
        }

        f64::clamp(confidence, 0.0, 1.0)
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ConfidencePenalties::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionValue, Operator, ParsedCondition};

    fn resolved_intent() -> ParsedIntent {
        let mut intent = ParsedIntent::default();
        intent.push_condition(ParsedCondition::new(
            "sales",
            Operator::Gt,
            ConditionValue::number(60000.0),
            "sales greater than 60000",
        ));
        intent
    }

    fn unresolved(term: &str) -> ResolutionIssue {
        ResolutionIssue::UnresolvedTerm { term: term.to_string() }
    }

    #[test]
    fn test_clean_translation_is_fully_confident() {
        let scorer = ConfidenceScorer::default();
        assert_eq!(scorer.score("sales greater than 60000", &resolved_intent(), &[]), 1.0);
    }

    #[test]
    fn test_each_issue_costs_its_penalty() {
        let scorer = ConfidenceScorer::default();
        let issues = vec![
            unresolved("happiness"),
            ResolutionIssue::AmbiguousColumn {
                term: "sales".to_string(),
                candidates: vec!["sales_north".to_string(), "sales_south".to_string()],
            },
        ];
        let score = scorer.score("q", &resolved_intent(), &issues);
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_intent_scores_low() {
        let scorer = ConfidenceScorer::default();
        let score = scorer.score("asdkjf qwerty", &ParsedIntent::default(), &[]);
        assert!(score < 0.3);
        assert_eq!(scorer.score("   ", &resolved_intent(), &[]), 0.0);
    }

    #[test]
    fn test_floor_at_zero() {
        let scorer = ConfidenceScorer::default();
        let issues: Vec<_> = (0..20).map(|i| unresolved(&format!("t{}", i))).collect();
        assert_eq!(scorer.score("q", &ParsedIntent::default(), &issues), 0.0);
    }

    #[test]
    fn test_losing_a_condition_never_raises_confidence() {
        let scorer = ConfidenceScorer::default();
        let before = scorer.score("q", &resolved_intent(), &[]);
        let after = scorer.score("q", &ParsedIntent::default(), &[unresolved("sales")]);
        assert!(after <= before);
    }
}
