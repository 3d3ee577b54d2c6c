//! Keyword-based question classification.
//!
//! [`classify`] is a pure function of the question text and a
//! [`ClassificationRules`] table. Each rule maps a set of keyword phrases to
//! a complexity class and the tier that answers it. When rules for several
//! tiers match, the most detailed tier wins.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use strata_vector_index::TierLevel;

/// How much detail a question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// No rule matched; the default tier answers.
    Unmatched,
    /// Key points, gist, highlights.
    Simple,
    /// Summaries and explanations.
    Moderate,
    /// Specific facts, sections, exact wording.
    Detailed,
    /// Whole-document analysis.
    Comprehensive,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Unmatched => "unmatched",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Detailed => "detailed",
            Complexity::Comprehensive => "comprehensive",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket of the keyword table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub complexity: Complexity,
    /// Tier that answers questions in this bucket.
    pub tier: TierLevel,
    /// Phrases matched on whole words, case-insensitively.
    pub keywords: Vec<String>,
    /// Confidence with zero matches; each match adds `confidence_step`.
    pub base_confidence: f64,
    /// Confidence never exceeds this.
    pub max_confidence: f64,
}

impl KeywordRule {
    pub fn new(complexity: Complexity, tier: TierLevel, keywords: &[&str]) -> Self {
        Self {
            complexity,
            tier,
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            base_confidence: 0.3,
            max_confidence: 0.8,
        }
    }

    pub fn with_confidence(mut self, base: f64, max: f64) -> Self {
        self.base_confidence = base;
        self.max_confidence = max;
        self
    }
}

/// The full classification table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub rules: Vec<KeywordRule>,
    /// Tier used when no rule matches.
    pub default_tier: TierLevel,
    /// Confidence reported when no rule matches.
    pub default_confidence: f64,
    /// Confidence added per matched keyword.
    pub confidence_step: f64,
}

impl ClassificationRules {
    /// A table with only `rules`, falling back to tier 1.
    pub fn with_rules(rules: Vec<KeywordRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Problems that make the table unusable. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..=1.0).contains(&self.default_confidence) {
            problems.push(format!(
                "default_confidence {} outside [0, 1]",
                self.default_confidence
            ));
        }
        for rule in &self.rules {
            let name = rule.complexity;
            if rule.keywords.is_empty() {
                problems.push(format!("{name} rule has no keywords"));
            }
            if rule.keywords.iter().any(|k| tokenize(k).is_empty()) {
                problems.push(format!("{name} rule has a blank keyword"));
            }
            let bounds_ok = (0.0..=rule.max_confidence).contains(&rule.base_confidence)
                && rule.max_confidence <= 1.0;
            if !bounds_ok {
                problems.push(format!(
                    "{name} rule confidence bounds {}..{} invalid",
                    rule.base_confidence, rule.max_confidence
                ));
            }
        }
        problems
    }
}

impl Default for ClassificationRules {
    fn default() -> Self {
        let rules = vec![
            KeywordRule::new(
                Complexity::Simple,
                TierLevel::L3,
                &[
                    "key points",
                    "bullet",
                    "concise",
                    "short",
                    "brief",
                    "overview",
                    "main points",
                    "highlights",
                    "summary",
                    "gist",
                    "essence",
                ],
            )
            .with_confidence(0.3, 0.8),
            KeywordRule::new(
                Complexity::Moderate,
                TierLevel::L2,
                &[
                    "summary",
                    "overview",
                    "brief",
                    "describe",
                    "explain",
                    "what is",
                    "tell me about",
                    "give me",
                    "provide",
                    "outline",
                ],
            )
            .with_confidence(0.4, 0.8),
            KeywordRule::new(
                Complexity::Detailed,
                TierLevel::L1,
                &[
                    "detailed",
                    "full",
                    "section",
                    "law",
                    "policy",
                    "regulation",
                    "specific",
                    "exact",
                    "precise",
                    "complete",
                    "entire",
                    "all",
                    "how does",
                    "what are the",
                    "explain in detail",
                    "step by step",
                ],
            )
            .with_confidence(0.5, 0.9),
            KeywordRule::new(
                Complexity::Comprehensive,
                TierLevel::L1,
                &[
                    "comprehensive",
                    "complete analysis",
                    "full document",
                    "everything",
                    "entire policy",
                    "all aspects",
                    "thorough",
                    "exhaustive",
                ],
            )
            .with_confidence(0.6, 0.9),
        ];
        Self {
            rules,
            default_tier: TierLevel::L1,
            default_confidence: 0.3,
            confidence_step: 0.1,
        }
    }
}

/// Result of classifying one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub complexity: Complexity,
    pub tier: TierLevel,
    pub confidence: f64,
    /// Keywords of the winning rule found in the question.
    pub matched: Vec<String>,
}

/// Classify `question` against `rules`.
pub fn classify(question: &str, rules: &ClassificationRules) -> Classification {
    let words = tokenize(question);

    let best = rules
        .rules
        .iter()
        .filter_map(|rule| {
            let matched: Vec<String> = rule
                .keywords
                .iter()
                .filter(|k| contains_phrase(&words, &tokenize(k)))
                .cloned()
                .collect();
            (!matched.is_empty()).then_some((rule, matched))
        })
        // Lower tier number is more detailed; within a tier prefer the
        // stronger class.
        .max_by_key(|(rule, _)| (Reverse(rule.tier), rule.complexity));

    match best {
        Some((rule, matched)) => {
            let confidence = (rule.base_confidence
                + rules.confidence_step * matched.len() as f64)
                .min(rule.max_confidence);
            Classification {
                complexity: rule.complexity,
                tier: rule.tier,
                confidence,
                matched,
            }
        }
        None => Classification {
            complexity: Complexity::Unmatched,
            tier: rules.default_tier,
            confidence: rules.default_confidence,
            matched: Vec::new(),
        },
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|window| window == phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn simple_only() -> ClassificationRules {
        ClassificationRules::with_rules(vec![KeywordRule::new(
            Complexity::Simple,
            TierLevel::L3,
            &["key points"],
        )])
    }

    #[test]
    fn test_simple_rule_routes_to_tier_three() {
        let c = classify("what are the key points about policy X?", &simple_only());
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.tier, TierLevel::L3);
        assert_eq!(c.matched, vec!["key points"]);
        assert!((c.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_falls_to_default_tier() {
        let c = classify("royalty rates for gold", &ClassificationRules::default());
        assert_eq!(c.complexity, Complexity::Unmatched);
        assert_eq!(c.tier, TierLevel::L1);
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn test_ties_prefer_more_detailed_tier() {
        let rules = ClassificationRules::default();
        // "brief" is both a simple and a moderate keyword.
        let c = classify("a brief note", &rules);
        assert_eq!((c.complexity, c.tier), (Complexity::Moderate, TierLevel::L2));

        // "policy" pulls the whole question to tier 1.
        let c = classify("give me the key points of the policy", &rules);
        assert_eq!((c.complexity, c.tier), (Complexity::Detailed, TierLevel::L1));

        // Same tier: comprehensive outranks detailed.
        let c = classify("a thorough look at the entire policy", &rules);
        assert_eq!(c.complexity, Complexity::Comprehensive);
        assert_eq!(c.tier, TierLevel::L1);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let rules = ClassificationRules::default();
        // "all" must not match inside "smallholder", nor "law" inside "lawn".
        let c = classify("smallholder lawn care", &rules);
        assert_eq!(c.complexity, Complexity::Unmatched);

        let c = classify("Key-Points, please", &simple_only());
        assert_eq!(c.complexity, Complexity::Simple);
    }

    #[test]
    fn test_confidence_is_capped() {
        let rules = ClassificationRules::default();
        let c = classify(
            "comprehensive thorough exhaustive complete analysis of everything",
            &rules,
        );
        assert_eq!(c.complexity, Complexity::Comprehensive);
        assert_eq!(c.confidence, 0.9);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let rules = ClassificationRules::default();
        let question = "Explain in detail how does the water regulation apply?";
        let first = classify(question, &rules);
        for _ in 0..10 {
            assert_eq!(classify(question, &rules), first);
        }
    }

    #[test]
    fn test_validate_flags_bad_rules() {
        let mut rules = simple_only();
        rules.rules.push(
            KeywordRule::new(Complexity::Moderate, TierLevel::L2, &["  "])
                .with_confidence(0.9, 0.5),
        );
        rules.rules.push(KeywordRule::new(Complexity::Detailed, TierLevel::L1, &[]));
        let problems = rules.validate();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(ClassificationRules::default().validate().is_empty());
    }
}
