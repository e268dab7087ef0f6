//! Category matching
//!
//! Stages run in order and the first stage producing a candidate at or above
//! the threshold decides: exact, plural/singular, containment, similarity.

use crate::config::{MatcherConfig, TieBreak};
use std::collections::BTreeSet;
use strsim::{jaro_winkler, normalized_levenshtein};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Plural,
    Containment,
    Similarity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Canonical spelling of the matched category.
    Matched {
        canonical: String,
        score: f64,
        method: MatchMethod,
    },
    /// Several candidates share the best score.
    Ambiguous(Vec<String>),
    /// Nothing reached the threshold; nearest candidates first.
    NoMatch(Vec<String>),
}

/// Vocabulary a value is matched against.
pub struct Vocabulary<'a> {
    pub names: &'a BTreeSet<String>,
    pub groups: &'a BTreeSet<String>,
}

pub trait CategoryMatcher: Send + Sync {
    fn find(&self, input: &str, vocabulary: &Vocabulary<'_>) -> MatchOutcome;
}

/// Default matcher: strsim similarity with a plural heuristic and a containment bonus.
pub struct FuzzyCategoryMatcher {
    config: MatcherConfig,
}

impl FuzzyCategoryMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Lowercase, strip quotes and backticks, collapse whitespace.
    pub fn normalize(s: &str) -> String {
        s.trim()
            .trim_matches(|c| c == '`' || c == '\'' || c == '"')
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn similarity(a: &str, b: &str) -> f64 {
        (normalized_levenshtein(a, b) + jaro_winkler(a, b)) / 2.0
    }

    fn plural_score(input: &str, candidate: &str) -> Option<f64> {
        let singulars = [
            input.strip_suffix("ies").map(|stem| format!("{}y", stem)),
            input.strip_suffix("es").map(str::to_string),
            input.strip_suffix('s').map(str::to_string),
        ];

        let matches_singular = singulars.iter().flatten().any(|s| s == candidate);
        let matches_plural = candidate.strip_suffix('s') == Some(input)
            || candidate.strip_suffix("ies").map(|stem| format!("{}y", stem)).as_deref() == Some(input);

        (matches_singular || matches_plural).then_some(0.95)
    }

    fn containment_score(input: &str, candidate: &str) -> Option<f64> {
        let (shorter, longer) = if input.len() <= candidate.len() {
            (input, candidate)
        } else {
            (candidate, input)
        };

        if shorter.chars().count() < 3 || !longer.contains(shorter) {
            return None;
        }

        let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
        Some(0.8 + 0.2 * ratio)
    }

    fn resolve_ties(&self, mut best: Vec<(String, f64)>, vocabulary: &Vocabulary<'_>) -> Result<(String, f64), Vec<String>> {
        best.sort_by(|a, b| a.0.cmp(&b.0));
        if best.len() == 1 {
            return Ok(best.remove(0));
        }

        match self.config.tie_break {
            TieBreak::Reject => Err(best.into_iter().map(|(name, _)| name).collect()),
            TieBreak::Alphabetical => Ok(best.remove(0)),
            TieBreak::PreferGroup => {
                let position = best
                    .iter()
                    .position(|(name, _)| vocabulary.groups.contains(name))
                    .unwrap_or(0);
                Ok(best.remove(position))
            }
        }
    }
}

impl Default for FuzzyCategoryMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl CategoryMatcher for FuzzyCategoryMatcher {
    fn find(&self, input: &str, vocabulary: &Vocabulary<'_>) -> MatchOutcome {
        let needle = Self::normalize(input);

        if let Some(name) = vocabulary.names.iter().find(|n| n.to_lowercase() == needle) {
            return MatchOutcome::Matched {
                canonical: name.clone(),
                score: 1.0,
                method: MatchMethod::Exact,
            };
        }

        let stages: [(MatchMethod, fn(&str, &str) -> Option<f64>); 3] = [
            (MatchMethod::Plural, Self::plural_score),
            (MatchMethod::Containment, Self::containment_score),
            (MatchMethod::Similarity, |a, b| Some(Self::similarity(a, b))),
        ];

        for (method, score_fn) in stages {
            let scored: Vec<(String, f64)> = vocabulary
                .names
                .iter()
                .filter_map(|name| {
                    score_fn(&needle, &name.to_lowercase())
                        .filter(|score| *score >= self.config.threshold)
                        .map(|score| (name.clone(), score))
                })
                .collect();

            let Some(top) = scored.iter().map(|(_, s)| *s).reduce(f64::max) else {
                continue;
            };

            let best: Vec<(String, f64)> = scored
                .into_iter()
                .filter(|(_, s)| (top - s).abs() < 1e-9)
                .collect();

            return match self.resolve_ties(best, vocabulary) {
                Ok((canonical, score)) => MatchOutcome::Matched {
                    canonical,
                    score,
                    method,
                },
                Err(tied) => MatchOutcome::Ambiguous(tied),
            };
        }

        let mut nearest: Vec<(String, f64)> = vocabulary
            .names
            .iter()
            .map(|name| (name.clone(), Self::similarity(&needle, &name.to_lowercase())))
            .collect();
        nearest.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        MatchOutcome::NoMatch(
            nearest
                .into_iter()
                .take(self.config.max_candidates)
                .map(|(name, _)| name)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn find(matcher: &FuzzyCategoryMatcher, input: &str) -> MatchOutcome {
        let names = set(&["Food", "grocery", "futsal game", "gym", "dining", "Transport", "taxi"]);
        let groups = set(&["Food", "Transport"]);
        matcher.find(
            input,
            &Vocabulary {
                names: &names,
                groups: &groups,
            },
        )
    }

    fn canonical(outcome: MatchOutcome) -> Option<String> {
        match outcome {
            MatchOutcome::Matched { canonical, .. } => Some(canonical),
            _ => None,
        }
    }

    #[test]
    fn test_exact_match_returns_canonical_casing() {
        let matcher = FuzzyCategoryMatcher::default();
        assert_eq!(canonical(find(&matcher, "food ")), Some("Food".to_string()));
        assert_eq!(canonical(find(&matcher, "`GYM`")), Some("gym".to_string()));
        assert_eq!(canonical(find(&matcher, "'grocery'")), Some("grocery".to_string()));
    }

    #[test]
    fn test_plural_forms() {
        let matcher = FuzzyCategoryMatcher::default();
        assert_eq!(canonical(find(&matcher, "groceries")), Some("grocery".to_string()));
        assert_eq!(canonical(find(&matcher, "taxis")), Some("taxi".to_string()));
        assert!(matches!(
            find(&matcher, "gyms"),
            MatchOutcome::Matched { method: MatchMethod::Plural, .. }
        ));
    }

    #[test]
    fn test_containment_and_similarity() {
        let matcher = FuzzyCategoryMatcher::default();
        assert_eq!(canonical(find(&matcher, "futsal")), Some("futsal game".to_string()));
        assert_eq!(canonical(find(&matcher, "grocey")), Some("grocery".to_string()));
    }

    #[test]
    fn test_below_threshold_fails_with_candidates() {
        let matcher = FuzzyCategoryMatcher::default();
        match find(&matcher, "electricity") {
            MatchOutcome::NoMatch(nearest) => assert_eq!(nearest.len(), 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_ties_follow_configured_rule() {
        let names = set(&["Food", "food court"]);
        let groups = set(&["Food"]);
        let vocabulary = Vocabulary {
            names: &names,
            groups: &groups,
        };

        // "cave" is one substitution away from both.
        let tied_names = set(&["cafe", "cake"]);
        let tied = Vocabulary {
            names: &tied_names,
            groups: &groups,
        };

        let reject = FuzzyCategoryMatcher::default();
        assert_eq!(
            reject.find("cave", &tied),
            MatchOutcome::Ambiguous(vec!["cafe".to_string(), "cake".to_string()])
        );

        let alphabetical = FuzzyCategoryMatcher::new(MatcherConfig {
            tie_break: TieBreak::Alphabetical,
            threshold: 0.7,
            ..MatcherConfig::default()
        });
        assert_eq!(canonical(alphabetical.find("cave", &tied)), Some("cafe".to_string()));

        let strict = FuzzyCategoryMatcher::new(MatcherConfig {
            threshold: 0.99,
            ..MatcherConfig::default()
        });
        assert!(matches!(strict.find("foods court", &vocabulary), MatchOutcome::NoMatch(_)));
    }
}
