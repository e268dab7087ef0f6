//! Summarizer agent: tool value → one sentence
//!
//! Output is guarded: a summary that drops any number from the tool value is
//! discarded and the value is returned verbatim.

use super::InferenceCall;
use crate::models::{ExecutionResult, Stage};
use crate::provider::ChatMessage;
use crate::tools::prompts::{summarizer_input, summarizer_prompt};
use crate::Result;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Values that already read as an answer.
const SELF_DESCRIBING_PREFIXES: [&str; 2] = ["Total", "Average"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Chart,
    Disabled,
    SelfDescribing,
}

pub struct SummarizerAgent;

impl SummarizerAgent {
    /// Why the stage does not run for this result, if it doesn't.
    pub fn skip_reason(result: &ExecutionResult, enabled: bool) -> Option<SkipReason> {
        if result.chart_spec.is_some() {
            Some(SkipReason::Chart)
        } else if !enabled {
            Some(SkipReason::Disabled)
        } else if SELF_DESCRIBING_PREFIXES
            .iter()
            .any(|p| result.value.trim_start().starts_with(p))
        {
            Some(SkipReason::SelfDescribing)
        } else {
            None
        }
    }

    /// Answer used when the stage is skipped.
    pub fn skipped_answer(result: &ExecutionResult, reason: SkipReason) -> String {
        match reason {
            SkipReason::Chart => format!("Chart ready. {}", result.value),
            SkipReason::Disabled | SkipReason::SelfDescribing => result.value.clone(),
        }
    }

    pub async fn summarize(
        &self,
        question: &str,
        value: &str,
        currency: &str,
        call: &InferenceCall<'_>,
    ) -> Result<String> {
        let messages = [
            ChatMessage::system(summarizer_prompt(currency)),
            ChatMessage::user(summarizer_input(question, value)),
        ];
        let summary = call.generate(Stage::Summarizing, &messages).await?;
        Ok(Self::guard(value, summary.trim()))
    }

    /// Keep the summary only if it reproduces every number of the value and
    /// adds none of its own.
    pub fn guard(value: &str, summary: &str) -> String {
        let missing = missing_numbers(value, summary);
        let invented = invented_numbers(value, summary);
        if summary.is_empty() || !missing.is_empty() || !invented.is_empty() {
            warn!(
                missing = ?missing,
                invented = ?invented,
                summary = %summary,
                "Summary changed the numbers, returning tool value verbatim"
            );
            return value.to_string();
        }
        debug!("Summary kept");
        summary.to_string()
    }
}

/// Numbers of `value` that `summary` does not contain, separators ignored.
pub fn missing_numbers(value: &str, summary: &str) -> Vec<String> {
    let present: HashSet<String> = numeric_tokens(summary).into_iter().collect();
    unique(numeric_tokens(value), |n| !present.contains(n))
}

/// Numbers of `summary` that do not occur in `value`. Parts of the value's
/// date words (`2025-01` gives `2025`, `01`, `1`) count as occurring.
pub fn invented_numbers(value: &str, summary: &str) -> Vec<String> {
    let mut allowed: HashSet<String> = numeric_tokens(value).into_iter().collect();
    allowed.extend(date_parts(value));
    unique(numeric_tokens(summary), |n| !allowed.contains(n))
}

/// Tokens passing `keep`, first occurrence only.
fn unique(tokens: Vec<String>, keep: impl Fn(&String) -> bool) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|n| keep(n) && seen.insert(n.clone()))
        .collect()
}

fn date_parts(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_ascii_digit());
        if !is_date_word(trimmed) {
            continue;
        }
        for part in trimmed.split('-') {
            parts.push(part.to_string());
            let short = part.trim_start_matches('0');
            if !short.is_empty() && short != part {
                parts.push(short.to_string());
            }
        }
    }
    parts
}

/// Numeric runs like `7,300`, `0.0123` or `3`, with commas removed.
/// Date words (`2025-01`, `2025-01-15`) are skipped so a summary may spell them out.
fn numeric_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_ascii_digit());
        if is_date_word(trimmed) {
            continue;
        }

        let chars: Vec<char> = word.chars().collect();
        let mut current = String::new();
        for (i, c) in chars.iter().enumerate() {
            let joins_digits = matches!(c, ',' | '.')
                && !current.is_empty()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_digit() {
                current.push(*c);
            } else if joins_digits {
                if *c == '.' {
                    current.push('.');
                }
            } else if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

fn is_date_word(word: &str) -> bool {
    let parts: Vec<&str> = word.split('-').collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chart::{ChartKind, ChartSpec};
    use crate::models::ExecutionSource;

    fn result(value: &str, chart: bool) -> ExecutionResult {
        ExecutionResult {
            value: value.to_string(),
            scalar: None,
            chart_spec: chart.then(|| ChartSpec::new(ChartKind::Bar, "t")),
            source: ExecutionSource::Embedded,
        }
    }

    #[test]
    fn test_numeric_tokens() {
        assert_eq!(
            numeric_tokens("grocery in 2025-01: ¥7,300 (n=2, avg ¥3,650)"),
            vec!["7300", "2", "3650"]
        );
        assert_eq!(numeric_tokens("p=0.0123, d=-0.543."), vec!["0.0123", "0.543"]);
    }

    #[test]
    fn test_guard_keeps_faithful_summary() {
        let value = "grocery in 2025: Mean ¥3,033, Median ¥3,200, Std Dev ¥1,159 (n=3)";
        let summary = "Across 3 grocery purchases in 2025 the mean was ¥3,033, the median ¥3,200 and the standard deviation ¥1,159.";
        assert_eq!(SummarizerAgent::guard(value, summary), summary);
    }

    #[test]
    fn test_guard_falls_back_when_a_number_changes() {
        let value = "grocery in 2025: Mean ¥3,033, Median ¥3,200, Std Dev ¥1,159 (n=3)";
        let rounded = "You spent about ¥3,000 on average across 3 purchases.";
        assert_eq!(SummarizerAgent::guard(value, rounded), value);
        assert_eq!(SummarizerAgent::guard(value, ""), value);
    }

    #[test]
    fn test_guard_falls_back_when_a_number_is_added() {
        let value = "grocery in 2025: Mean ¥3,033, Median ¥3,200, Std Dev ¥1,159 (n=3)";
        let padded = "Across 3 purchases in 2025 the mean was ¥3,033, the median ¥3,200 and the \
                      standard deviation ¥1,159, about ¥9,099 in total.";
        assert_eq!(invented_numbers(value, padded), vec!["9099"]);
        assert_eq!(SummarizerAgent::guard(value, padded), value);
    }

    #[test]
    fn test_guard_allows_spelled_out_dates() {
        let value = "grocery in 2025-01: ¥7,300 (n=2, avg ¥3,650)";
        let summary = "In January 2025 you spent ¥7,300 on groceries over 2 purchases, ¥3,650 on average.";
        assert!(invented_numbers(value, summary).is_empty());
        assert_eq!(SummarizerAgent::guard(value, summary), summary);
    }

    #[test]
    fn test_reported_numbers_are_unique() {
        let value = "¥1,200 then ¥500 then ¥1,200 again";
        assert_eq!(missing_numbers(value, "nothing"), vec!["1200", "500"]);
        assert_eq!(invented_numbers("¥1", "¥2 and ¥3 and ¥2"), vec!["2", "3"]);
    }

    #[test]
    fn test_skip_rules() {
        assert_eq!(SummarizerAgent::skip_reason(&result("x", true), true), Some(SkipReason::Chart));
        assert_eq!(
            SummarizerAgent::skip_reason(&result("Total in 2025: ¥1", false), true),
            Some(SkipReason::SelfDescribing)
        );
        assert_eq!(SummarizerAgent::skip_reason(&result("grocery ...", false), false), Some(SkipReason::Disabled));
        assert_eq!(SummarizerAgent::skip_reason(&result("grocery ...", false), true), None);
        assert!(SummarizerAgent::skipped_answer(&result("Top 3", true), SkipReason::Chart).ends_with("Top 3"));
    }
}
