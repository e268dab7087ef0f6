//! Prompt contracts for the three agent stages

use super::{registry, DateRules, ToolDefinition};
use crate::models::QueryContext;

/// Sentinel the router answers with when no tool fits the question.
pub const NO_TOOL: &str = "none";

/// Date rules for one tool, written from its own temporal slots.
fn date_rules(rules: &DateRules, today: &str) -> String {
    let mut lines = Vec::new();

    if let Some(months) = rules.recent_months {
        lines.push(format!(
            "- `{months}=N` means the last N months counted back from today ({today}). Use it for \"past/last N months\"."
        ));
    }

    let comparison = rules.is_period_comparison();
    for (i, group) in rules.calendar.iter().enumerate() {
        let period = if comparison {
            format!("period {} ", i + 1)
        } else {
            String::new()
        };
        let year = group.year;
        lines.push(format!(
            "- `{year}=YYYY` filters {period}to an entire calendar year, as in \"in 2024\"."
        ));
        if let Some(month) = group.month {
            lines.push(format!(
                "- `{year}=YYYY, {month}=M` filters {period}to one month, as in \"in March 2024\"."
            ));
            if let Some(day) = group.day {
                lines.push(format!(
                    "- `{year}=YYYY, {month}=M, {day}=D` filters {period}to one day, as in \"on March 3 2024\"."
                ));
                lines.push(format!("- Never pass `{day}` without `{year}` and `{month}`."));
            }
            lines.push(format!("- Never pass `{month}` without `{year}`."));
        }
    }

    if let Some((start, end)) = rules.year_range {
        lines.push(format!(
            "- `{start}=YYYY, {end}=YYYY` filters a year range, as in \"from 2023 to 2025\"."
        ));
    }

    if comparison {
        lines.push("- Fill both periods; the earlier one usually goes first.".to_string());
    } else if rules.year_range.is_some() || rules.recent_months.is_some() {
        lines.push("- Pick only one time filter per call.".to_string());
    }
    lines.push(format!(
        "- For vague recency such as \"recently\" or \"this year\", infer from today ({today})."
    ));

    lines.join("\n")
}

/// System prompt for the router: a tool catalogue and a one-token answer.
pub fn router_prompt() -> String {
    let mut catalogue = String::new();
    for definition in registry().definitions() {
        catalogue.push_str(&format!("- {}: {}\n", definition.name, definition.description));
    }

    format!(
        "You route questions about personal expenses to exactly one analysis tool.\n\n\
         ## Tools\n{catalogue}- {none}: the question cannot be answered with these tools\n\n\
         ## Rules\n\
         1. Answer with the tool name only, as a single bare token.\n\
         2. No punctuation, no quotes, no explanation.\n\
         3. Answer `{none}` for anything that is not a question about the user's spending.",
        catalogue = catalogue,
        none = NO_TOOL,
    )
}

/// System prompt for the specialist, scoped to the one routed tool.
pub fn specialist_prompt(definition: &ToolDefinition, context: &QueryContext) -> String {
    let today = context.current_date.to_string();

    let examples: Vec<String> = definition
        .examples
        .iter()
        .map(|(question, call)| format!("Q: \"{}\"\n{}", question, call))
        .collect();

    format!(
        "You are a function call generator. Output exactly one call to `{name}`.\n\n\
         ## Context\n{metadata}\n\n\
         ## Date Rules\n{date_rules}\n\n\
         ## Function\n{signature}\n{usage}\n\n\
         ## Examples\n{examples}\n\n\
         ## Rules\n\
         1. Output only the call, in the form `{name}(key=value, ...)`.\n\
         2. Use exact category names from the context above; pick the closest one if the user's wording differs.\n\
         3. If a word such as a shop name is not a category, pass it as `remarks`.\n\
         4. No markdown, no explanation, no comments.",
        name = definition.name,
        metadata = context.metadata_block(),
        date_rules = date_rules(&definition.date_rules, &today),
        signature = definition.signature(),
        usage = definition.usage,
        examples = examples.join("\n\n"),
    )
}

/// System prompt for the summarizer.
pub fn summarizer_prompt(currency: &str) -> String {
    format!(
        "You turn an analysis result into one plain sentence answering the user's question.\n\
         Amounts are in {currency}.\n\
         Copy every number exactly as it appears in the result. Do not round, convert or recompute.\n\
         Do not add information that is not in the result.",
        currency = currency,
    )
}

pub fn summarizer_input(question: &str, value: &str) -> String {
    format!("User question: {}\nAnalysis result: {}", question, value)
}
