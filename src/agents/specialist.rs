//! Specialist agent: question + routed tool → one invocation expression

use super::InferenceCall;
use crate::error::PipelineError;
use crate::invocation;
use crate::models::{QueryContext, Stage, ToolInvocation};
use crate::provider::ChatMessage;
use crate::tools::prompts::specialist_prompt;
use crate::tools::ToolKind;
use crate::Result;
use tracing::{debug, info};

/// Assignment prefixes a model sometimes copies from notebook-style examples.
const ASSIGNMENT_PREFIXES: [&str; 3] = ["fig, result =", "result =", "fig ="];

pub struct SpecialistAgent;

impl SpecialistAgent {
    pub async fn extract(
        &self,
        tool: ToolKind,
        context: &QueryContext,
        call: &InferenceCall<'_>,
    ) -> Result<ToolInvocation> {
        let messages = [
            ChatMessage::system(specialist_prompt(tool.definition(), context)),
            ChatMessage::user(context.raw_question.clone()),
        ];
        let raw = call.generate(Stage::Specialist, &messages).await?;
        debug!(raw = %raw, "Specialist reply");

        let invocation = Self::interpret(tool, &raw)?;
        info!(invocation = %invocation, "Specialist extracted invocation");
        Ok(invocation)
    }

    /// Strip wrapping noise, parse strictly, and check the name matches the route.
    pub fn interpret(tool: ToolKind, raw: &str) -> Result<ToolInvocation> {
        let expression = Self::strip_noise(raw);

        let parsed = invocation::parse(expression).map_err(|e| match e {
            PipelineError::SpecialistParseError { reason, .. } => PipelineError::SpecialistParseError {
                raw: raw.to_string(),
                reason,
            },
            other => other,
        })?;

        if parsed.name != tool.name() {
            return Err(PipelineError::SpecialistParseError {
                raw: raw.to_string(),
                reason: format!("expected a call to {}, got {}", tool.name(), parsed.name),
            });
        }

        let mut invocation = ToolInvocation::new(tool);
        for (key, value) in parsed.arguments {
            invocation = invocation.with_arg(&key, value);
        }
        Ok(invocation)
    }

    fn strip_noise(raw: &str) -> &str {
        let mut text = raw.trim();

        if let Some(start) = text.find("```") {
            let after = &text[start + 3..];
            let body = after.find('\n').map_or(after, |nl| {
                let tag = &after[..nl];
                if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
                    &after[nl + 1..]
                } else {
                    after
                }
            });
            text = body.find("```").map_or(body, |end| &body[..end]).trim();
        }

        text = text.trim_matches('`').trim();

        for prefix in ASSIGNMENT_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim();
                break;
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArgValue;

    #[test]
    fn test_plain_call() {
        let invocation = SpecialistAgent::interpret(
            ToolKind::CalculateTotal,
            r#"calculate_total(category="grocery", year=2025, month=1)"#,
        )
        .unwrap();
        assert_eq!(invocation.arguments["category"], ArgValue::Str("grocery".to_string()));
        assert_eq!(invocation.arguments["month"], ArgValue::Int(1));
    }

    #[test]
    fn test_wrapping_noise_is_stripped() {
        let cases = [
            "```python\nfig, result = calculate_total(year=2025)\n```",
            "```\ncalculate_total(year=2025)\n```",
            "`calculate_total(year=2025)`",
            "result = calculate_total(year=2025)",
        ];
        for raw in cases {
            let invocation = SpecialistAgent::interpret(ToolKind::CalculateTotal, raw).unwrap();
            assert_eq!(invocation.arguments["year"], ArgValue::Int(2025), "{}", raw);
        }
    }

    #[test]
    fn test_malformed_and_mismatched_calls_keep_raw_output() {
        let raw = "calculate_total(year=2025";
        match SpecialistAgent::interpret(ToolKind::CalculateTotal, raw) {
            Err(PipelineError::SpecialistParseError { raw: carried, .. }) => assert_eq!(carried, raw),
            other => panic!("unexpected: {:?}", other),
        }

        let raw = "plot_distribution(year=2025)";
        match SpecialistAgent::interpret(ToolKind::CalculateTotal, raw) {
            Err(PipelineError::SpecialistParseError { raw: carried, reason }) => {
                assert_eq!(carried, raw);
                assert!(reason.contains("plot_distribution"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
