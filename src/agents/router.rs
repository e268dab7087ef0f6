//! Router agent: question → one tool name

use super::InferenceCall;
use crate::error::PipelineError;
use crate::models::{QueryContext, Stage};
use crate::provider::ChatMessage;
use crate::tools::prompts::{router_prompt, NO_TOOL};
use crate::tools::ToolKind;
use crate::Result;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tool(ToolKind),
    /// No registered tool can answer the question.
    NoTool,
}

pub struct RouterAgent;

impl RouterAgent {
    pub async fn route(&self, context: &QueryContext, call: &InferenceCall<'_>) -> Result<Route> {
        let messages = [
            ChatMessage::system(router_prompt()),
            ChatMessage::user(context.raw_question.clone()),
        ];
        let raw = call.generate(Stage::Router, &messages).await?;
        let route = Self::interpret(&raw)?;

        info!(raw = %raw.trim(), route = ?route, "Router decided");
        Ok(route)
    }

    /// Normalize the reply and require an exact registered name.
    pub fn interpret(raw: &str) -> Result<Route> {
        let normalized = Self::normalize(raw);

        if normalized == NO_TOOL {
            return Ok(Route::NoTool);
        }

        ToolKind::from_name(&normalized)
            .map(Route::Tool)
            .ok_or_else(|| PipelineError::RouterMismatch {
                raw: raw.to_string(),
            })
    }

    /// Trim, strip wrapping backticks/quotes and a trailing period, case-fold.
    pub fn normalize(raw: &str) -> String {
        raw.trim()
            .trim_end_matches('.')
            .trim_matches(|c| c == '`' || c == '\'' || c == '"')
            .trim()
            .trim_end_matches('.')
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_wrapping_noise() {
        assert_eq!(
            RouterAgent::interpret("  `Calculate_Total`.\n").unwrap(),
            Route::Tool(ToolKind::CalculateTotal)
        );
        assert_eq!(
            RouterAgent::interpret("\"plot_comparison_bars\"").unwrap(),
            Route::Tool(ToolKind::PlotComparisonBars)
        );
        assert_eq!(RouterAgent::interpret("None").unwrap(), Route::NoTool);
    }

    #[test]
    fn test_anything_else_is_a_mismatch_with_raw_output() {
        for raw in ["calculate total", "I would use calculate_total", "plot", ""] {
            match RouterAgent::interpret(raw) {
                Err(PipelineError::RouterMismatch { raw: carried }) => assert_eq!(carried, raw),
                other => panic!("{:?} gave {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_every_registered_name_routes() {
        for kind in ToolKind::ALL {
            assert_eq!(RouterAgent::interpret(kind.name()).unwrap(), Route::Tool(kind));
        }
    }
}
