//! The three model-backed stages: router, specialist, summarizer
//!
//! Each agent builds its prompt, calls the resolved provider once and
//! interprets the reply. Interpretation is pure and tested without a model.

pub mod router;
pub mod specialist;
pub mod summarizer;

pub use router::{Route, RouterAgent};
pub use specialist::SpecialistAgent;
pub use summarizer::SummarizerAgent;

use crate::config::SamplingConfig;
use crate::error::PipelineError;
use crate::models::Stage;
use crate::provider::{ChatMessage, ResolvedProvider};
use crate::Result;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How an agent reaches its model.
#[derive(Clone)]
pub struct InferenceCall<'a> {
    pub provider: &'a ResolvedProvider,
    pub sampling: &'a SamplingConfig,
    pub timeout: Duration,
}

impl<'a> InferenceCall<'a> {
    /// One bounded generate call. Timeouts and provider errors fail the stage.
    pub async fn generate(&self, stage: Stage, messages: &[ChatMessage]) -> Result<String> {
        let start = Instant::now();
        let choice = &self.provider.choice;

        let reply = tokio::time::timeout(
            self.timeout,
            self.provider
                .provider
                .generate(&choice.model, messages, self.sampling),
        )
        .await
        .map_err(|_| {
            warn!(stage = %stage, provider = %choice.provider, "Inference timed out");
            PipelineError::InferenceFailed {
                stage,
                reason: format!("timed out after {}s", self.timeout.as_secs_f32()),
            }
        })?
        .map_err(|e| PipelineError::InferenceFailed {
            stage,
            reason: e.to_string(),
        })?;

        debug!(
            stage = %stage,
            provider = %choice.provider,
            model = %choice.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Inference complete"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderModel;
    use crate::provider::ScriptedProvider;
    use std::sync::Arc;

    fn resolved(provider: ScriptedProvider) -> ResolvedProvider {
        ResolvedProvider {
            provider: Arc::new(provider),
            choice: ProviderModel {
                provider: "scripted".to_string(),
                model: "m".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_timeout_fails_the_stage() {
        let provider = resolved(
            ScriptedProvider::new("scripted")
                .with_delay(Duration::from_millis(200))
                .reply("late"),
        );
        let sampling = SamplingConfig::default();
        let call = InferenceCall {
            provider: &provider,
            sampling: &sampling,
            timeout: Duration::from_millis(20),
        };

        match call.generate(Stage::Router, &[ChatMessage::user("q")]).await {
            Err(PipelineError::InferenceFailed { stage, reason }) => {
                assert_eq!(stage, Stage::Router);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_error_becomes_inference_failure() {
        let provider = resolved(ScriptedProvider::new("scripted"));
        let sampling = SamplingConfig::default();
        let call = InferenceCall {
            provider: &provider,
            sampling: &sampling,
            timeout: Duration::from_secs(1),
        };

        assert!(matches!(
            call.generate(Stage::Specialist, &[]).await,
            Err(PipelineError::InferenceFailed { stage: Stage::Specialist, .. })
        ));
    }
}
