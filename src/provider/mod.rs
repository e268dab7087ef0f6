//! Local inference backends
//!
//! Every backend speaks plain chat completion behind `TextProvider`. The
//! registry does the pre-flight check that picks a reachable backend for a
//! stage before any inference runs.

pub mod ollama;
pub mod openai_compat;
pub mod scripted;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use scripted::ScriptedProvider;

use crate::config::{EngineConfig, ProviderModel, SamplingConfig, StageSelection};
use crate::error::PipelineError;
use crate::models::Stage;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A local inference backend serving one or more models.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<String>>;

    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<String>;
}

/// Reachability and models of one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub provider: String,
    pub online: bool,
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A backend chosen for a stage, ready to generate.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub provider: Arc<dyn TextProvider>,
    pub choice: ProviderModel,
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TextProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Ollama and, when configured, an OpenAI-compatible server registered as `mlx`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let timeout = config.pipeline.inference_timeout();
        let mut registry = Self::new();

        if let Some(url) = &config.ollama_base_url {
            registry.register(Arc::new(OllamaProvider::new(url, timeout)?));
        }
        if let Some(url) = &config.mlx_base_url {
            registry.register(Arc::new(OpenAiCompatProvider::new("mlx", url, timeout)?));
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn TextProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TextProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn status(&self, id: &str) -> Result<BackendStatus> {
        let provider = self
            .get(id)
            .ok_or_else(|| PipelineError::ProviderError(format!("unknown provider '{}'", id)))?;
        Ok(check_backend(provider.as_ref()).await)
    }

    /// Status of every backend. Fails only when none of them is reachable.
    pub async fn list_all(&self) -> Result<Vec<BackendStatus>> {
        let mut statuses = Vec::new();
        for id in self.ids() {
            if let Some(provider) = self.get(id) {
                statuses.push(check_backend(provider.as_ref()).await);
            }
        }

        if !statuses.iter().any(|s| s.online) {
            return Err(PipelineError::ProviderUnavailable {
                stage: None,
                tried: statuses.into_iter().map(|s| s.provider).collect(),
            });
        }

        Ok(statuses)
    }

    /// Pre-flight check: first reachable candidate of a stage selection.
    pub async fn resolve(&self, stage: Stage, selection: &StageSelection) -> Result<ResolvedProvider> {
        let mut tried = Vec::new();

        for candidate in selection.candidates() {
            tried.push(format!("{}/{}", candidate.provider, candidate.model));

            let Some(provider) = self.get(&candidate.provider) else {
                warn!(stage = %stage, provider = %candidate.provider, "Provider not registered");
                continue;
            };

            match provider.list_models().await {
                Ok(models) => {
                    if !models.iter().any(|m| m == &candidate.model) {
                        warn!(
                            stage = %stage,
                            provider = %candidate.provider,
                            model = %candidate.model,
                            "Model not listed by provider, trying anyway"
                        );
                    }
                    info!(stage = %stage, provider = %candidate.provider, model = %candidate.model, "Provider selected");
                    return Ok(ResolvedProvider {
                        provider,
                        choice: candidate,
                    });
                }
                Err(e) => {
                    warn!(stage = %stage, provider = %candidate.provider, error = %e, "Provider offline");
                }
            }
        }

        Err(PipelineError::ProviderUnavailable {
            stage: Some(stage),
            tried,
        })
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn check_backend(provider: &dyn TextProvider) -> BackendStatus {
    match provider.list_models().await {
        Ok(models) => BackendStatus {
            provider: provider.id().to_string(),
            online: true,
            models,
            error: None,
        },
        Err(e) => BackendStatus {
            provider: provider.id().to_string(),
            online: false,
            models: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}

/// HTTP client shared by the real backends.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .build()?)
}
