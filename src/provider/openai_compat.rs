//! OpenAI-compatible backend (mlx_lm.server, LM Studio, llama.cpp server)

use super::{http_client, ChatMessage, TextProvider};
use crate::config::SamplingConfig;
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub struct OpenAiCompatProvider {
    id: String,
    client: Client,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(id: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').trim_end_matches("/v1").to_string(),
        })
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(PipelineError::ProviderError(format!(
                "{} returned {} for /v1/models",
                self.id,
                response.status()
            )));
        }

        let models: ModelsResponse = response.json().await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = CompletionRequest {
            model,
            messages,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_tokens: sampling.max_tokens,
            stream: false,
        };

        debug!(provider = %self.id, model = %model, "Calling chat completions");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!("{} request failed: {}", self.id, e);
            PipelineError::ProviderError(format!("{} request failed: {}", self.id, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::ProviderError(format!(
                "{} returned {}: {}",
                self.id, status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            PipelineError::ProviderError(format!("{} parse error: {}", self.id, e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| PipelineError::ProviderError(format!("Empty response from {}", self.id)))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::json;

    #[tokio::test]
    async fn test_completion_and_models() {
        let app = Router::new()
            .route(
                "/v1/models",
                get(|| async { Json(json!({ "object": "list", "data": [{ "id": "mlx-community/Qwen2.5-3B" }] })) }),
            )
            .route(
                "/v1/chat/completions",
                post(|| async {
                    Json(json!({ "choices": [{ "index": 0, "message": { "role": "assistant", "content": "calculate_total\n" } }] }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // A trailing /v1 in the configured URL is tolerated.
        let provider =
            OpenAiCompatProvider::new("mlx", &format!("http://{}/v1", addr), Duration::from_secs(5)).unwrap();

        assert_eq!(provider.list_models().await.unwrap(), vec!["mlx-community/Qwen2.5-3B"]);
        let reply = provider
            .generate("mlx-community/Qwen2.5-3B", &[ChatMessage::user("hi")], &SamplingConfig::default())
            .await
            .unwrap();
        assert_eq!(reply, "calculate_total");
    }

    #[tokio::test]
    async fn test_refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            OpenAiCompatProvider::new("mlx", &format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        assert!(provider.list_models().await.is_err());
    }
}
