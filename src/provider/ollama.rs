//! Ollama backend (`/api/chat`, `/api/tags`)

use super::{http_client, ChatMessage, TextProvider};
use crate::config::SamplingConfig;
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(PipelineError::ProviderError(format!(
                "Ollama returned {} for /api/tags",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request = ChatRequest {
            model,
            messages,
            stream: false,
            options: Options {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
                num_predict: sampling.max_tokens,
            },
        };

        debug!(model = %model, "Calling Ollama");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!("Ollama request failed: {}", e);
            PipelineError::ProviderError(format!("Ollama request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama error response: {}", error_text);
            return Err(PipelineError::ProviderError(format!(
                "Ollama returned {}: {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            PipelineError::ProviderError(format!("Ollama parse error: {}", e))
        })?;

        Ok(chat.message.content.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<TagModel>>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
