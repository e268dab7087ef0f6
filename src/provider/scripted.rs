//! Scripted provider for development & testing
//! Keeps the pipeline runnable without a model server.

use super::{ChatMessage, TextProvider};
use crate::config::SamplingConfig;
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// Answers `generate` calls from a queue of canned replies, in order.
pub struct ScriptedProvider {
    id: String,
    models: Vec<String>,
    online: bool,
    delay: Option<Duration>,
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl ScriptedProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            models: Vec::new(),
            online: true,
            delay: None,
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Every generate call sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(mut self, text: &str) -> Self {
        self.replies.get_mut().push_back(text.to_string());
        self
    }

    /// `(model, messages)` of every generate call so far.
    pub async fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        if !self.online {
            return Err(PipelineError::ProviderError(format!("{} is offline", self.id)));
        }
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _sampling: &SamplingConfig,
    ) -> Result<String> {
        if !self.online {
            return Err(PipelineError::ProviderError(format!("{} is offline", self.id)));
        }

        self.calls
            .lock()
            .await
            .push((model.to_string(), messages.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| PipelineError::ProviderError(format!("{} has no scripted reply left", self.id)))
    }
}
