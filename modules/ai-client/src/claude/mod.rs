mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::TextCompletion;

use client::ClaudeClient;
use types::*;

// =============================================================================
// Claude Agent
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Single-turn, deterministic completion of `user`.
    pub async fn chat_completion(&self, user: impl Into<String>) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .message(WireMessage::user(user))
            .temperature(0.0);

        let response = ClaudeClient::new(&self.api_key)?.chat(&request).await?;

        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "Claude response truncated at max_tokens");
        }

        response
            .text()
            .ok_or_else(|| anyhow!("No text response from Claude"))
    }
}

#[async_trait]
impl TextCompletion for Claude {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat_completion(prompt).await
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "claude"
    }
}
