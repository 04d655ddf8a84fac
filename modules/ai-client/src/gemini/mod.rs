mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::TextCompletion;

use client::GeminiClient;
use types::*;

// =============================================================================
// Gemini Agent
// =============================================================================

#[derive(Clone)]
pub struct Gemini {
    api_key: String,
    pub(crate) model: String,
    json_response: bool,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            json_response: false,
        }
    }

    /// Ask the model to answer with `application/json` instead of free text.
    pub fn with_json_response(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub async fn generate(&self, prompt: impl Into<String>) -> Result<String> {
        let mut config = GenerationConfig::default().temperature(0.0);
        if self.json_response {
            config = config.response_mime_type("application/json");
        }
        let request = GenerateRequest::new()
            .content(Content::user(prompt))
            .generation_config(config);

        let response = GeminiClient::new(&self.api_key)?.generate(&self.model, &request).await?;

        if let Some(reason) = response.block_reason() {
            return Err(anyhow!("Gemini blocked the prompt: {}", reason));
        }

        response
            .text()
            .ok_or_else(|| anyhow!("No text response from Gemini"))
    }
}

#[async_trait]
impl TextCompletion for Gemini {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_new() {
        let ai = Gemini::new("AIza-test", "gemini-2.0-flash");
        assert_eq!(ai.model, "gemini-2.0-flash");
        assert_eq!(ai.api_key, "AIza-test");
        assert!(!ai.json_response);
    }

    #[test]
    fn test_gemini_builders() {
        let ai = Gemini::new("AIza-test", "gemini-2.0-flash").with_json_response();
        assert!(ai.json_response);
        assert_eq!(TextCompletion::provider(&ai), "gemini");
    }
}
