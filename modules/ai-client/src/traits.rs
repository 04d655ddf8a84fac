use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// TextCompletion Trait
// =============================================================================

/// A single-turn completion: one prompt in, the model's text out.
///
/// Implemented by every provider so callers can hold a
/// `Box<dyn TextCompletion>` and stay provider-agnostic.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Send `prompt` as the only user message and return the first text block.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Provider name, for logging.
    fn provider(&self) -> &'static str;
}
