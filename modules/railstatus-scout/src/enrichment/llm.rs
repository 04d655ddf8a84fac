use ai_client::{strip_code_blocks, truncate_to_char_boundary, Claude, Gemini, TextCompletion};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use railstatus_common::{Config, Enrichment, EnrichmentProvider};

use super::prompt::build_prompt;
use super::EnrichmentError;
use crate::traits::IncidentEnricher;

/// Incident texts longer than this are cut before prompting.
const MAX_INCIDENT_BYTES: usize = 8_000;

/// Enricher backed by any text-completion model.
pub struct LlmEnricher {
    model: Box<dyn TextCompletion>,
}

impl LlmEnricher {
    pub fn new(model: Box<dyn TextCompletion>) -> Self {
        Self { model }
    }

    /// Build the enricher for the configured provider.
    /// Returns `None` when the provider's credential is not set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.enrichment_api_key()?;
        let settings = &config.file.enrichment;
        let model_name = settings.model_name();

        let model: Box<dyn TextCompletion> = match settings.provider {
            EnrichmentProvider::Gemini => {
                Box::new(Gemini::new(api_key, model_name).with_json_response())
            }
            EnrichmentProvider::Claude => Box::new(Claude::new(api_key, model_name)),
        };

        info!(
            provider = model.provider(),
            model = model.model(),
            "Enrichment enabled"
        );
        Some(Self::new(model))
    }
}

#[async_trait]
impl IncidentEnricher for LlmEnricher {
    async fn enrich(&self, raw_text: &str) -> Result<Enrichment, EnrichmentError> {
        let text = truncate_to_char_boundary(raw_text, MAX_INCIDENT_BYTES);
        let prompt = build_prompt(text, Utc::now().date_naive());

        let response = self
            .model
            .complete(&prompt)
            .await
            .map_err(EnrichmentError::Request)?;
        debug!(bytes = response.len(), "Model response received");

        parse_enrichment(&response)
    }
}

/// Turn a raw model response into an enrichment.
///
/// Code fences are stripped. The remainder must be a single JSON object;
/// missing or null fields are fine, a non-object is not.
pub fn parse_enrichment(response: &str) -> Result<Enrichment, EnrichmentError> {
    let body = strip_code_blocks(response).trim();
    if body.is_empty() {
        return Err(EnrichmentError::EmptyResponse);
    }

    let value: Value = serde_json::from_str(body).map_err(EnrichmentError::Parse)?;
    let kind = match &value {
        Value::Object(_) => None,
        Value::Null => Some("null"),
        Value::Bool(_) => Some("boolean"),
        Value::Number(_) => Some("number"),
        Value::String(_) => Some("string"),
        Value::Array(_) => Some("array"),
    };
    if let Some(kind) = kind {
        return Err(EnrichmentError::NotAnObject { kind });
    }

    serde_json::from_value(value).map_err(EnrichmentError::Schema)
}
