use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_STATUS_URL: &str = "https://www.adif.es/viajeros/estado-de-la-red";
pub const DEFAULT_STATUS_SELECTOR: &str = ".estado-red-li";

// ---------------------------------------------------------------------------
// FileConfig (TOML)
// ---------------------------------------------------------------------------

/// TOML-backed configuration. Every section is optional; secrets stay in env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Status page to scrape.
    pub url: String,
    /// CSS selector for one incident entry.
    pub selector: String,
    /// Entries with this many characters or fewer are dropped as noise.
    pub min_chars: usize,
    /// Time to let client-side scripts render before the DOM is captured.
    pub render_wait_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STATUS_URL.to_string(),
            selector: DEFAULT_STATUS_SELECTOR.to_string(),
            min_chars: 10,
            render_wait_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub history_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from("historico_incidencias.json"),
            snapshot_path: PathBuf::from("incidencias.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentProvider {
    #[default]
    Gemini,
    Claude,
}

impl EnrichmentProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            EnrichmentProvider::Gemini => "gemini-2.0-flash",
            EnrichmentProvider::Claude => "claude-haiku-4-5-20251001",
        }
    }

    pub fn api_key_var(self) -> &'static str {
        match self {
            EnrichmentProvider::Gemini => "GEMINI_API_KEY",
            EnrichmentProvider::Claude => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichmentConfig {
    pub provider: EnrichmentProvider,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    /// Re-enrich records still being observed once their enrichment is
    /// older than this. Unset means an enrichment is never refreshed.
    pub refresh_after_hours: Option<u64>,
}

impl EnrichmentConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

impl FileConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FileConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.source.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.source.url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                url: self.source.url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if self.source.selector.trim().is_empty() {
            return Err(ConfigError::Invalid("source.selector is empty".to_string()));
        }
        if self.storage.history_path == self.storage.snapshot_path {
            return Err(ConfigError::Invalid(
                "storage.history_path and storage.snapshot_path must differ".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Secrets (env)
// ---------------------------------------------------------------------------

/// Credentials and deployment endpoints read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub chrome_bin: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            browserless_url: optional_env("BROWSERLESS_URL"),
            browserless_token: optional_env("BROWSERLESS_TOKEN"),
            chrome_bin: optional_env("CHROME_BIN"),
        }
    }

    pub fn api_key_for(&self, provider: EnrichmentProvider) -> Option<&str> {
        match provider {
            EnrichmentProvider::Gemini => self.gemini_api_key.as_deref(),
            EnrichmentProvider::Claude => self.anthropic_api_key.as_deref(),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: FileConfig,
    pub secrets: Secrets,
}

impl Config {
    pub fn new(file: FileConfig, secrets: Secrets) -> Self {
        Self { file, secrets }
    }

    /// Credential for the configured enrichment provider, if any.
    pub fn enrichment_api_key(&self) -> Option<&str> {
        self.secrets.api_key_for(self.file.enrichment.provider)
    }

    pub fn log_redacted(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let n = v.chars().count().min(5);
                    let head: String = v.chars().take(n).collect();
                    format!("{}...({} chars)", head, v.chars().count())
                }
                None => "<not set>".to_string(),
            }
        }

        let enrichment = &self.file.enrichment;
        tracing::info!("Config loaded:");
        tracing::info!("  source.url: {}", self.file.source.url);
        tracing::info!("  source.selector: {}", self.file.source.selector);
        tracing::info!("  storage.history_path: {}", self.file.storage.history_path.display());
        tracing::info!("  storage.snapshot_path: {}", self.file.storage.snapshot_path.display());
        tracing::info!(
            "  enrichment: {:?} / {} (refresh_after_hours: {:?})",
            enrichment.provider,
            enrichment.model_name(),
            enrichment.refresh_after_hours
        );
        tracing::info!("  GEMINI_API_KEY: {}", preview_opt(&self.secrets.gemini_api_key));
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.secrets.anthropic_api_key));
        tracing::info!("  BROWSERLESS_URL: {}", preview_opt(&self.secrets.browserless_url));
        tracing::info!("  CHROME_BIN: {}", preview_opt(&self.secrets.chrome_bin));
    }
}
