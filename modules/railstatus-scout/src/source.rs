use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use scraper::{Html, Selector};
use tracing::{info, warn};

use railstatus_common::{Config, SourceConfig};

use crate::traits::StatusSource;

// --- PageFetcher trait ---

/// Returns the rendered DOM of a page, after client-side scripts have run.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
    fn name(&self) -> &str;
}

// --- Headless Chrome ---

/// Max retry attempts for transient Chrome failures (e.g. "Cannot fork").
const CHROME_MAX_ATTEMPTS: u32 = 3;
/// Base backoff duration for Chrome retries. Actual delay is base * 3^attempt + jitter.
const CHROME_RETRY_BASE: Duration = Duration::from_secs(3);
/// Budget for one Chrome process, on top of the render wait.
const CHROME_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runs headless Chromium with `--dump-dom`. `--virtual-time-budget` lets the
/// page's scripts run for the render wait before the DOM is serialized.
pub struct ChromeFetcher {
    chrome_bin: String,
    render_wait: Duration,
}

impl ChromeFetcher {
    pub fn new(chrome_bin: Option<&str>, render_wait: Duration) -> Self {
        let chrome_bin = chrome_bin.unwrap_or("chromium").to_string();
        info!(chrome_bin, "Using headless Chrome");
        Self {
            chrome_bin,
            render_wait,
        }
    }

    fn backoff(attempt: u32) -> Duration {
        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
        CHROME_RETRY_BASE * 3u32.pow(attempt) + jitter
    }

    async fn run_chrome(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = url::Url::parse(url).context("Invalid URL")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("Only http/https URLs are allowed, got: {}", parsed.scheme());
        }

        let budget = format!("--virtual-time-budget={}", self.render_wait.as_millis());
        let user_agent = format!("--user-agent={USER_AGENT}");
        let timeout = CHROME_TIMEOUT + self.render_wait;

        for attempt in 0..CHROME_MAX_ATTEMPTS {
            let last_attempt = attempt + 1 == CHROME_MAX_ATTEMPTS;
            let tmp_dir = tempfile::tempdir().context("Failed to create temp profile dir")?;

            let result = tokio::time::timeout(
                timeout,
                tokio::process::Command::new(&self.chrome_bin)
                    .args([
                        "--headless",
                        "--no-sandbox",
                        "--disable-gpu",
                        "--disable-dev-shm-usage",
                        "--window-size=1920,1080",
                        &user_agent,
                        &budget,
                        &format!("--user-data-dir={}", tmp_dir.path().display()),
                        "--dump-dom",
                        url,
                    ])
                    .kill_on_drop(true)
                    .output(),
            )
            .await;

            let reason = match result {
                Ok(Ok(output)) if output.status.success() => {
                    if !output.stdout.is_empty() {
                        return Ok(output.stdout);
                    }
                    "Chrome returned empty DOM".to_string()
                }
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let transient = stderr.contains("Cannot fork")
                        || stderr.contains("Resource temporarily unavailable");
                    if !transient {
                        anyhow::bail!("Chrome exited with {} for {url}: {}", output.status, stderr.trim());
                    }
                    "Chrome cannot fork".to_string()
                }
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    if !(msg.contains("Cannot fork")
                        || msg.contains("Resource temporarily unavailable"))
                    {
                        anyhow::bail!("Failed to run Chrome for {url}: {e}");
                    }
                    format!("Chrome launch failed: {e}")
                }
                Err(_) => format!("Chrome timed out after {}s", timeout.as_secs()),
            };

            if last_attempt {
                anyhow::bail!("{reason} for {url} after {CHROME_MAX_ATTEMPTS} attempts");
            }

            let backoff = Self::backoff(attempt);
            warn!(
                url,
                attempt = attempt + 1,
                backoff_secs = backoff.as_secs(),
                reason = %reason,
                "Retrying Chrome after backoff"
            );
            tokio::time::sleep(backoff).await;
        }

        anyhow::bail!("Chrome produced no DOM for {url}")
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        info!(url, fetcher = "chrome", "Rendering page");
        let dom = self.run_chrome(url).await?;
        Ok(String::from_utf8_lossy(&dom).into_owned())
    }

    fn name(&self) -> &str {
        "chrome"
    }
}

// --- Browserless ---

pub struct BrowserlessFetcher {
    client: browserless_client::BrowserlessClient,
    options: browserless_client::ContentOptions,
}

impl BrowserlessFetcher {
    pub fn new(base_url: &str, token: Option<&str>, render_wait: Duration) -> Result<Self> {
        info!(base_url, "Using Browserless");
        let client = browserless_client::BrowserlessClient::with_timeout(
            base_url,
            token,
            CHROME_TIMEOUT + render_wait,
        )
        .context("Failed to build Browserless client")?;
        Ok(Self {
            client,
            options: browserless_client::ContentOptions {
                wait_for_timeout: Some(render_wait),
                wait_for_selector: None,
            },
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        info!(url, fetcher = "browserless", "Rendering page");
        let html = self
            .client
            .content(url, &self.options)
            .await
            .context("Browserless content request failed")?;
        info!(url, fetcher = "browserless", bytes = html.len(), "Page rendered");
        Ok(html)
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

/// Browserless when `BROWSERLESS_URL` is set, local Chrome otherwise.
pub fn fetcher_from_config(config: &Config) -> Result<Box<dyn PageFetcher>> {
    let render_wait = Duration::from_millis(config.file.source.render_wait_ms);
    let secrets = &config.secrets;
    match secrets.browserless_url.as_deref() {
        Some(base_url) => Ok(Box::new(BrowserlessFetcher::new(
            base_url,
            secrets.browserless_token.as_deref(),
            render_wait,
        )?)),
        None => Ok(Box::new(ChromeFetcher::new(
            secrets.chrome_bin.as_deref(),
            render_wait,
        ))),
    }
}

// --- Extraction ---

/// Text of every element matching `selector`, in document order.
///
/// Text nodes are trimmed and joined with single spaces. Items with
/// `min_chars` characters or fewer are dropped.
pub fn extract_status_items(html: &str, selector: &str, min_chars: usize) -> Result<Vec<String>> {
    let selector = Selector::parse(selector)
        .map_err(|e| anyhow::anyhow!("Invalid selector {selector:?}: {e:?}"))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .map(|element| {
            element
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| text.chars().count() > min_chars)
        .collect())
}

// --- StatusSource ---

/// The status page, rendered by a [`PageFetcher`] and cut into incident texts.
pub struct StatusPageSource {
    fetcher: Box<dyn PageFetcher>,
    url: String,
    selector: String,
    min_chars: usize,
}

impl StatusPageSource {
    pub fn new(fetcher: Box<dyn PageFetcher>, source: &SourceConfig) -> Self {
        Self {
            fetcher,
            url: source.url.clone(),
            selector: source.selector.clone(),
            min_chars: source.min_chars,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(fetcher_from_config(config)?, &config.file.source))
    }
}

#[async_trait]
impl StatusSource for StatusPageSource {
    async fn fetch_items(&self) -> Result<Vec<String>> {
        let html = self
            .fetcher
            .fetch_html(&self.url)
            .await
            .with_context(|| format!("{} could not render {}", self.fetcher.name(), self.url))?;
        let items = extract_status_items(&html, &self.selector, self.min_chars)?;
        info!(url = %self.url, items = items.len(), "Status items extracted");
        Ok(items)
    }
}
