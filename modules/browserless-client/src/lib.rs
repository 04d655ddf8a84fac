pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

const BASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for a single `/content` render.
#[derive(Debug, Clone, Default)]
pub struct ContentOptions {
    /// Extra time the browser waits after load so client-side scripts can
    /// populate the DOM.
    pub wait_for_timeout: Option<Duration>,
    /// Only keep going once this CSS selector exists in the page.
    pub wait_for_selector: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<WaitForSelector<'a>>,
}

#[derive(Serialize)]
struct WaitForSelector<'a> {
    selector: &'a str,
}

impl<'a> ContentRequest<'a> {
    fn new(url: &'a str, options: &'a ContentOptions) -> Self {
        Self {
            url,
            wait_for_timeout: options.wait_for_timeout.map(|d| d.as_millis() as u64),
            wait_for_selector: options
                .wait_for_selector
                .as_deref()
                .map(|selector| WaitForSelector { selector }),
        }
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, token, BASE_TIMEOUT)
    }

    /// Build a client whose HTTP timeout covers `timeout` of rendering work.
    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Fetch fully-rendered HTML for `url` via the /content endpoint.
    pub async fn content(&self, url: &str, options: &ContentOptions) -> Result<String> {
        let body = ContentRequest::new(url, options);

        debug!(url, wait_ms = ?body.wait_for_timeout, "Browserless content request");

        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let html = resp.text().await?;
        if html.trim().is_empty() {
            return Err(BrowserlessError::EmptyContent {
                url: url.to_string(),
            });
        }
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_token() {
        let client = BrowserlessClient::new("http://browserless:3000/", Some("s3cret")).unwrap();
        assert_eq!(client.endpoint(), "http://browserless:3000/content?token=s3cret");
    }

    #[test]
    fn endpoint_without_token() {
        let client = BrowserlessClient::new("http://browserless:3000", None).unwrap();
        assert_eq!(client.endpoint(), "http://browserless:3000/content");
    }

    #[test]
    fn request_body_carries_wait_options() {
        let options = ContentOptions {
            wait_for_timeout: Some(Duration::from_secs(5)),
            wait_for_selector: Some(".estado-red-li".to_string()),
        };
        let body = serde_json::to_value(ContentRequest::new("https://example.org", &options)).unwrap();
        assert_eq!(body["url"], "https://example.org");
        assert_eq!(body["waitForTimeout"], 5000);
        assert_eq!(body["waitForSelector"]["selector"], ".estado-red-li");
    }

    #[test]
    fn request_body_omits_unset_options() {
        let options = ContentOptions::default();
        let body = serde_json::to_value(ContentRequest::new("https://example.org", &options)).unwrap();
        assert!(body.get("waitForTimeout").is_none());
        assert!(body.get("waitForSelector").is_none());
    }
}
