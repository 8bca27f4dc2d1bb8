//! Source retrieval for child application markup, scripts and stylesheets.
//!
//! Security model:
//! - Only URLs matching allowed origins can be fetched (no allowlist = any origin)
//! - Redirects only followed if they stay within the same origin
//! - No caching and no retry; a failure is reported to the caller once

use crate::error::{HostError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed for one resource.
const MAX_REDIRECTS: usize = 10;

/// Retrieves the raw text behind a URL.
#[async_trait(?Send)]
pub trait SourceFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Configuration for fetch allowlist
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Allowed origins (e.g., "https://apps.example.com"). An origin is
    /// scheme + host + port; `file://` admits local files.
    /// None = every origin allowed.
    pub allowed_origins: Option<Vec<String>>,
    /// Per-request timeout (None = no timeout)
    pub timeout_ms: Option<u64>,
}

impl FetchConfig {
    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        let Some(allowed) = &self.allowed_origins else {
            return true;
        };
        if url.scheme() == "file" {
            return allowed.iter().any(|origin| origin == "file://");
        }
        let origin = url.origin().ascii_serialization();
        allowed.iter().any(|candidate| origin == *candidate)
    }
}

/// Fetches over HTTP(S) with reqwest, and `file://` URLs from disk.
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut builder = Client::builder()
            // Redirects are followed manually so every hop is checked
            .redirect(reqwest::redirect::Policy::none());
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| HostError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn fetch_file(&self, url: &Url) -> Result<String> {
        let path = url
            .to_file_path()
            .map_err(|_| HostError::fetch(url.as_str(), "invalid file path"))?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HostError::fetch(url.as_str(), e))
    }

    async fn fetch_http(&self, original: Url) -> Result<String> {
        let mut url = original.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| HostError::fetch(url.as_str(), e))?;

            let status = response.status();

            // Handle redirects - only allow same-origin
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| HostError::fetch(url.as_str(), "redirect without location"))?;
                let next = url
                    .join(location)
                    .map_err(|e| HostError::fetch(url.as_str(), e))?;

                if next.origin() != original.origin() {
                    return Err(HostError::fetch(
                        original.as_str(),
                        format!(
                            "redirect to different origin '{}'",
                            next.origin().ascii_serialization()
                        ),
                    ));
                }
                url = next;
                continue;
            }

            if !status.is_success() {
                return Err(HostError::fetch(url.as_str(), format!("HTTP {}", status)));
            }

            return response
                .text()
                .await
                .map_err(|e| HostError::fetch(url.as_str(), e));
        }

        Err(HostError::fetch(original.as_str(), "too many redirects"))
    }
}

#[async_trait(?Send)]
impl SourceFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| HostError::fetch(url, e))?;

        if !self.config.is_origin_allowed(&parsed) {
            return Err(HostError::fetch(
                url,
                format!(
                    "origin '{}' is not in the allowlist",
                    parsed.origin().ascii_serialization()
                ),
            ));
        }

        match parsed.scheme() {
            "file" => self.fetch_file(&parsed).await,
            "http" | "https" => self.fetch_http(parsed).await,
            other => Err(HostError::fetch(url, format!("unsupported scheme '{}'", other))),
        }
    }
}

/// In-memory fetcher with optional per-URL latency.
///
/// Useful for embedding pre-bundled applications and for driving the
/// pipeline deterministically.
#[derive(Default)]
pub struct StaticFetcher {
    sources: HashMap<String, (String, Option<Duration>)>,
    requests: RefCell<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.sources.insert(url.into(), (body.into(), None));
        self
    }

    pub fn with_delay(
        mut self,
        url: impl Into<String>,
        body: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.sources.insert(url.into(), (body.into(), Some(delay)));
        self
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl SourceFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.borrow_mut().push(url.to_string());
        let (body, delay) = self
            .sources
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::fetch(url, "not found"))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(body)
    }
}
