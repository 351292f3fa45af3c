//! HTTP fetching for listing pages, detail pages and JSON endpoints.
//!
//! One GET per resource: a fixed connect/read timeout, the site's header set,
//! and no retries. Transport failures, non-2xx statuses and anti-bot
//! interstitials all come back as a [`FetchError`] for the collector to
//! recover from.

use crate::config::HttpConfig;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};

/// Signatures of interstitial challenge pages served instead of content.
/// Widgets and scripts that also appear on ordinary pages (captcha forms,
/// injected challenge-platform scripts) are not listed.
const INTERSTITIAL_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "<title>Just a moment...</title>",
    "Attention Required! | Cloudflare",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} was blocked: {reason}")]
    Blocked { url: String, reason: String },

    #[error("invalid {name} header value: {source}")]
    InvalidHeader {
        name: &'static str,
        #[source]
        source: InvalidHeaderValue,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("JSON deserialization error for {url}: {source}")]
    Deserialize {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a response looks like an anti-bot block, if it does.
pub fn detect_block(status: StatusCode, body: &str) -> Option<String> {
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        return Some(format!("HTTP {}", status.as_u16()));
    }
    INTERSTITIAL_MARKERS
        .iter()
        .find(|marker| body.contains(*marker))
        .map(|marker| format!("challenge page ({marker})"))
}

/// A configured client for one site.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    /// Build a client with the site's timeout, user agent and accept headers.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidHeader`] for header values that are not valid
    /// HTTP, [`FetchError::Client`] if the TLS backend cannot be initialized.
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(accept) = &config.accept {
            headers.insert(ACCEPT, header_value("Accept", accept)?);
        }
        if let Some(lang) = &config.accept_language {
            headers.insert(ACCEPT_LANGUAGE, header_value("Accept-Language", lang)?);
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// GET `url` and return the body text of a successful, unblocked response.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );

        if let Some(reason) = detect_block(status, &body) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                reason,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(body)
    }

    /// GET `url` and parse the body as JSON.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|source| FetchError::Deserialize {
            url: url.to_string(),
            source,
        })
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value).map_err(|source| FetchError::InvalidHeader { name, source })
}
