use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace, warn};

use super::TileFetcher;
use crate::error::IoError;

/// Default User-Agent. Several library tile servers reject requests without a
/// browser-like agent.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Default per-request timeout for tile downloads.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP-backed implementation of TileFetcher.
///
/// Issues plain GET requests with a configurable `Referer` and extra headers.
/// Tile servers behind library viewers commonly refuse requests whose
/// `Referer` does not match the viewer page, so the caller supplies it.
#[derive(Clone)]
pub struct HttpTileFetcher {
    client: Client,
    identifier: String,
}

impl HttpTileFetcher {
    /// Create a fetcher with default headers and timeout.
    pub fn new() -> Result<Self, IoError> {
        HttpTileFetcherBuilder::new().build()
    }

    pub fn builder() -> HttpTileFetcherBuilder {
        HttpTileFetcherBuilder::new()
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError> {
        trace!(url = url, "HTTP GET request starting");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(
                url = url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            map_reqwest_error(url, e)
        })?;

        let status = response.status();
        debug!(url = url, status = status.as_u16(), "HTTP response received");

        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(IoError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(IoError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(|e| map_reqwest_error(url, e))?;
        trace!(url = url, bytes = body.len(), "HTTP response body read");
        Ok(body)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> IoError {
    if e.is_timeout() {
        IoError::Timeout {
            url: url.to_string(),
        }
    } else {
        IoError::Connection(e.to_string())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`HttpTileFetcher`].
#[derive(Debug, Clone)]
pub struct HttpTileFetcherBuilder {
    referer: Option<String>,
    user_agent: String,
    headers: Vec<(String, String)>,
    request_timeout: Duration,
}

impl HttpTileFetcherBuilder {
    pub fn new() -> Self {
        Self {
            referer: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// `Referer` sent with every request.
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add an extra header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the fetcher. Fails if a header name or value is invalid.
    pub fn build(self) -> Result<HttpTileFetcher, IoError> {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, header_value("User-Agent", &self.user_agent)?);
        if let Some(ref referer) = self.referer {
            headers.insert(REFERER, header_value("Referer", referer)?);
        }
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                IoError::Connection(format!("Invalid header name '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(self.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| IoError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let identifier = match self.referer {
            Some(referer) => format!("http (referer {})", referer),
            None => "http".to_string(),
        };

        Ok(HttpTileFetcher { client, identifier })
    }
}

impl Default for HttpTileFetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, IoError> {
    HeaderValue::from_str(value)
        .map_err(|e| IoError::Connection(format!("Invalid value for header '{}': {}", name, e)))
}
