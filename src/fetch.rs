//! # Fetch Layer
//!
//! Turns a [`Request`] into a [`RawResponse`], converting transport
//! outcomes into the typed transient failures of the error taxonomy.
//!
//! The [`Fetcher`] trait is the seam the driver talks through: the
//! default [`HttpFetcher`] wraps one shared `reqwest::Client` (reused
//! across pool workers for connection pooling), and
//! [`RetryingFetcher`] layers exponential backoff with a cumulative
//! budget on top of any inner fetcher. Tests substitute scripted
//! fetchers at the same seam.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::error::{FetchFailure, TransientError};
use crate::request::{Body, Request};
use crate::response::RawResponse;

/// Executes one HTTP interaction. Implementations must be safe to call
/// concurrently from many workers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<RawResponse, FetchFailure>;
}

#[async_trait]
impl Fetcher for std::sync::Arc<dyn Fetcher> {
    async fn fetch(&self, request: &Request) -> Result<RawResponse, FetchFailure> {
        self.as_ref().fetch(request).await
    }
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronous-contract HTTP fetcher over a shared `reqwest::Client`.
///
/// Status ≥ 500 and 429 become [`TransientError::UnexpectedStatus`],
/// timeouts become [`TransientError::Timeout`], connection-level
/// failures become [`TransientError::Transport`]. Everything else,
/// 404s included, is returned as a response for the scraper to judge.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build over a pre-configured client (the builder threads the
    /// scraper's TLS customization through here).
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        HttpFetcher { client, timeout }
    }

    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpFetcher { client, timeout })
    }

    fn build_request(&self, request: &Request) -> reqwest::RequestBuilder {
        let method = reqwest::Method::from_bytes(request.http.method.as_str().as_bytes())
            .expect("method names are valid tokens");
        let mut builder = self.client.request(method, &request.http.url);

        // Permanent headers and cookies ride on every descendant;
        // permanent entries win over per-request ones.
        let mut headers: BTreeMap<&str, &str> = request
            .http
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (k, v) in &request.permanent.headers {
            headers.insert(k.as_str(), v.as_str());
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !request.permanent.cookies.is_empty() {
            let cookie_header = request
                .permanent
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie_header);
        }

        match &request.http.body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::Form(pairs) => builder.form(pairs),
            Body::Json(value) => builder.json(value),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<RawResponse, FetchFailure> {
        let url = request.http.url.clone();
        trace!(%url, method = request.http.method.as_str(), "dispatching request");

        let response = self.build_request(request).send().await.map_err(|e| {
            if e.is_timeout() {
                TransientError::Timeout {
                    url: url.clone(),
                    timeout_secs: self.timeout.as_secs_f64(),
                }
            } else {
                TransientError::Transport {
                    url: url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        if status >= 500 || status == 429 {
            return Err(TransientError::UnexpectedStatus {
                status,
                expected: vec![200],
                url,
            }
            .into());
        }

        let final_url = response.url().to_string();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = response.bytes().await.map_err(|e| TransientError::Transport {
            url: final_url.clone(),
            message: e.to_string(),
        })?;

        trace!(%final_url, status, bytes = body.len(), "response received");
        Ok(RawResponse {
            status,
            headers,
            body,
            url: final_url,
        })
    }
}

/// Exponential-backoff parameters for [`RetryingFetcher`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay; doubles each attempt.
    pub base_delay: Duration,
    /// Fraction of random spread applied to each delay (0.0 disables).
    pub jitter: f64,
    /// Cumulative sleep budget across all retries of one request.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            jitter: 0.0,
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        // Individual delays are capped so one sleep cannot eat the
        // whole budget.
        let capped = base.min(self.max_backoff.as_secs_f64() / 4.0);
        let jittered = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (capped * (1.0 + spread)).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Wraps a fetcher with retry-on-transient behavior. When the
/// cumulative backoff budget is crossed, the last transient failure
/// surfaces unrecovered.
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        RetryingFetcher { inner, policy }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for RetryingFetcher<F> {
    async fn fetch(&self, request: &Request) -> Result<RawResponse, FetchFailure> {
        let mut attempt: u32 = 0;
        let mut cumulative = Duration::ZERO;
        loop {
            match self.inner.fetch(request).await {
                Ok(response) => return Ok(response),
                Err(FetchFailure::Transient(e)) => {
                    let delay = self.policy.delay_for(attempt);
                    if cumulative + delay >= self.policy.max_backoff {
                        warn!(
                            url = %request.http.url,
                            attempts = attempt + 1,
                            "backoff budget exhausted, surfacing transient failure"
                        );
                        return Err(e.into());
                    }
                    debug!(
                        url = %request.http.url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    cumulative += delay;
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
