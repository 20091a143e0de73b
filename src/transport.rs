//! HTTP plumbing: the authentication seam, the transport seam, and the
//! bundled `reqwest` transports used when no custom transport is injected.
//!
//! Retries here are whole-call only. A batched HTTP call that comes back
//! 429 or 5xx is retried with exponential back-off; the engine above never
//! retries individual sub-requests.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use tokio::time::sleep;
use url::Url;

use crate::batch::client::ClientConfig;
use crate::error::{ConvoyError, Result};

/// One outbound batched HTTP call, before authentication.
///
/// The authentication provider appends credential headers in place; the
/// transport turns the whole thing into a POST.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub content_type: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    pub fn new(
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Target URI handed to the authentication provider.
    pub fn target_uri(&self) -> Result<Url> {
        Ok(Url::parse(&self.url)?)
    }
}

/// Envelope-level result of one batched HTTP call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Adds credentials to an outbound request in place.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, target: &Url, request: &mut OutboundRequest) -> Result<()>;
}

/// Provider for endpoints that take no credentials, and for tests against
/// local mock servers.
pub struct AnonymousAuth;

#[async_trait]
impl AuthProvider for AnonymousAuth {
    async fn authenticate(&self, _target: &Url, _request: &mut OutboundRequest) -> Result<()> {
        Ok(())
    }
}

/// Ships one framed batch call and returns the envelope-level response.
///
/// Implementations must return `Ok` for any HTTP response they received,
/// whatever its status; the dispatcher decides what a non-2xx envelope
/// means. `Err` is reserved for requests that never completed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse>;
}

/// Shared HTTP client for connection reuse across transports.
static SHARED_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .build()
        .expect("Failed to create HTTP client")
});

/// Get the shared HTTP client instance.
pub fn shared_client() -> &'static Client {
    &SHARED_CLIENT
}

/// Create an HTTP client with custom timeout and user agent.
pub fn create_custom_client(timeout_secs: u64, user_agent: &str) -> Client {
    ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .build()
        .expect("Failed to create custom HTTP client")
}

/// `reqwest`-backed transport with whole-call retry.
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
    retry_base_delay: u64,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: create_custom_client(config.timeout, &config.user_agent),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    fn should_retry(status: u16) -> bool {
        status == 429 || status >= 500
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse> {
        let mut last_error = None;
        let mut retry_delay = Duration::from_millis(self.retry_base_delay);
        let attempts = self.max_retries.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!(
                    "Retrying batch call to {} (attempt {} of {})",
                    request.url,
                    attempt + 1,
                    attempts
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let mut builder = self
                .client
                .post(&request.url)
                .header("Content-Type", &request.content_type);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            match builder.body(request.body.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if Self::should_retry(status) && attempt + 1 < attempts {
                        warn!("Batch call to {} returned {}, will retry", request.url, status);
                        last_error = Some(ConvoyError::TransportFailure {
                            status,
                            body: String::new(),
                        });
                        continue;
                    }
                    let body = response.text().await?;
                    return Ok(TransportResponse { status, body });
                }
                Err(e) => {
                    warn!("Batch call to {} failed: {}", request.url, e);
                    last_error = Some(ConvoyError::Network(e));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ConvoyError::Other("Request failed after all retries".to_string())))
    }
}
