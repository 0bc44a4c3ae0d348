//! HTTP exchange with bounded timeouts and retries
//!
//! The network is reached through an [`Exchange`]: a plain function from an
//! [`HttpRequest`] to a future of response bytes. [`HttpFetcher`] wraps one
//! with a per-attempt timeout and exponential backoff for transient failures.
//! The default exchange uses `reqwest` (feature `online`); any other transport
//! can be substituted by passing a closure.

use crate::error::TransportError;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<&'static str>,
    pub accept: Option<&'static str>,
    pub body: Bytes,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            content_type: None,
            accept: None,
            body: Bytes::new(),
            basic_auth: None,
        }
    }

    pub fn post(url: impl Into<String>, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            content_type: Some(content_type),
            accept: None,
            body: body.into(),
            basic_auth: None,
        }
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("auth", &self.basic_auth.is_some())
            .finish()
    }
}

/// One network round-trip
pub type Exchange = Arc<dyn Fn(HttpRequest) -> ExchangeFuture + Send + Sync>;

pub type ExchangeFuture = BoxFuture<'static, Result<Bytes, TransportError>>;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1` (`attempt` is 1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `future` with a deadline, mapping expiry to [`TransportError::Timeout`]
pub async fn with_timeout<F, T>(url: &str, duration: Duration, future: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            url: url.to_string(),
            timeout: duration,
        }),
    }
}

/// Exchange wrapped with timeout and retry
#[derive(Clone)]
pub struct HttpFetcher {
    exchange: Exchange,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(exchange: Exchange, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            timeout,
            retry,
        }
    }

    /// Fetcher built from a closure
    pub fn from_fn<F, Fut>(f: F, timeout: Duration, retry: RetryPolicy) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, TransportError>> + Send + 'static,
    {
        let exchange: Exchange = Arc::new(move |req| f(req).boxed());
        Self::new(exchange, timeout, retry)
    }

    /// Fetcher that fails every request with [`TransportError::Unavailable`]
    pub fn unavailable() -> Self {
        Self::from_fn(
            |_req| async { Err(TransportError::Unavailable) },
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
    }

    /// Fetcher over `reqwest`
    #[cfg(feature = "online")]
    pub fn online(timeout: Duration, retry: RetryPolicy) -> crate::error::Result<Self> {
        Ok(Self::new(reqwest_exchange(timeout)?, timeout, retry))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send `request`, retrying transient failures
    pub async fn fetch(&self, request: HttpRequest) -> Result<Bytes, TransportError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = with_timeout(
                &request.url,
                self.timeout,
                (self.exchange)(request.clone()),
            )
            .await;

            match result {
                Ok(body) => {
                    debug!(url = %request.url, attempt, bytes = body.len(), "fetched");
                    return Ok(body);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(url = %request.url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(url = %request.url, attempt, error = %e, "fetch failed");
                    return Err(e);
                }
            }
        }
    }
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "online")]
fn reqwest_exchange(timeout: Duration) -> crate::error::Result<Exchange> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| crate::error::Error::config(format!("Failed to create HTTP client: {}", e)))?;

    let exchange: Exchange = Arc::new(move |req: HttpRequest| {
        let client = client.clone();
        async move {
            let url = req.url.clone();
            let mut builder = match req.method {
                Method::Get => client.get(&req.url),
                Method::Post => client.post(&req.url).body(req.body.clone()),
            };
            if let Some(content_type) = req.content_type {
                builder = builder.header("Content-Type", content_type);
            }
            if let Some(accept) = req.accept {
                builder = builder.header("Accept", accept);
            }
            if let Some((user, pass)) = &req.basic_auth {
                builder = builder.basic_auth(user, Some(pass));
            }

            let response = builder
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, timeout, &e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    url,
                    status: status.as_u16(),
                });
            }

            response
                .bytes()
                .await
                .map_err(|e| map_reqwest_error(&url, timeout, &e))
        }
        .boxed()
    });
    Ok(exchange)
}

#[cfg(feature = "online")]
fn map_reqwest_error(url: &str, timeout: Duration, e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else if e.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else if e.is_builder() {
        TransportError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
