use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Request, Response};
use serde::Serialize;
use std::time::Duration;

use crate::error::TransportError;

/// Retry and timeout settings for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of calls per request, including the first one
    pub max_attempts: u32,

    /// Base delay for exponential backoff
    pub backoff_base: Duration,

    /// Per-request timeout, covering connect, send and body read
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP transport with retry logic.
///
/// Knows nothing about authentication: it executes requests, retries transient
/// failures (connection errors, timeouts, 429 and 5xx) with exponential backoff,
/// and hands everything else straight back to the caller.
pub struct HttpTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    policy: RetryPolicy,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, policy })
    }

    /// Build a JSON POST and execute it with retry logic
    pub async fn post_json<T>(&self, url: &str, body: &T) -> Result<Response, TransportError>
    where
        T: Serialize + ?Sized,
    {
        let request = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid request: {}", e)))?;

        self.execute(request).await
    }

    /// Execute a request with retry logic
    /// - 2xx: returned as is
    /// - 429, 5xx, connection errors, timeouts: exponential backoff, then `RetriesExhausted`
    /// - any other status: `HttpError` after a single call
    pub async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(
            method = %method,
            url = %url,
            max_attempts,
            "Sending HTTP request"
        );

        loop {
            // Streaming bodies cannot be replayed, so refuse them up front
            let req = request.try_clone().ok_or_else(|| {
                TransportError::ConnectionFailed("Request body is not cloneable".to_string())
            })?;

            attempt += 1;
            tracing::debug!(attempt, max_attempts, "Executing request attempt");

            let error = match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::debug!(status = %status, attempt, "Request successful");
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    let error = TransportError::HttpError {
                        status: status.as_u16(),
                        body,
                    };

                    if !error.is_transient() {
                        tracing::warn!(
                            status = status.as_u16(),
                            url = %url,
                            attempt,
                            "HTTP request failed with non-retryable status"
                        );
                        return Err(error);
                    }

                    error
                }
                Err(e) => classify_error(&e),
            };

            if attempt >= max_attempts {
                tracing::error!(
                    error = %error,
                    url = %url,
                    total_attempts = attempt,
                    "HTTP request failed after all retries"
                );
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.backoff_delay(attempt - 1);
            tracing::warn!(
                error = %error,
                delay_ms = delay.as_millis() as u64,
                attempt,
                max_attempts,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential backoff: base * 2^retry, plus up to 10% jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base_ms = self.policy.backoff_base.as_millis() as u64;
        let delay = base_ms.saturating_mul(2_u64.saturating_pow(retry));
        let jitter = (delay as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
        Duration::from_millis(delay.saturating_add(jitter))
    }
}

/// Map a reqwest error onto the transport taxonomy
fn classify_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout(e.to_string());
    }

    let error_kind = if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    TransportError::ConnectionFailed(format!("{} (kind: {})", e, error_kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base_ms: u64) -> HttpTransport {
        HttpTransport::new(RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(base_ms),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_calculation() {
        let transport = transport(1000);

        let delay0 = transport.backoff_delay(0).as_millis();
        let delay1 = transport.backoff_delay(1).as_millis();
        let delay2 = transport.backoff_delay(2).as_millis();

        // Each delay should be roughly double the previous (with jitter)
        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let transport = transport(1000);
        assert!(transport.backoff_delay(200) >= Duration::from_millis(1000));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base, Duration::from_millis(1000));
        assert_eq!(policy.request_timeout, Duration::from_secs(30));
    }
}
