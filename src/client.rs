//! Retrying HTTP client: bounded exponential-backoff retry around reqwest.
//!
//! ## Retry Strategy
//!
//! Transient network failures (refused connections, timeouts, resets) are
//! frequent against a busy extraction service. Each request is attempted up
//! to [`crate::config::RetryPolicy::max_attempts`] times with an exponential
//! wait clamped to `[wait_min_secs, wait_max_secs]` — with the defaults the
//! sequence is 2 s → 2 s, after which the last error propagates as
//! [`Scan2MdError::Transport`].
//!
//! Responses with non-2xx status are **not** failures at this layer: the
//! request reached the service, so the response is handed back to the caller
//! to interpret (a rejected submission is terminal; a failed archive
//! download is a recoverable per-file outcome). Malformed requests
//! (builder errors) propagate immediately without retry.

use crate::config::RetryPolicy;
use crate::error::Scan2MdError;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// HTTP client wrapper that retries transient failures.
///
/// Cheap to clone; the inner `reqwest::Client` is reference-counted.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl RetryingClient {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, Scan2MdError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Scan2MdError::Internal(format!("http client: {e}")))?;
        Ok(Self { client, retry })
    }

    /// GET with an optional bearer token.
    pub async fn get(&self, url: &str, bearer: Option<&str>) -> Result<reqwest::Response, Scan2MdError> {
        self.execute(url, || {
            let mut req = self.client.get(url);
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }
            req
        })
        .await
    }

    /// GET with a per-call timeout override (result-archive downloads get a
    /// far longer budget than API calls).
    pub async fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response, Scan2MdError> {
        self.execute(url, || self.client.get(url).timeout(timeout)).await
    }

    /// POST a JSON body with a bearer token.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: &str,
        body: &T,
    ) -> Result<reqwest::Response, Scan2MdError> {
        self.execute(url, || self.client.post(url).bearer_auth(bearer).json(body))
            .await
    }

    /// PUT raw bytes to a pre-signed URL (no auth header).
    pub async fn put_bytes(&self, url: &str, body: Vec<u8>) -> Result<reqwest::Response, Scan2MdError> {
        self.execute(url, || self.client.put(url).body(body.clone())).await
    }

    /// Issue the request built by `build`, retrying transient failures.
    async fn execute<F>(&self, url: &str, build: F) -> Result<reqwest::Response, Scan2MdError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err: Option<reqwest::Error> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let wait = self.retry.wait_for(attempt - 1);
                warn!(
                    "Retrying request to {} (attempt {}/{}) after {:.1}s",
                    url,
                    attempt,
                    self.retry.max_attempts,
                    wait.as_secs_f64()
                );
                sleep(wait).await;
            }

            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_builder() => {
                    // Malformed request: retrying would rebuild the same error.
                    return Err(Scan2MdError::Transport {
                        url: url.to_string(),
                        source: e,
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(source) => Err(Scan2MdError::Transport {
                url: url.to_string(),
                source,
            }),
            None => Err(Scan2MdError::Internal(format!(
                "retry loop made no attempts for {url}"
            ))),
        }
    }
}
