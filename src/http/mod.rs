//! Retrying HTTP client.
//!
//! Every network-backed source fetcher issues its requests through
//! [`RetryingHttpClient`], so the bounded exponential-backoff policy lives in one
//! place. The wrapped `reqwest::Client` keeps a connection pool that is reused
//! across calls; nothing else is shared between requests.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpConfig;

/// Errors surfaced after the retry budget is spent.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection, timeout or other transport failure
    #[error("Transport error for {url}: {message}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying error description
        message: String,
    },

    /// The server answered with a status outside 2xx/3xx
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Requested URL
        url: String,
        /// Response body, possibly truncated
        body: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response from {url}: {message}")]
    Decode {
        /// Requested URL
        url: String,
        /// Decoder message
        message: String,
    },

    /// The client could not be constructed
    #[error("HTTP client configuration error: {0}")]
    Config(String),
}

/// Result type for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;

/// Bounded exponential backoff.
///
/// A request is attempted at most `max_retries` times. After failed attempt `n`
/// (0-based) the client waits `backoff_factor * 2^n` seconds, except after the
/// last attempt, whose error is returned as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts (values below 1 are treated as 1)
    pub max_retries: u32,

    /// Backoff base in seconds
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(attempt as i32);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// HTTP client that retries transport errors and non-success statuses.
#[derive(Debug, Clone)]
pub struct RetryingHttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    /// Build a client with the given per-request timeout and retry policy.
    pub fn new(timeout: Duration, policy: RetryPolicy) -> HttpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Config(e.to_string()))?;
        Ok(Self { client, policy })
    }

    /// Build a client from the shared HTTP configuration.
    pub fn from_config(config: &HttpConfig) -> HttpResult<Self> {
        Self::new(
            config.timeout(),
            RetryPolicy::new(config.max_retries, config.backoff_factor),
        )
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Issue a request, retrying according to the policy.
    ///
    /// Returns the first response with a 2xx/3xx status, or the last error once
    /// every attempt has failed.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        headers: &HeaderMap,
    ) -> HttpResult<Response> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            let result = self.send_once(method.clone(), url, params, headers).await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        url,
                        attempt + 1,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET `url` with query `params` and decode the JSON body.
    ///
    /// Only the request itself is retried; a body that fails to decode is
    /// reported immediately.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> HttpResult<T> {
        let response = self
            .request(Method::GET, url, params, &HeaderMap::new())
            .await?;
        response.json::<T>().await.map_err(|e| HttpError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        headers: &HeaderMap,
    ) -> HttpResult<Response> {
        debug!("{} {} {:?}", method, url, params);
        let response = self
            .client
            .request(method, url)
            .query(params)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| HttpError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }

        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(HttpError::Status {
            status,
            url: url.to_string(),
            body,
        })
    }
}
