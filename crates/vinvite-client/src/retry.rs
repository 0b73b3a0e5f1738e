//! Retrying request execution with exponential backoff.
//!
//! Only transient failures are retried: network errors and 5xx responses.
//! Any response below 500 is handed back to the caller untouched. The
//! cancellation token is raced against every send and every backoff sleep.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::{RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::metrics::names;

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `k` (0-based): `base * 2^k`.
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(k))
    }
}

fn record_attempt(outcome: &'static str) {
    counter!(names::HTTP_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

/// HTTP executor that applies a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send a request with the default number of attempts.
    pub async fn send<F>(&self, build: F, cancel: &CancellationToken) -> ClientResult<Response>
    where
        F: Fn(&reqwest::Client) -> ClientResult<RequestBuilder>,
    {
        self.request(build, self.policy.max_attempts, cancel).await
    }

    /// Send a request, retrying transient failures up to `max_attempts`
    /// total attempts.
    ///
    /// `build` is called once per attempt because multipart bodies cannot be
    /// cloned; an error from `build` is returned without retrying. Returns
    /// the first response with status below 500. On exhaustion, returns the
    /// last error.
    pub async fn request<F>(
        &self,
        build: F,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> ClientResult<Response>
    where
        F: Fn(&reqwest::Client) -> ClientResult<RequestBuilder>,
    {
        let max_attempts = max_attempts.max(1);
        let started = Instant::now();

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                record_attempt("cancelled");
                return Err(ClientError::Cancelled);
            }

            let pending = build(&self.http)?.send();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    record_attempt("cancelled");
                    return Err(ClientError::Cancelled);
                }
                result = pending => result,
            };

            let error = match outcome {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    record_attempt("server_error");
                    ClientError::Server { status, message }
                }
                Ok(response) => {
                    record_attempt("response");
                    histogram!(names::HTTP_REQUEST_DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    debug!(
                        status = response.status().as_u16(),
                        attempt = attempt + 1,
                        "Request completed"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    record_attempt("timeout");
                    ClientError::Network(e)
                }
                Err(e) => {
                    record_attempt("network_error");
                    ClientError::Network(e)
                }
            };

            if attempt + 1 >= max_attempts {
                warn!(
                    attempts = max_attempts,
                    error = %error,
                    "Request failed after all attempts"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    record_attempt("cancelled");
                    return Err(ClientError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // The loop always returns; max_attempts is at least 1.
        Err(ClientError::invalid_response("no attempt was made"))
    }
}
