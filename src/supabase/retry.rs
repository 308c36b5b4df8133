use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, Response};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;

/// Retry behavior for idempotent requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first. 0 = a single attempt.
    pub max_retries: u32,
    pub status_codes: Vec<u16>,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            status_codes: vec![429, 500, 502, 503, 504],
            base_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.read_retries,
            ..Self::default()
        }
    }

    /// One attempt, no retries. Used for writes.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Send the request built by `build`, retrying on transport errors and on
/// the policy's status codes. Honors `Retry-After` (seconds).
///
/// On exhaustion the last response is returned as-is, so callers still see
/// the provider's error body.
pub async fn send_with_retry<F>(build: F, policy: &RetryPolicy) -> Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if !policy.status_codes.contains(&status.as_u16()) {
                    return Ok(response);
                }

                if attempt > policy.max_retries {
                    debug!(
                        attempts = attempt,
                        status = status.as_u16(),
                        url = %response.url(),
                        "retries exhausted, returning last response"
                    );
                    return Ok(response);
                }

                let wait = wait_time(&response, policy, attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_retries + 1,
                    status = status.as_u16(),
                    wait_ms = wait.as_millis() as u64,
                    "retryable status, backing off"
                );
                sleep(wait).await;
            }
            Err(e) => {
                if attempt > policy.max_retries {
                    return Err(e);
                }

                let wait = backoff(policy, attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_retries + 1,
                    error = %e,
                    wait_ms = wait.as_millis() as u64,
                    "request failed, backing off"
                );
                sleep(wait).await;
            }
        }
    }
}

fn wait_time(response: &Response, policy: &RetryPolicy, attempt: u32) -> Duration {
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match retry_after {
        Some(seconds) => Duration::from_secs(seconds),
        None => backoff(policy, attempt),
    }
}

fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_backoff_ms as f64;
    let max = policy.max_backoff_ms as f64;

    // base * 2^(attempt - 1), capped
    let raw = base * 2_f64.powi((attempt as i32) - 1);
    let capped = raw.min(max);

    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };

    Duration::from_millis(capped as u64 + jitter)
}
