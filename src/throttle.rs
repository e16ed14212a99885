//! Politeness policy for platform requests
//!
//! Request spacing plus bounded retry with exponential backoff on
//! rate-limit responses. Trades latency for not tripping abuse defenses.

use anyhow::Result;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Enforces a minimum interval between consecutive requests, shared by every
/// tier that talks to the platform
pub struct RateLimiter {
    /// `None` when the interval is zero
    limiter: Option<governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(min_interval).map(governor::RateLimiter::direct),
        }
    }

    /// Wait if necessary to comply with the interval
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Retry settings for rate-limited operations
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Backoff before retry number `retry` (1-based), doubling each time
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Whether an error message reads like a rate-limit response
pub fn is_rate_limited(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
}

/// Run `operation`, retrying only rate-limit failures, at most `max_retries` times
pub async fn retry_rate_limited<F, Fut, T>(operation_name: &str, policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if retry >= policy.max_retries || !is_rate_limited(&err.to_string()) {
                    return Err(err);
                }
                retry += 1;
                let wait = policy.backoff(retry);
                warn!(
                    operation = operation_name,
                    retry,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}
