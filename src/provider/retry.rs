//! Rate-limit retry with provider-specific backoff.
//!
//! The originals all share the same loop: call, sleep on a rate-limit
//! signal, give up after a bounded number of futile attempts. Providers
//! differ only in how long they sleep, so the wait policy is the one
//! pluggable piece.

use super::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Wait policy between rate-limited attempts.
///
/// Both variants are monotonically non-decreasing in the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait every time.
    Fixed(Duration),
    /// `step * (attempt + 1)`: grows with each consecutive rate limit.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(wait) => *wait,
            Backoff::Linear(step) => *step * (attempt + 1),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-rate-limit error, or
/// exhausts `max_retries` rate-limited attempts.
///
/// Exactly one call to `op` happens per attempt; the sleep between
/// attempts follows `backoff`.
pub async fn run_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff: Backoff,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limit() => {
                if attempt >= max_retries {
                    return Err(ProviderError::RetriesExhausted { attempts: attempt });
                }
                let delay = backoff.delay(attempt);
                warn!(
                    attempt,
                    wait_secs = delay.as_secs(),
                    "rate limit hit, sleeping before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
