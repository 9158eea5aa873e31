//! Standalone retry helpers for operations run outside a [`Call`](crate::Call),
//! such as a chain of dependent sends.

use std::future::Future;
use std::time::Duration;

use crate::Result;

/// Delay schedule between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`, the exponent capped at 16.
    Exponential { base: Duration },
    /// The same delay before every retry.
    Linear { delay: Duration },
}

impl Backoff {
    /// Delay to wait after the failed attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base } => {
                let exp = attempt.min(16);
                let multiplier = 1u32 << exp;
                base.saturating_mul(multiplier)
            }
            Backoff::Linear { delay } => delay,
        }
    }
}

/// Runs `operation` up to `max_retries + 1` times, sleeping per `backoff`
/// between attempts. Stops at the first success or at the first error that
/// is not [retryable](crate::Error::is_retryable), and returns the last error
/// otherwise.
pub async fn retry_with_backoff<F, Fut, T>(max_retries: u32, backoff: Backoff, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_retries || !err.is_retryable() => return Err(err),
            Err(_err) => {
                let delay = backoff.delay(attempt);
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %_err,
                    "retrying operation after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub async fn retry_with_exponential_backoff<F, Fut, T>(max_retries: u32, base: Duration, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(max_retries, Backoff::Exponential { base }, operation).await
}

pub async fn retry_with_linear_backoff<F, Fut, T>(max_retries: u32, delay: Duration, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(max_retries, Backoff::Linear { delay }, operation).await
}
