/*
[INPUT]:  Async operations returning crate Result
[OUTPUT]: Bounded re-invocation with capped exponential backoff and jitter
[POS]:    Resilience layer - retry policy
[UPDATE]: When changing backoff shape or retry eligibility
*/

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocations, including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the next attempt after `failed` failures, before jitter.
    pub fn backoff_ceiling(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs > max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn delay_for(&self, failed: u32) -> Duration {
        let ceiling = self.backoff_ceiling(failed);
        if !self.jitter {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        ceiling.mul_f64(factor)
    }

    /// Invoke `operation` until it succeeds or attempts run out; the last
    /// error is returned unchanged. Errors that are not retryable (credential
    /// rejection, bad parameters) end the sequence at once.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut failed = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if failed > 0 {
                        debug!(attempt = failed + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(attempt = failed + 1, error = %err, "operation failed; not retryable");
                    return Err(err);
                }
                Err(err) => {
                    failed += 1;
                    if failed >= attempts {
                        warn!(attempts, error = %err, "operation failed; retries exhausted");
                        return Err(err);
                    }
                    let delay = self.delay_for(failed);
                    debug!(
                        attempt = failed,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
