//! Exponential backoff and the retry loop wrapped around every Redfish request.
//!
//! [`with_retry`] runs an attempt up to `max_retries + 1` times. Protocol errors
//! in the 4xx range stop the loop immediately; everything else (network errors,
//! timeouts, 5xx) is retried after a [`Backoff`] delay. When the budget runs out
//! the last error is returned unchanged so the caller sees the real cause.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::client::RedfishError;

/// Largest fraction of the current delay added as jitter.
const JITTER_RATIO: f64 = 0.25;

/// Retry budget and backoff shape for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Add a random extra of up to 25% to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            previous: Duration::ZERO,
            max: self.max_delay,
            factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }
}

/// Delay sequence for one retry loop.
///
/// Delays never decrease and never exceed `max_delay`, jitter included.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    previous: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl Backoff {
    /// Delay to sleep before the next retry; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next.min(self.max);
        let delay = if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
            base + base.mul_f64(extra)
        } else {
            base
        };
        let delay = delay.max(self.previous).min(self.max);

        self.previous = delay;
        self.next = Duration::try_from_secs_f64(base.as_secs_f64() * self.factor)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }
}

/// Run `attempt` under `policy`, sleeping between retryable failures.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, RedfishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RedfishError>>,
{
    let max_attempts = policy.max_attempts();
    let mut backoff = policy.backoff();
    let mut n = 1;

    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_retryable() || n >= max_attempts {
            return Err(err);
        }

        let delay = backoff.next_delay();
        warn!(
            attempt = n,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Redfish request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        n += 1;
    }
}
