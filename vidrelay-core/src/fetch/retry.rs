use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::FetchError;
use crate::config::RetrySection;

/// Errors that can tell the retry loop whether another attempt is worthwhile.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
    pub delays: Vec<Duration>,
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySection::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        let base_delay = Duration::from_millis(config.base_delay_ms);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(config.max_delay_ms).max(base_delay),
            jitter: config.jitter,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay slept after the `attempt`-th failure (1-based).
    ///
    /// Below the cap the value is `base * 2^(attempt-1)` plus up to half of that
    /// in jitter, so consecutive delays strictly increase. Once the doubling
    /// reaches the cap every later delay is exactly the cap.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(30) as u32;
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        if raw >= self.max_delay {
            return self.max_delay;
        }
        let mut delay = raw;
        if self.jitter {
            let spread = (raw.as_millis() / 2) as u64;
            if spread > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..spread));
            }
        }
        delay.min(self.max_delay)
    }

    pub async fn run<F, Fut, T, E>(&self, label: &str, operation: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.run_with(self.max_attempts, |attempt| self.delay_for_attempt(attempt), label, operation)
            .await
    }

    /// Runs `operation` up to `max_attempts` times, sleeping `backoff(n)` after
    /// the n-th retryable failure. The last error is returned unchanged.
    pub async fn run_with<F, Fut, T, E, B>(
        &self,
        max_attempts: usize,
        mut backoff: B,
        label: &str,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
        B: FnMut(usize) -> Duration,
    {
        let max_attempts = max_attempts.max(1);
        let mut delays = Vec::new();
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(stage = label, attempts = attempt + 1, "operation recovered");
                    }
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                        delays,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    if !error.is_retryable() {
                        debug!(stage = label, attempt, error = %error, "non-retryable failure");
                        return Err(error);
                    }
                    if attempt >= max_attempts {
                        warn!(stage = label, attempts = attempt, error = %error, "retries exhausted");
                        return Err(error);
                    }
                    let wait = backoff(attempt);
                    warn!(
                        attempt,
                        wait = ?wait,
                        stage = label,
                        error = %error,
                        "retrying operation"
                    );
                    delays.push(wait);
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                }
            }
        }
    }
}
