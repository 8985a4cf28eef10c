use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySection;
use crate::stop::StopToken;

use super::error::AutomationError;

const DEFAULT_BACKOFF_BASE: f64 = 2.0;
const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Classification hook for the retry loop: errors where repetition cannot
/// succeed short-circuit instead of burning the attempt budget.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for AutomationError {
    fn is_retryable(&self) -> bool {
        AutomationError::is_retryable(self)
    }
}

/// Bounded exponential backoff. The delay after attempt `n` (1-based) is
/// `backoff_base ^ n` seconds plus optional jitter, capped at ten minutes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff_base: f64,
    jitter_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        let backoff_base = if config.backoff_base > 1.0 {
            config.backoff_base
        } else {
            DEFAULT_BACKOFF_BASE
        };
        Self {
            // Zero attempts is a misconfiguration; one attempt is the floor.
            max_attempts: config.max_attempts.max(1),
            backoff_base,
            jitter_seconds: config.jitter_seconds,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let seconds = self.backoff_base.powi(attempt as i32);
        Duration::from_secs_f64(seconds).min(MAX_BACKOFF)
    }

    /// Run `operation` until it succeeds, fails non-retryably, exhausts the
    /// attempt budget, or a stop is requested between attempts. The error
    /// propagated is always the one from the last attempt made.
    pub async fn run<F, Fut, T, E>(
        &self,
        stop: Option<&StopToken>,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 1usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    if stop.map(StopToken::is_requested).unwrap_or(false) {
                        return Err(error);
                    }
                    let mut delay = self.delay_for_attempt(attempt);
                    if self.jitter_seconds > 0 {
                        let jitter = rand::thread_rng().gen_range(0..=self.jitter_seconds);
                        delay += Duration::from_secs(jitter);
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        delay_s = delay.as_secs_f64(),
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Functional form of retry, for call sites where threading the policy
/// through as a value reads better. Same loop as [`RetryPolicy::run`].
pub async fn retry_call<F, Fut, T, E>(
    policy: &RetryPolicy,
    stop: Option<&StopToken>,
    operation: F,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    policy.run(stop, operation).await
}
