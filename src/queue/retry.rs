//! Bounded retries with exponential backoff, jitter and growing timeouts

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{AppError, Result};

/// Retry policy for one provider call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    pub backoff_base: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_timeout: config.base_timeout(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Timeout of attempt `attempt` (1-based)
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout.saturating_mul(attempt.max(1))
    }

    /// Backoff after failed attempt `attempt`, without jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Backoff plus uniform jitter in `[0, max_jitter]`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff_for(attempt) + Duration::from_millis(jitter)
    }
}

/// Waits between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs a fallible call under the retry policy
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` for image `index` until it succeeds, fails permanently, or
    /// runs out of attempts. Attempts are strictly sequential.
    pub async fn run<T, F, Fut>(&self, index: usize, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let timeout = self.policy.timeout_for(attempt);
            let outcome = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "attempt {} exceeded {}ms",
                    attempt,
                    timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(index, attempt, "Provider call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Provider call failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(index, attempt, error = %error, "Provider call failed permanently");
                    return Err(AppError::ImageFailed {
                        index,
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
            }
        }
    }
}
