//! Retry Logic
//!
//! Bounded exponential backoff for dispatched requests. Only idempotent
//! requests, or requests carrying an idempotency key, are ever retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{NetworkError, PipelineError};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on a computed backoff delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Additive jitter as a fraction of the base delay (0.0-1.0).
    pub jitter: f64,
    /// Upper bound on a server-supplied `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
    multiplier: 2.0,
    jitter: 0.1,
    max_retry_after: Duration::from_secs(60),
};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    Retry(Duration),
    /// Surface the error.
    GiveUp,
}

/// Retry executor interface.
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// attempts. Ineligible operations run exactly once.
    async fn execute<T, F, Fut>(&self, eligible: bool, operation: F) -> Result<T, PipelineError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, PipelineError>> + Send;

    /// Classify a failure after the given zero-based attempt.
    fn decide(&self, error: &PipelineError, attempt: u32, eligible: bool) -> RetryDecision;

    /// Get retry statistics.
    fn get_stats(&self) -> RetryStats;
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Exponential backoff retry policy.
pub struct RetryPolicy {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl RetryPolicy {
    /// Create new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff delay after the given zero-based attempt.
    ///
    /// Jitter is added on top of the base delay and stays below
    /// `jitter * base`, so successive delays strictly increase for any
    /// multiplier above `1 + jitter` until the cap is reached.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter = rand::random::<f64>() * capped_delay * self.config.jitter.clamp(0.0, 1.0);

        Duration::from_millis((capped_delay + jitter) as u64)
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RetryStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl RetryExecutor for RetryPolicy {
    async fn execute<T, F, Fut>(&self, eligible: bool, operation: F) -> Result<T, PipelineError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, PipelineError>> + Send,
    {
        let mut attempt = 0;

        loop {
            self.stats().total_attempts += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.stats().successful_retries += 1;
                    }
                    return Ok(result);
                }
                Err(error) => match self.decide(&error, attempt, eligible) {
                    RetryDecision::Retry(delay) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = self.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        self.stats().failed_operations += 1;
                        return Err(error);
                    }
                },
            }
        }
    }

    fn decide(&self, error: &PipelineError, attempt: u32, eligible: bool) -> RetryDecision {
        if !eligible || attempt + 1 >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        match error {
            PipelineError::Network(NetworkError::RateLimited { retry_after: Some(after) }) => {
                RetryDecision::Retry((*after).min(self.config.max_retry_after))
            }
            PipelineError::Network(NetworkError::RateLimited { retry_after: None }) => {
                RetryDecision::Retry(self.calculate_delay(attempt))
            }
            e if e.is_retryable() => RetryDecision::Retry(self.calculate_delay(attempt)),
            _ => RetryDecision::GiveUp,
        }
    }

    fn get_stats(&self) -> RetryStats {
        self.stats().clone()
    }
}

/// Parse a `Retry-After` header value, given either as delay seconds or as
/// an HTTP date. Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = date.with_timezone(&Utc) - now;
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}
