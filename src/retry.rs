//! Retry with per-attempt timeouts, backoff and a fallback value.
//!
//! Shared by threat classification, keyword extraction and stream connect.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that know whether another attempt is worthwhile
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Failure of a single attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The attempt exceeded its timeout
    TimedOut(Duration),
    /// The operation itself failed
    Failed(E),
}

impl<E: Retryable> AttemptError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::TimedOut(_) => true,
            AttemptError::Failed(e) => e.is_retryable(),
        }
    }
}

impl<E: Display> Display for AttemptError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::TimedOut(d) => write!(f, "timed out after {}s", d.as_secs()),
            AttemptError::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Timeout of the first attempt; None leaves attempts unbounded
    pub base_timeout: Option<Duration>,
    /// Added to the timeout on every further attempt
    pub timeout_step: Duration,
    /// Delay before the second attempt, doubled afterwards
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_timeout: None,
            timeout_step: Duration::ZERO,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Backend text calls: 60s, 90s, 120s, no delay in between
    pub fn backend_call() -> Self {
        Self::default()
            .with_base_timeout(Duration::from_secs(60))
            .with_timeout_step(Duration::from_secs(30))
    }

    /// Stream connect: exponential backoff between 4s and 10s
    pub fn stream_connect() -> Self {
        Self::default()
            .with_base_delay(Duration::from_secs(4))
            .with_max_delay(Duration::from_secs(10))
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_base_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = Some(timeout);
        self
    }

    pub fn with_timeout_step(mut self, step: Duration) -> Self {
        self.timeout_step = step;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Timeout for a 0-based attempt
    pub fn attempt_timeout(&self, attempt: u32) -> Option<Duration> {
        self.base_timeout.map(|base| base + self.timeout_step * attempt)
    }

    /// Delay before a 0-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay.max(self.base_delay))
    }
}

/// Run `op` under `policy`, returning `fallback()` once attempts are exhausted
/// or a non-retryable error occurs.
///
/// `op` receives the 0-based attempt number.
pub async fn with_retry<T, E, F, Fut, Fb>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
    fallback: Fb,
) -> T
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Fb: FnOnce() -> T,
{
    with_retry_until(policy, label, &CancellationToken::new(), op, fallback).await
}

/// `with_retry` that gives up as soon as `cancel` fires.
///
/// Backoff delays and running attempts are abandoned on cancellation and no
/// further attempt is started; the fallback is returned.
pub async fn with_retry_until<T, E, F, Fut, Fb>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut op: F,
    fallback: Fb,
) -> T
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Fb: FnOnce() -> T,
{
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let attempt_fut = async {
            match policy.attempt_timeout(attempt) {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::TimedOut(limit)),
                },
                None => op(attempt).await.map_err(AttemptError::Failed),
            }
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = attempt_fut => outcome,
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = label, attempt = attempt + 1, "Succeeded after retry");
                }
                return value;
            }
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                tracing::warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
            }
            Err(e) => {
                tracing::warn!(
                    operation = label,
                    attempt = attempt + 1,
                    error = %e,
                    "Giving up, using fallback"
                );
                break;
            }
        }
    }

    if cancel.is_cancelled() {
        tracing::debug!(operation = label, "Cancelled, using fallback");
    }
    fallback()
}
