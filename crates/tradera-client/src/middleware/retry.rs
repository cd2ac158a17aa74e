//! Retry with exponential backoff and jitter.
//!
//! The retryer is generic over the operation's error type; whether an error is
//! worth another attempt is decided by a classifier supplied at construction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::api;
use crate::error::Cancelled;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on a single delay, applied before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fraction of the delay used as uniform noise in both directions.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: api::MAX_RETRIES,
            base_delay: api::RETRY_BASE_DELAY,
            max_delay: api::RETRY_MAX_DELAY,
            multiplier: api::RETRY_MULTIPLIER,
            jitter: api::RETRY_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Replace out-of-range values with the defaults.
    ///
    /// Zero `max_retries`, `base_delay` or `max_delay` and a non-positive
    /// `multiplier` fall back to the defaults. A multiplier between 0 and 1 is
    /// raised to 1 so delays never shrink. `jitter` is clamped into `[0, 1]`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        if self.max_retries == 0 {
            self.max_retries = defaults.max_retries;
        }
        if self.base_delay.is_zero() {
            self.base_delay = defaults.base_delay;
        }
        if self.max_delay.is_zero() {
            self.max_delay = defaults.max_delay;
        }
        if self.multiplier.is_nan() || self.multiplier <= 0.0 {
            self.multiplier = defaults.multiplier;
        } else if self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        self.jitter = if self.jitter.is_nan() { 0.0 } else { self.jitter.clamp(0.0, 1.0) };

        self
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `attempt` (0-indexed) without jitter:
    /// `min(max_delay, base_delay * multiplier^attempt)`.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let max = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Delay before retry `attempt` with jitter applied, floored at zero.
    ///
    /// A jittered delay too large for a `Duration` falls back to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let spread = secs * self.jitter;
        let noise = rand::thread_rng().gen_range(-spread..=spread);
        Duration::try_from_secs_f64((secs + noise).max(0.0)).unwrap_or(self.max_delay)
    }
}

/// Outcome of a failed retry loop.
#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    /// The classifier rejected the error; no further attempts were made.
    #[error("non-retryable error on attempt {attempt}: {source}")]
    Permanent {
        /// 1-based attempt that produced the error.
        attempt: u32,
        /// The operation's error.
        source: E,
    },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        /// Total attempts made.
        attempts: u32,
        /// Error from the last attempt.
        source: E,
    },

    /// The caller cancelled before the first attempt or during backoff.
    #[error(transparent)]
    Cancelled(Cancelled),
}

impl<E> RetryError<E> {
    /// The operation error, unless the loop was cancelled.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Permanent { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled(_) => None,
        }
    }

    /// Number of attempts that ran.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Cancelled(Cancelled::Backoff { attempts }) => *attempts,
            Self::Cancelled(Cancelled::Admission | Cancelled::BeforeAttempt) => 0,
        }
    }
}

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Re-runs an operation until it succeeds, fails permanently, runs out of
/// attempts, or is cancelled.
pub struct Retryer<E> {
    policy: RetryPolicy,
    should_retry: Classifier<E>,
}

impl<E> Clone for Retryer<E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy, should_retry: Arc::clone(&self.should_retry) }
    }
}

impl<E> std::fmt::Debug for Retryer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retryer").field("policy", &self.policy).finish()
    }
}

impl<E: 'static> Retryer<E> {
    /// Create a retryer that treats every error as retryable.
    ///
    /// Production callers should install a classifier with
    /// [`Retryer::with_classifier`].
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy: policy.normalized(), should_retry: Arc::new(|_: &E| true) }
    }

    /// Replace the retry classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, should_retry: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(should_retry);
        self
    }

    /// The normalized policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run an operation that produces no value.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        self.execute_with_result(cancel, operation).await
    }

    /// Run an operation, retrying failures the classifier accepts.
    pub async fn execute_with_result<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled(Cancelled::BeforeAttempt));
        }

        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;

            if !(self.should_retry)(&err) {
                return Err(RetryError::Permanent { attempt, source: err });
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(RetryError::Exhausted { attempts: attempt, source: err });
            }

            let delay = self.policy.delay_for(attempt - 1);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(RetryError::Cancelled(Cancelled::Backoff { attempts: attempt }));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
