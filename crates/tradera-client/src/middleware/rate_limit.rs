//! Token-bucket rate limiter.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Cancelled, ClientError, ClientResult};

/// Longest single sleep in [`RateLimiter::wait`]; the bucket is re-checked after it.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Token-bucket admission control shared by every caller of a client.
///
/// The bucket starts full, so the first `capacity` requests go through without
/// delay. Afterwards tokens accrue at `rate` per second up to `capacity`.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
    }
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second`, with a burst capacity
    /// of the same size.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the rate is not a positive number.
    pub fn new(requests_per_second: f64) -> ClientResult<Self> {
        Self::with_burst(requests_per_second, requests_per_second)
    }

    /// Create a limiter with a custom burst capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the rate is not a positive
    /// number or the capacity is below one token.
    pub fn with_burst(requests_per_second: f64, capacity: f64) -> ClientResult<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(ClientError::invalid_config(
                "rate_limit",
                format!("must be positive, got {requests_per_second}"),
            ));
        }
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(ClientError::invalid_config(
                "rate_burst",
                format!("must be at least 1, got {capacity}"),
            ));
        }

        Ok(Self {
            rate: requests_per_second,
            capacity,
            bucket: Mutex::new(Bucket { tokens: capacity, last_refill: Instant::now() }),
        })
    }

    /// Take a token if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        self.acquire_or_delay().is_ok()
    }

    /// Wait until a token is available or `cancel` fires.
    ///
    /// Sleeps exactly as long as the bucket needs to reach one token, then
    /// re-checks, since concurrent callers may have taken it in the meantime.
    /// An already-cancelled token returns immediately without consuming anything.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled::Admission);
            }

            let delay = match self.acquire_or_delay() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };
            tracing::trace!(delay_ms = delay.as_millis() as u64, "Waiting for rate limit token");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Cancelled::Admission),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Current number of tokens, after applying the refill since the last check.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(self.rate, self.capacity);
        bucket.tokens
    }

    /// Tokens added per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum burst size.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill, then either take a token or report how long until one accrues.
    fn acquire_or_delay(&self) -> Result<(), Duration> {
        let mut bucket = self.lock();
        bucket.refill(self.rate, self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - bucket.tokens;
        let delay = Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(MAX_WAIT);
        Err(delay.min(MAX_WAIT))
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
