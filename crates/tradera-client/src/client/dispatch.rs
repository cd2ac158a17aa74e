//! Composition of the middleware around a single remote call.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ClientError, ClientResult, is_retryable};
use crate::middleware::{Cache, RateLimiter, RetryPolicy, Retryer, SweepBarrier};

/// Applies the configured middleware to outbound operations.
///
/// Every piece is optional. When present they run in a fixed order:
/// cache lookup, rate limiter admission, retry loop, operation.
pub struct Dispatcher {
    rate_limiter: Option<RateLimiter>,
    retryer: Option<Retryer<ClientError>>,
    cache_ttl: Option<std::time::Duration>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    caches: Mutex<Vec<Box<dyn SweepBarrier>>>,
}

impl Dispatcher {
    /// Build the middleware described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the rate limit settings are invalid.
    pub fn new(config: &Config) -> ClientResult<Self> {
        let rate_limiter = if config.rate_limit > 0.0 {
            let burst = config.rate_burst.unwrap_or(config.rate_limit);
            Some(RateLimiter::with_burst(config.rate_limit, burst)?)
        } else {
            None
        };

        let retryer = config.retry_enabled.then(|| {
            let policy = RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay,
                max_delay: config.retry_max_delay,
                multiplier: config.retry_multiplier,
                jitter: config.retry_jitter,
            };
            Retryer::new(policy).with_classifier(is_retryable)
        });

        let cache_ttl = (!config.cache_ttl.is_zero()).then_some(config.cache_ttl);

        tracing::debug!(
            rate_limit = rate_limiter.as_ref().map(RateLimiter::rate),
            retry = retryer.is_some(),
            cache_ttl_ms = cache_ttl.map(|ttl| ttl.as_millis() as u64),
            "Dispatcher configured"
        );

        Ok(Self {
            rate_limiter,
            retryer,
            cache_ttl,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            caches: Mutex::new(Vec::new()),
        })
    }

    /// The shared rate limiter, if rate limiting is enabled.
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// The retry driver, if retry is enabled.
    #[must_use]
    pub fn retryer(&self) -> Option<&Retryer<ClientError>> {
        self.retryer.as_ref()
    }

    /// Create a typed cache with the configured TTL.
    ///
    /// Returns `None` when caching is disabled. The cache's sweeper stops when
    /// [`Dispatcher::close`] is called.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher has already been closed.
    pub fn cache<K, V>(&self) -> ClientResult<Option<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::AlreadyClosed("dispatcher"));
        }
        let Some(ttl) = self.cache_ttl else { return Ok(None) };

        let cache = Cache::with_shutdown(ttl, &self.shutdown)?;
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches.retain(|barrier| barrier.is_live());
        caches.push(cache.sweep_barrier());
        Ok(Some(cache))
    }

    /// Run `operation` through the rate limiter and the retry loop.
    ///
    /// A cancellation while waiting for admission returns before any attempt.
    /// Without a retryer the operation runs exactly once.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait(cancel).await?;
        }

        match &self.retryer {
            Some(retryer) => Ok(retryer.execute_with_result(cancel, operation).await?),
            None => operation().await,
        }
    }

    /// Like [`Dispatcher::execute`], but serve fresh values from `cache`.
    ///
    /// A hit skips rate limiting and retry entirely. Only successful results
    /// are stored.
    pub async fn execute_cached<K, V, F, Fut>(
        &self,
        cache: Option<&Cache<K, V>>,
        key: K,
        cancel: &CancellationToken,
        operation: F,
    ) -> ClientResult<V>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<V>>,
    {
        match cache {
            Some(cache) => cache.get_or_compute(key, || self.execute(cancel, operation)).await,
            None => self.execute(cancel, operation).await,
        }
    }

    /// Stop the sweepers of every cache created through [`Dispatcher::cache`].
    ///
    /// Like [`Cache::close`], waits for sweeps already in progress; none run
    /// after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyClosed`] on a second call.
    pub fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyClosed("dispatcher"));
        }
        self.shutdown.cancel();

        let caches = {
            let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *caches)
        };
        let waited = caches.iter().filter(|barrier| barrier.wait()).count();
        tracing::debug!(caches = waited, "Dispatcher closed");
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rate_limiter", &self.rate_limiter)
            .field("retryer", &self.retryer)
            .field("cache_ttl", &self.cache_ttl)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
