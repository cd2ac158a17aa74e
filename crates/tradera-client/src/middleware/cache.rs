//! In-memory TTL cache with lazy and background expiry.
//!
//! Expired entries are dropped when a read finds them, and a background task
//! sweeps the whole map every `ttl / 2`. Between sweeps `len()` and `keys()`
//! may still count entries that have expired.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};

/// Upper bound on the sweep period, however long the default TTL.
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Stand-in expiry for TTLs that overflow `Instant`; about thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now)
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Shared<K, V> {
    default_ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
    /// Child of the caller's token; only this one is ever cancelled here.
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<K, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash, V> Shared<K, V> {
    /// Drop every expired entry, returning how many were removed.
    fn sweep(&self) -> usize {
        let mut entries = self.lock();
        if self.shutdown.is_cancelled() {
            return 0;
        }

        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// Weak handle an owner keeps to wait out a sweep in progress without
/// keeping the cache alive.
pub(crate) trait SweepBarrier: Send + Sync {
    /// Return once no sweep holds the store. False if the cache is gone.
    fn wait(&self) -> bool;

    /// True while some [`Cache`] handle still exists.
    fn is_live(&self) -> bool;
}

impl<K: Send, V: Send> SweepBarrier for Weak<Shared<K, V>> {
    fn wait(&self) -> bool {
        let Some(shared) = self.upgrade() else { return false };
        drop(shared.lock());
        true
    }

    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

impl<K, V> Drop for Shared<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Typed TTL cache. Cloning yields another handle to the same store.
pub struct Cache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("default_ttl", &self.shared.default_ttl)
            .field("entries", &self.shared.lock().len())
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache and start its sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] for a zero TTL or when called
    /// outside a Tokio runtime.
    pub fn new(default_ttl: Duration) -> ClientResult<Self> {
        Self::with_shutdown(default_ttl, &CancellationToken::new())
    }

    /// Create a cache whose sweeper also stops when `shutdown` is cancelled.
    ///
    /// The cache never cancels `shutdown` itself; closing or dropping it only
    /// stops its own sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] for a zero TTL or when called
    /// outside a Tokio runtime.
    pub fn with_shutdown(
        default_ttl: Duration,
        shutdown: &CancellationToken,
    ) -> ClientResult<Self> {
        if default_ttl.is_zero() {
            return Err(ClientError::invalid_config("cache_ttl", "must be greater than zero"));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ClientError::invalid_config("cache_ttl", format!("caching needs a Tokio runtime: {e}"))
        })?;

        let shared = Arc::new(Shared {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
            shutdown: shutdown.child_token(),
            closed: AtomicBool::new(false),
        });

        let interval = (default_ttl / 2).clamp(Duration::from_millis(1), MAX_SWEEP_PERIOD);
        runtime.spawn(sweep_loop(Arc::downgrade(&shared), shared.shutdown.clone(), interval));

        Ok(Self { shared })
    }

    /// Look up a fresh value. An expired entry is removed and reported as missing.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.shared.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value with the default TTL, replacing any existing entry.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.shared.default_ttl);
    }

    /// Store a value with a custom TTL, replacing any existing entry.
    ///
    /// `Duration::MAX` and other TTLs past the end of the clock mean "never
    /// expires" in practice.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = expiry_after(ttl);
        self.shared.lock().insert(key, Entry { value, expires_at });
    }

    /// Remove an entry.
    pub fn delete(&self, key: &K) {
        self.shared.lock().remove(key);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.shared.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.shared.lock().is_empty()
    }

    /// Stored keys, including expired ones not yet swept.
    pub fn keys(&self) -> Vec<K> {
        self.shared.lock().keys().cloned().collect()
    }

    /// Default TTL applied by [`Cache::set`].
    pub fn default_ttl(&self) -> Duration {
        self.shared.default_ttl
    }

    /// Return the cached value for `key`, or compute and store it.
    ///
    /// Failed computations are returned to the caller and never cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Stop the background sweeper.
    ///
    /// Waits for a sweep already in progress; no sweep runs after this
    /// returns. Reads and writes keep working with lazy expiry only.
    ///
    /// # Errors
    ///
    /// A cache may be closed once; a second call returns
    /// [`ClientError::AlreadyClosed`].
    pub fn close(&self) -> ClientResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyClosed("cache"));
        }

        self.shared.shutdown.cancel();
        // A sweep holding the lock finishes before we return; later sweeps see the
        // cancelled token under the same lock and skip.
        drop(self.shared.lock());
        Ok(())
    }

    pub(crate) fn sweep_barrier(&self) -> Box<dyn SweepBarrier> {
        Box::new(Arc::downgrade(&self.shared))
    }

    /// True once the sweeper has been stopped, either by [`Cache::close`] or by
    /// the shutdown token passed to [`Cache::with_shutdown`].
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

async fn sweep_loop<K, V>(weak: Weak<Shared<K, V>>, shutdown: CancellationToken, period: Duration)
where
    K: Eq + Hash,
{
    let mut interval = tokio::time::interval_at(expiry_after(period), period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(shared) = weak.upgrade() else { break };
        let removed = shared.sweep();
        if removed > 0 {
            tracing::debug!(count = removed, "Cache sweep removed expired entries");
        }
    }

    tracing::trace!("Cache sweeper stopped");
}
