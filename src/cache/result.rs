//! Generation result cache.
//!
//! [`ResultCache`] maps a request [`Fingerprint`] to a previously produced
//! result. Entries live for `ttl` from creation, whether or not they are
//! read. When the cache is full, the entry with the lowest
//! `(access_count, last_accessed_at)` is evicted, so rarely used entries go
//! first and ties fall to the one touched longest ago.
//!
//! Expired entries are dropped lazily when looked up and in bulk by
//! [`cleanup()`](ResultCache::cleanup), which [`ResultCache::spawn`] runs on
//! a fixed period so keys that are never looked up again still get
//! reclaimed.
//!
//! Every operation, including the background sweep, runs under one mutex
//! per cache instance; none of them suspends while holding it.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::schedule::ScheduledJob;
use crate::sync::lock;
use crate::telemetry;
use crate::types::Fingerprint;
use crate::{PictorError, Result};

/// Configuration for the result cache.
///
/// ```rust
/// # use pictor::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_size(500)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 100.
    pub max_size: usize,
    /// Lifetime of an entry, measured from insertion. Default: 1 hour.
    pub ttl: Duration,
    /// Period of the background expiry sweep. Default: 5 minutes.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the period of the background expiry sweep.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PictorError::Configuration(
                "cache max_size must be at least 1".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(PictorError::Configuration(
                "cache ttl must be non-zero".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(PictorError::Configuration(
                "cache cleanup interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    /// Logical clock of the last touch; orders accesses that share an `Instant`.
    touched: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created_at) > ttl
    }

    fn eviction_rank(&self) -> (u64, Instant, u64) {
        (self.access_count, self.last_accessed_at, self.touched)
    }
}

struct CacheState<V> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    clock: u64,
}

impl<V> CacheState<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory TTL cache with frequency-then-recency eviction.
pub struct ResultCache<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    sweeper: Mutex<Option<ScheduledJob>>,
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache without background cleanup.
    ///
    /// Fails with [`PictorError::Configuration`] if `config` does not pass
    /// [`CacheConfig::validate`].
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
            }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a result.
    ///
    /// Returns `None` on a miss or when the entry has outlived its TTL (the
    /// expired entry is removed). A hit counts as an access for eviction.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let expired = state.entries.get(key)?.is_expired(now, self.config.ttl);
        if expired {
            state.entries.remove(key);
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL).increment(1);
            return None;
        }
        let touched = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        entry.touched = touched;
        Some(entry.value.clone())
    }

    /// Insert or replace a result.
    ///
    /// Inserting a new key into a full cache evicts exactly one entry first.
    /// The stored entry starts with an access count of zero.
    pub fn set(&self, key: Fingerprint, value: V) {
        let now = Instant::now();
        let mut state = lock(&self.state);
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.eviction_rank())
                .map(|(k, _)| *k);
            if let Some(victim) = victim {
                state.entries.remove(&victim);
                metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
                debug!(fingerprint = %victim, "evicted cache entry");
            }
        }
        let touched = state.tick();
        state.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                touched,
            },
        );
    }

    /// Remove an entry. No-op if absent.
    pub fn remove(&self, key: &Fingerprint) {
        lock(&self.state).entries.remove(key);
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let removed = before - state.entries.len();
        if removed > 0 {
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL).increment(removed as u64);
            debug!(removed, remaining = state.entries.len(), "cache cleanup");
        }
        removed
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    /// Stop the background cleanup job, if one is running.
    pub async fn shutdown(&self) {
        let job = lock(&self.sweeper).take();
        if let Some(job) = job {
            job.shutdown().await;
        }
    }
}

impl<V: Clone + Send + 'static> ResultCache<V> {
    /// Create a cache and start its periodic cleanup job.
    ///
    /// The job holds only a weak reference, so dropping the last `Arc`
    /// ends it; [`shutdown()`](Self::shutdown) stops it explicitly.
    pub fn spawn(config: CacheConfig) -> Result<Arc<Self>> {
        let period = config.cleanup_interval;
        let cache = Arc::new(Self::new(config)?);
        let weak: Weak<Self> = Arc::downgrade(&cache);
        let job = ScheduledJob::spawn("result-cache-cleanup", period, move || {
            match weak.upgrade() {
                Some(cache) => {
                    cache.cleanup();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        })?;
        *lock(&cache.sweeper) = Some(job);
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerationParams;

    fn key(prompt: &str) -> Fingerprint {
        Fingerprint::of(prompt, &GenerationParams::new())
    }

    #[test]
    fn config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, 100);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn config_rejects_zero_values() {
        assert!(CacheConfig::new().max_size(0).validate().is_err());
        assert!(CacheConfig::new().ttl(Duration::ZERO).validate().is_err());
        assert!(
            CacheConfig::new()
                .cleanup_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_does_not_evict() {
        let cache = ResultCache::new(CacheConfig::new().max_size(2)).unwrap();
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("a"), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), Some(3));
        assert_eq!(cache.get(&key("b")), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_access_count() {
        let cache = ResultCache::new(CacheConfig::new().max_size(2)).unwrap();
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.get(&key("a"));
        cache.get(&key("a"));
        cache.get(&key("b"));
        // "a" is overwritten and drops back to zero accesses.
        cache.set(key("a"), 10);
        cache.set(key("c"), 3);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(2));
    }
}
