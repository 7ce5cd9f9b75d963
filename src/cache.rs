//! In-memory TTL caches for search results and individual skills.
//!
//! [`TtlCache`] wraps a [`moka`] cache with per-entry expiry. Every read
//! re-checks the entry's absolute expiry, so an entry is a miss as soon as
//! its TTL elapses whether or not the background sweep has run. The sweep
//! is a tokio task owned by the cache: it flushes expired entries on a fixed
//! interval and stops on [`TtlCache::shutdown`] or when the cache is dropped.
//!
//! [`SearchCache`] and [`SkillCache`] add typed, structured keys on top.
//! Keys are hashed field by field, so no query text can collide with
//! another key the way delimiter-joined strings can.

use std::hash::Hash;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::types::{ExternalSkill, SearchOptions, SearchResult, SourceType};

/// A cached value with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// When the entry stops being served.
    pub expires_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            ttl,
        }
    }

    /// Whether the entry is still servable at `now`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Expires each entry after its own TTL, restarting the clock on overwrite.
struct EntryExpiry;

impl<K, V> Expiry<K, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Generic key/value cache with a default TTL and a background sweep.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, CacheEntry<V>>,
    default_ttl: Duration,
    sweeper: CancellationToken,
    _sweeper_guard: DropGuard,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and start its sweep task.
    ///
    /// The sweep needs a tokio runtime; outside one the cache still works and
    /// relies on read-time expiry alone.
    pub fn new(default_ttl: Duration, sweep_interval: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        let sweeper = CancellationToken::new();
        spawn_sweeper(inner.clone(), sweeper.clone(), sweep_interval);
        Self {
            inner,
            default_ttl,
            _sweeper_guard: sweeper.clone().drop_guard(),
            sweeper,
        }
    }

    /// Look up `key`. Expired entries are misses.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.get(key).await?;
        if entry.is_live(Instant::now()) {
            Some(entry.value)
        } else {
            None
        }
    }

    /// Store `value` under `key` with the default TTL.
    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Store `value` under `key` with an explicit TTL.
    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.insert(key, CacheEntry::new(value, ttl)).await;
    }

    /// Remove `key` immediately.
    pub async fn delete(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Remove every entry immediately.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Flush expired entries now instead of waiting for the next sweep.
    pub async fn sweep(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Approximate number of stored entries, including not-yet-swept expired ones.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// The TTL applied by [`set`](Self::set).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Stop the background sweep. Reads and writes keep working.
    pub fn shutdown(&self) {
        self.sweeper.cancel();
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("default_ttl", &self.default_ttl)
            .field("entry_count", &self.inner.entry_count())
            .finish_non_exhaustive()
    }
}

fn spawn_sweeper<K, V>(cache: Cache<K, V>, cancel: CancellationToken, interval: Duration)
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime; cache sweep disabled");
        return;
    };
    handle.spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => cache.run_pending_tasks().await,
            }
        }
        tracing::trace!("cache sweep stopped");
    });
}

/// Key for one source's answer to one page of one query.
///
/// Holds the options exactly as dispatched to the provider, so two requests
/// share a key only when the provider would have seen the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    source: SourceType,
    query: String,
    tags: Vec<String>,
    page: u32,
    per_page: u32,
}

impl SearchKey {
    /// Build a key from already-normalized options.
    pub fn new(source: &SourceType, options: &SearchOptions) -> Self {
        Self {
            source: source.clone(),
            query: options.query.clone(),
            tags: options.tags.clone(),
            page: options.page,
            per_page: options.per_page,
        }
    }
}

/// Key for one skill at one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SkillKey {
    source: SourceType,
    id: String,
}

impl SkillKey {
    /// Build a key for `id` at `source`.
    pub fn new(source: &SourceType, id: &str) -> Self {
        Self {
            source: source.clone(),
            id: id.to_owned(),
        }
    }
}

/// Search results keyed by `(source, query, tags, page, per_page)`.
#[derive(Debug)]
pub struct SearchCache {
    cache: TtlCache<SearchKey, SearchResult>,
}

impl SearchCache {
    /// Create a search cache.
    pub fn new(ttl: Duration, sweep_interval: Duration, max_entries: u64) -> Self {
        Self {
            cache: TtlCache::new(ttl, sweep_interval, max_entries),
        }
    }

    /// Cached result for `source` and `options`, if any.
    pub async fn get(&self, source: &SourceType, options: &SearchOptions) -> Option<SearchResult> {
        self.cache.get(&SearchKey::new(source, options)).await
    }

    /// Cache `result` for `source` and `options`.
    pub async fn set(&self, source: &SourceType, options: &SearchOptions, result: SearchResult) {
        self.cache.set(SearchKey::new(source, options), result).await;
    }

    /// Remove one cached page.
    pub async fn delete(&self, source: &SourceType, options: &SearchOptions) {
        self.cache.delete(&SearchKey::new(source, options)).await;
    }

    /// Drop every cached search.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

/// Individual skills keyed by `(source, id)`.
#[derive(Debug)]
pub struct SkillCache {
    cache: TtlCache<SkillKey, ExternalSkill>,
}

impl SkillCache {
    /// Create a skill cache.
    pub fn new(ttl: Duration, sweep_interval: Duration, max_entries: u64) -> Self {
        Self {
            cache: TtlCache::new(ttl, sweep_interval, max_entries),
        }
    }

    /// Cached skill `id` from `source`, if any.
    pub async fn get(&self, source: &SourceType, id: &str) -> Option<ExternalSkill> {
        self.cache.get(&SkillKey::new(source, id)).await
    }

    /// Cache `skill` as the answer for `id` at `source`.
    pub async fn set(&self, source: &SourceType, id: &str, skill: ExternalSkill) {
        self.cache.set(SkillKey::new(source, id), skill).await;
    }

    /// Remove one cached skill.
    pub async fn delete(&self, source: &SourceType, id: &str) {
        self.cache.delete(&SkillKey::new(source, id)).await;
    }

    /// Drop every cached skill.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
