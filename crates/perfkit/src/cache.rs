// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A bounded, least-recently-used cache.
//!
//! [`RecencyCache`] holds at most `capacity` entries. Reading or writing a key marks it as
//! most recently used; inserting a new key into a full cache evicts exactly one entry, the
//! least recently used one. Entries remember when they were stored so callers can apply a
//! maximum age with [`RecencyCache::get_fresh`].
//!
//! The cache is a cheap handle: clones share the same storage, which is guarded by a
//! single lock so that a hit and a concurrent eviction never interleave.

use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tick::Clock;

use crate::error::ConfigurationError;

/// Name of a cache, used in logs and in [`PerformanceStats`](crate::stats::PerformanceStats).
pub type CacheName = &'static str;

/// A cached value together with the instant it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Creates an entry stored at the given instant.
    #[must_use]
    pub fn new(value: V, stored_at: Instant) -> Self {
        Self { value, stored_at }
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry, returning the cached value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the value was stored.
    #[must_use]
    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    /// How long the entry has been stored, as observed at `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) <= max_age
    }
}

/// Size reporting for caches of any key and value type.
///
/// Lets a stats query enumerate heterogeneous caches by name.
pub trait CacheSize: Send + Sync {
    /// The cache name.
    fn name(&self) -> CacheName;

    /// The current number of entries.
    fn len(&self) -> usize;

    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed-capacity key-value store with least-recently-used eviction.
///
/// # Examples
///
/// ```
/// use perfkit::cache::RecencyCache;
/// use tick::Clock;
///
/// # fn example(clock: Clock) -> Result<(), perfkit::error::ConfigurationError> {
/// let cache = RecencyCache::new("example", 2, clock)?;
///
/// cache.set("a", 1);
/// cache.set("b", 2);
/// assert_eq!(cache.get(&"a"), Some(1));
///
/// // "b" is now the least recently used key and is evicted.
/// cache.set("c", 3);
/// assert!(!cache.contains(&"b"));
/// assert_eq!(cache.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct RecencyCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

struct CacheInner<K, V> {
    name: CacheName,
    clock: Clock,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> RecencyCache<K, V>
where
    K: Hash + Eq,
{
    /// Creates an empty cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `capacity` is zero.
    pub fn new(name: CacheName, capacity: usize, clock: Clock) -> Result<Self, ConfigurationError> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| ConfigurationError::must_be_positive(format!("{name}.capacity")))?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                name,
                clock,
                entries: Mutex::new(LruCache::new(capacity)),
            }),
        })
    }

    /// Returns the value for `key` and marks it as most recently used.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.inner.entries.lock().get(key).map(|entry| entry.value.clone())
    }

    /// Returns the full entry for `key` and marks it as most recently used.
    #[must_use]
    pub fn get_entry<Q>(&self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.inner.entries.lock().get(key).cloned()
    }

    /// Returns the value for `key` if it was stored no longer than `max_age` ago.
    ///
    /// A stale entry is removed and reported as absent. A fresh entry is marked as most
    /// recently used.
    #[must_use]
    pub fn get_fresh<Q>(&self, key: &Q, max_age: Duration) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let now = self.inner.clock.instant();
        let mut entries = self.inner.entries.lock();

        let fresh = entries.peek(key)?.is_fresh(now, max_age);
        if !fresh {
            entries.pop(key);
            tracing::trace!(cache.name = self.inner.name, "stale entry removed");
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key` and marks it as most recently used.
    ///
    /// When `key` is new and the cache is full, exactly one entry, the least recently used,
    /// is evicted first.
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, self.inner.clock.instant());
        let mut entries = self.inner.entries.lock();

        // `push` also hands back the previous entry of a replaced key; only a key that is
        // no longer present was evicted.
        if let Some((displaced, _)) = entries.push(key, entry)
            && !entries.contains(&displaced)
        {
            tracing::trace!(
                cache.name = self.inner.name,
                cache.capacity = entries.cap().get(),
                "least recently used entry evicted"
            );
        }
    }

    /// Returns `true` if `key` is cached. Does not change recency.
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.lock().contains(key)
    }

    /// Removes `key`, returning its value if it was cached.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.lock().pop(key).map(CacheEntry::into_value)
    }

    /// Removes all entries. The capacity is retained.
    pub fn clear(&self) {
        let mut entries = self.inner.entries.lock();
        let removed = entries.len();
        entries.clear();
        tracing::debug!(cache.name = self.inner.name, removed, "cache cleared");
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.entries.lock().cap().get()
    }

    /// Keys in recency order, least recently used first.
    ///
    /// The first key is the next eviction victim.
    #[must_use]
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.entries.lock().iter().rev().map(|(key, _)| key.clone()).collect()
    }

    /// The cache name.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.inner.name
    }
}

impl<K, V> CacheSize for RecencyCache<K, V>
where
    K: Hash + Eq + Send,
    V: Send,
{
    fn name(&self) -> CacheName {
        self.inner.name
    }

    fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

impl<K, V> Clone for RecencyCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Hash + Eq, V> Debug for RecencyCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.entries.lock();
        f.debug_struct("RecencyCache")
            .field("name", &self.inner.name)
            .field("len", &entries.len())
            .field("capacity", &entries.cap().get())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use tick::ClockControl;

    use super::*;

    fn cache(capacity: usize) -> RecencyCache<String, u32> {
        RecencyCache::new("test", capacity, ClockControl::new().to_clock()).unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let error = RecencyCache::<String, u32>::new("api_cache", 0, Clock::new_frozen()).unwrap_err();

        assert_eq!(error.setting, "api_cache.capacity");
    }

    #[test]
    fn get_on_empty_cache_is_absent() {
        let cache = cache(3);

        assert_eq!(cache.get("missing"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_keeps_size_and_refreshes_recency() {
        let cache = cache(2);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);

        cache.set("a".into(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["b".to_string(), "a".to_string()]);

        cache.set("c".into(), 3);
        assert_eq!(cache.get("a"), Some(10));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn exactly_one_eviction_per_new_key() {
        let cache = cache(3);
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            cache.set(key.into(), u32::try_from(i).unwrap());
        }

        cache.set("d".into(), 3);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string(), "d".to_string()]);
    }

    #[test]
    fn contains_does_not_refresh_recency() {
        let cache = cache(2);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);

        assert!(cache.contains("a"));
        cache.set("c".into(), 3);

        assert!(!cache.contains("a"));
    }

    #[test]
    fn remove_and_clear() {
        let cache = cache(4);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);

        cache.set("c".into(), 3);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn clones_share_storage() {
        let cache = cache(2);
        let other = cache.clone();

        other.set("a".into(), 1);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(CacheSize::len(&cache), 1);
        assert_eq!(CacheSize::name(&cache), "test");
    }

    #[test]
    fn get_fresh_expires_old_entries() {
        let control = ClockControl::new();
        let cache = RecencyCache::new("status", 4, control.to_clock()).unwrap();
        cache.set("snapshot", 7);

        control.advance(Duration::from_secs(10));
        assert_eq!(cache.get_fresh(&"snapshot", Duration::from_secs(30)), Some(7));

        control.advance(Duration::from_secs(25));
        assert_eq!(cache.get_fresh(&"snapshot", Duration::from_secs(30)), None);
        assert!(!cache.contains(&"snapshot"));
    }

    #[test]
    fn entry_reports_age() {
        let control = ClockControl::new();
        let cache = RecencyCache::new("status", 1, control.to_clock()).unwrap();
        cache.set(1_u8, "one");

        control.advance(Duration::from_secs(3));

        let entry = cache.get_entry(&1).unwrap();
        assert_eq!(entry.age(control.to_clock().instant()), Duration::from_secs(3));
        assert_eq!(*entry.value(), "one");
    }

    #[test]
    fn debug_output_names_cache() {
        let cache = cache(5);
        cache.set("a".into(), 1);

        let debug = format!("{cache:?}");

        assert!(debug.contains("test"), "got: {debug}");
        assert!(debug.contains("capacity: 5"), "got: {debug}");
    }
}
