//! Weak-Reference Resource Cache
//!
//! Wrapping the same live native handle twice with independent owning
//! holders would release it twice. A [`ResourceCache`] maps handle identity
//! to a weak observer of the holder currently owning it, so repeated
//! cached captures of a live handle share one box and one release.
//!
//! # Design:
//! - One cache per resource kind, since handle values are only unique
//!   within a kind
//! - Entries are weak: the cache never keeps a resource alive
//! - Stale entries are evicted lazily, on lookup of that key only
//! - The whole lookup-or-capture sequence runs under the cache lock, so
//!   two threads capturing the same handle always end up sharing one box

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::engine::holder::{Holder, WeakHolder};
use crate::engine::kind::{NativeHandle, ResourceKind};

/// Runtime statistics for a [`ResourceCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live holder.
    pub hits: usize,
    /// Lookups that had to capture a new holder.
    pub misses: usize,
    /// Stale entries erased on lookup.
    pub evictions: usize,
    /// Entries currently stored, including stale ones not yet looked up.
    pub entries: usize,
}

struct CacheInner<K: ResourceKind> {
    entries: HashMap<NativeHandle, WeakHolder<K>>,
    hits: usize,
    misses: usize,
    evictions: usize,
}

impl<K: ResourceKind> CacheInner<K> {
    /// Find a live holder for `handle`, erasing the entry if it is stale.
    fn lookup(&mut self, handle: NativeHandle) -> Option<Holder<K>> {
        let live = self.entries.get(&handle).map(WeakHolder::upgrade)?;
        match live {
            Some(holder) => {
                self.hits += 1;
                debug!(kind = K::CLASS_NAME, %handle, "Returning cached resource");
                Some(holder)
            }
            None => {
                self.entries.remove(&handle);
                self.evictions += 1;
                debug!(kind = K::CLASS_NAME, %handle, "Evicted stale cache entry");
                None
            }
        }
    }
}

/// Per-kind map from native handle to a weak observer of its holder.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use holders_core::{HolderContext, MemPool, RecordingDriver};
/// let ctx = HolderContext::new(Arc::new(RecordingDriver::new()));
/// let a = ctx.capture_cached::<MemPool>(0x1000usize, ());
/// let b = ctx.capture_cached::<MemPool>(0x1000usize, ());
/// assert!(a.same_box(&b));
/// ```
pub struct ResourceCache<K: ResourceKind> {
    inner: Mutex<CacheInner<K>>,
}

impl<K: ResourceKind> ResourceCache<K> {
    /// Create a new, empty cache.
    pub fn new() -> Self {
        debug!(kind = K::CLASS_NAME, "Creating ResourceCache");
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Return the live holder for `handle`, or install the one built by
    /// `capture` on a miss.
    ///
    /// `capture` runs with the cache locked. It must not touch this cache;
    /// release actions never do, so dropping holders inside it is fine.
    pub fn get_or_capture<F>(&self, handle: NativeHandle, capture: F) -> Holder<K>
    where
        F: FnOnce() -> Holder<K>,
    {
        let mut inner = self.lock();
        if let Some(holder) = inner.lookup(handle) {
            return holder;
        }

        inner.misses += 1;
        debug!(kind = K::CLASS_NAME, %handle, "Resource cache miss, capturing");
        let holder = capture();
        inner.entries.insert(handle, holder.downgrade());
        holder
    }

    /// Return the live holder for `handle`, if any.
    ///
    /// A stale entry found here is evicted.
    pub fn lookup(&self, handle: NativeHandle) -> Option<Holder<K>> {
        self.lock().lookup(handle)
    }

    /// Snapshot the cache's runtime statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
        }
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: ResourceKind> Default for ResourceCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kind::MemPool;

    fn handle(raw: usize) -> NativeHandle {
        NativeHandle::new(raw)
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = ResourceCache::<MemPool>::new();

        let first = cache.get_or_capture(handle(0x1000), Holder::default);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 0);

        let second = cache.get_or_capture(handle(0x1000), || panic!("should not be called"));
        assert!(second.same_box(&first));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_cache_does_not_keep_holder_alive() {
        let cache = ResourceCache::<MemPool>::new();
        let holder = cache.get_or_capture(handle(0x1000), Holder::default);
        drop(holder);

        // Entry is stale but only evicted when looked up.
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(handle(0x1000)).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_stale_entry_replaced_on_capture() {
        let cache = ResourceCache::<MemPool>::new();
        let first = cache.get_or_capture(handle(0x1000), Holder::default);
        let observer = first.downgrade();
        drop(first);

        let second = cache.get_or_capture(handle(0x1000), Holder::default);
        assert!(observer.upgrade().is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 1);
        assert!(cache.lookup(handle(0x1000)).is_some_and(|h| h.same_box(&second)));
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = ResourceCache::<MemPool>::new();
        let a = cache.get_or_capture(handle(0x1), Holder::default);
        let b = cache.get_or_capture(handle(0x2), Holder::default);
        assert!(!a.same_box(&b));
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_lookup_unknown_key() {
        let cache = ResourceCache::<MemPool>::default();
        assert!(cache.lookup(handle(0xabc)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 0);
    }
}
