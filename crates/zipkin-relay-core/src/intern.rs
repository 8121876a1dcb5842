// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A bounded LRU cache deduplicating the short strings read off the wire.
//!
//! Service names, operation names and tag keys repeat endlessly across spans;
//! interning them means every copy of `"http.status"` in memory is one shared
//! `Arc<str>`. The cache is capped by the byte size of the stored keys plus a
//! fixed per-entry overhead, and evicts least-recently-used entries once the
//! cap is exceeded. Lookups promote the entry to most-recently-used.
//!
//! There is no failure mode; the worst case is a miss and a fresh allocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Approximate fixed cost of one entry: the map entry, the list node and the
/// two `Arc` handles. Accounted on top of the key bytes against `max_bytes`.
pub const ENTRY_OVERHEAD: usize = 72;

const NIL: usize = usize::MAX;

/// Point-in-time counters of an [`InternCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Key bytes plus [`ENTRY_OVERHEAD`] per entry.
    pub bytes: usize,
    pub entries: usize,
}

/// Thread-safe bounded string interner. One mutex guards the map and the
/// recency list; lookups dominate, so contention stays low.
#[derive(Debug)]
pub struct InternCache {
    max_bytes: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<Arc<str>, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    key_bytes: usize,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct Node {
    key: Arc<str>,
    prev: usize,
    next: usize,
}

impl InternCache {
    pub fn new(max_bytes: usize) -> InternCache {
        InternCache {
            max_bytes,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                nodes: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
                key_bytes: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns a canonical `Arc<str>` equal to `value`. A recently interned
    /// equal string yields the previously stored handle, promoted to
    /// most-recently-used; otherwise a copy is stored as the new head.
    pub fn intern(&self, value: &str) -> Arc<str> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&slot) = inner.map.get(value) {
            inner.hits += 1;
            inner.unlink(slot);
            inner.link_front(slot);
            return inner.nodes[slot].key.clone();
        }

        inner.misses += 1;
        let key: Arc<str> = Arc::from(value);

        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.nodes[slot] = Node {
                    key: key.clone(),
                    prev: NIL,
                    next: NIL,
                };
                slot
            }
            None => {
                inner.nodes.push(Node {
                    key: key.clone(),
                    prev: NIL,
                    next: NIL,
                });
                inner.nodes.len() - 1
            }
        };
        inner.link_front(slot);
        inner.map.insert(key.clone(), slot);
        inner.key_bytes += key.len();

        // Evict from the tail until we are back under the cap. The entry we
        // just added is never evicted, so a single oversized string can push
        // the cache one entry past the cap.
        while inner.total_bytes() > self.max_bytes && inner.map.len() > 1 {
            inner.evict_tail();
        }

        key
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            bytes: inner.total_bytes(),
            entries: inner.map.len(),
        }
    }
}

impl Inner {
    fn total_bytes(&self) -> usize {
        self.key_bytes + ENTRY_OVERHEAD * self.map.len()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }

    fn link_front(&mut self, slot: usize) {
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn evict_tail(&mut self) {
        let slot = self.tail;
        debug_assert_ne!(slot, NIL);

        self.unlink(slot);
        let key = self.nodes[slot].key.clone();
        self.key_bytes -= key.len();
        self.map.remove(&key);
        self.nodes[slot].key = Arc::from("");
        self.free.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_inputs_share_one_handle() {
        let cache = InternCache::new(4096);
        let a = cache.intern("my-service");
        let b = cache.intern("my-service");
        assert!(Arc::ptr_eq(&a, &b));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_result_compares_equal_to_input() {
        let cache = InternCache::new(4096);
        assert_eq!(&*cache.intern("http.status"), "http.status");
        assert_eq!(&*cache.intern(""), "");
    }

    #[test]
    fn test_evicts_least_recently_used() {
        // room for roughly three one-byte entries
        let cache = InternCache::new(3 * (ENTRY_OVERHEAD + 1));
        let a = cache.intern("a");
        cache.intern("b");
        cache.intern("c");

        // touch "a" so "b" is now the coldest entry
        let a2 = cache.intern("a");
        assert!(Arc::ptr_eq(&a, &a2));

        cache.intern("d");
        assert_eq!(cache.stats().entries, 3);

        // "b" was evicted: interning it again is a miss with a fresh handle
        let misses = cache.stats().misses;
        cache.intern("b");
        assert_eq!(cache.stats().misses, misses + 1);

        // "a" survived
        let hits = cache.stats().hits;
        cache.intern("a");
        assert_eq!(cache.stats().hits, hits + 1);
    }

    #[test]
    fn test_size_never_exceeds_cap_by_more_than_one_entry() {
        let cap = 2 * (ENTRY_OVERHEAD + 8);
        let cache = InternCache::new(cap);
        for value in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            cache.intern(value);
            assert!(cache.stats().bytes <= cap + ENTRY_OVERHEAD + value.len());
        }
    }

    #[test]
    fn test_oversized_entry_is_still_returned() {
        let cache = InternCache::new(8);
        let big = "x".repeat(1024);
        let handle = cache.intern(&big);
        assert_eq!(&*handle, big.as_str());
        assert_eq!(cache.stats().entries, 1);
    }
}
