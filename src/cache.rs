//! Schedule cache: an LRU-bounded mapping from graph fingerprint to a
//! previously-computed coloring, used to seed variants (spec.md §4.6).
//!
//! Grounded on the reference workflow engine's `WorkflowCache`
//! (`performance/cache.rs`): same `lru::LruCache` + `Mutex` shape, same
//! get/put/invalidate/clear surface, with the hit/miss counters and
//! fingerprint key this component's contract requires.

#![allow(clippy::unwrap_used)] // Mutex lock poisoning is unrecoverable here

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

use crate::model::Coloring;

const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct CacheEntry {
    coloring: Coloring,
    #[allow(dead_code)]
    created_at: std::time::Instant,
}

/// Process-wide cache, one per `Run`'s host process. All mutations occur
/// under a single internal mutex; reads return cloned values so callers may
/// mutate the retrieved coloring safely (spec.md §5).
pub struct ScheduleCache {
    entries: Mutex<LruCache<u64, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScheduleCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { entries: Mutex::new(LruCache::new(capacity)), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn get(&self, fingerprint: u64) -> Option<Coloring> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&fingerprint) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.coloring.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, fingerprint: u64, coloring: Coloring) {
        let mut entries = self.entries.lock().unwrap();
        entries.put(fingerprint, CacheEntry { coloring, created_at: std::time::Instant::now() });
    }

    pub fn invalidate(&self, fingerprint: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.pop(&fingerprint);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ScheduleCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
