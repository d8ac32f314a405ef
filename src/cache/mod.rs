//! Kernel entry cache
//!
//! Exact kernel matrices are only formed when the likelihood approximation is
//! verified against the exact value. Entries live under an unordered example
//! pair, so K(i,j) and K(j,i) share one slot.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Bytes charged per cached entry: pair key, value and LRU links
const ENTRY_BYTES: usize = 32;

/// Unordered pair of example indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExamplePair(usize, usize);

impl ExamplePair {
    fn new(i: usize, j: usize) -> Self {
        Self(i.min(j), i.max(j))
    }
}

/// LRU cache of exact kernel entries for one parameter setting
///
/// A cache is only valid for the transform it was filled under; callers create
/// a fresh one per verification.
pub struct KernelCache {
    entries: LruCache<ExamplePair, f64>,
    hits: u64,
    misses: u64,
}

impl KernelCache {
    /// Cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Room for the upper triangle of an `n × n` kernel matrix, bounded by
    /// `memory_bytes`
    pub fn for_examples(n: usize, memory_bytes: usize) -> Self {
        let triangle = n.saturating_mul(n + 1) / 2;
        Self::new(triangle.min(memory_bytes / ENTRY_BYTES))
    }

    /// Cached `K(i, j)`, computing and storing it on a miss
    pub fn get_or_compute<F>(&mut self, i: usize, j: usize, compute: F) -> f64
    where
        F: FnOnce() -> f64,
    {
        let pair = ExamplePair::new(i, j);
        if let Some(&value) = self.entries.get(&pair) {
            self.hits += 1;
            return value;
        }
        self.misses += 1;
        let value = compute();
        self.entries.put(pair, value);
        value
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            capacity: self.entries.cap().get(),
            size: self.entries.len(),
        }
    }
}

/// Hit/miss counters of a [`KernelCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
