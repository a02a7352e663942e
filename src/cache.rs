//! Thread-safe semantic cache: exact-match lookup with a cosine-similarity
//! fallback, LRU eviction, and TTL expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::embedding::cosine_similarity;
use crate::error::{CacheError, Result};

/// Point-in-time access and hit/miss counters for a [`SemanticCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Queries answered from the cache (exact or similarity match).
    pub hits: u64,
    /// Queries that found no usable entry.
    pub misses: u64,
    /// Entries evicted to make room for a new one.
    pub evictions: u64,
    /// Entries found but discarded for having exceeded their TTL.
    pub expired: u64,
    /// Total `get` calls made.
    pub total_queries: u64,
}

impl CacheStats {
    /// Fraction of queries answered from the cache, in `[0.0, 1.0]`.
    /// Returns 0.0 when no queries have been made yet.
    #[must_use]
    pub fn hit_rate(self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_queries as f64
        }
    }
}

struct Entry<V> {
    query_embedding: Vec<f32>,
    result: V,
    inserted_at: Instant,
    access_count: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion/access order, oldest (least-recently-used) at the front.
    order: VecDeque<String>,
    stats: CacheStats,
}

/// A thread-safe LRU + TTL + cosine-similarity cache keyed on query text.
///
/// A single [`Mutex`] guards the whole structure (no method calls another
/// public method while holding the lock, so a simple mutex suffices where
/// the original design called for a reentrant lock).
pub struct SemanticCache<V> {
    max_size: usize,
    ttl: Duration,
    similarity_threshold: f32,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> SemanticCache<V> {
    /// Creates a new cache. A `max_size` of zero is legal: the cache never
    /// stores anything and every `get` is a miss.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration, similarity_threshold: f32) -> Self {
        Self {
            max_size,
            ttl,
            similarity_threshold,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner<V>>> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned.into())
    }

    fn touch(inner: &mut Inner<V>, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.to_string());
    }

    /// Looks up `query`, first by exact text match, then (if that entry is
    /// absent or expired) by cosine similarity against every live entry's
    /// embedding. Returns the cached result on a hit, or `None` on a miss.
    pub fn get(&self, query: &str, query_embedding: &[f32]) -> Result<Option<V>> {
        let mut inner = self.lock()?;
        inner.stats.total_queries += 1;

        if let Some(entry) = inner.entries.get(query) {
            if entry.inserted_at.elapsed() > self.ttl {
                inner.entries.remove(query);
                if let Some(pos) = inner.order.iter().position(|k| k == query) {
                    inner.order.remove(pos);
                }
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                return Ok(None);
            }
            let result = entry.result.clone();
            if let Some(entry) = inner.entries.get_mut(query) {
                entry.access_count += 1;
            }
            Self::touch(&mut inner, query);
            inner.stats.hits += 1;
            return Ok(Some(result));
        }

        let best_match = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() <= self.ttl)
            .map(|(key, entry)| (key.clone(), cosine_similarity(query_embedding, &entry.query_embedding)))
            .filter(|&(_, similarity)| similarity >= self.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best_match {
            Some((key, _)) => {
                let result = inner.entries[&key].result.clone();
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.access_count += 1;
                }
                Self::touch(&mut inner, &key);
                inner.stats.hits += 1;
                Ok(Some(result))
            }
            None => {
                inner.stats.misses += 1;
                Ok(None)
            }
        }
    }

    /// Inserts or replaces the cached result for `query`, evicting the
    /// least-recently-used entry first if the cache is full.
    pub fn put(&self, query: &str, query_embedding: Vec<f32>, result: V) -> Result<()> {
        if self.max_size == 0 {
            return Ok(());
        }
        let mut inner = self.lock()?;

        if inner.entries.len() >= self.max_size && !inner.entries.contains_key(query) {
            if let Some(lru_key) = inner.order.pop_front() {
                inner.entries.remove(&lru_key);
                inner.stats.evictions += 1;
            }
        }

        if let Some(pos) = inner.order.iter().position(|k| k == query) {
            inner.order.remove(pos);
        }
        inner.entries.insert(
            query.to_string(),
            Entry {
                query_embedding,
                result,
                inserted_at: Instant::now(),
                access_count: 0,
            },
        );
        inner.order.push_back(query.to_string());
        Ok(())
    }

    /// Removes every entry, leaving cumulative statistics untouched.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    /// Removes every entry whose TTL has elapsed, returning how many were
    /// removed.
    pub fn clear_expired(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired_keys {
            inner.entries.remove(key);
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
        }
        inner.stats.expired += expired_keys.len() as u64;
        Ok(expired_keys.len())
    }

    /// Returns a snapshot of the cache's cumulative statistics.
    pub fn stats(&self) -> Result<CacheStats> {
        Ok(self.lock()?.stats)
    }

    /// Returns the number of live entries (including expired-but-not-yet-swept ones).
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// Whether the cache currently holds zero entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SemanticCache<String> {
        SemanticCache::new(2, Duration::from_secs(3600), 0.92)
    }

    #[test]
    fn zero_capacity_never_stores_and_every_get_is_a_miss() {
        let cache = SemanticCache::new(0, Duration::from_secs(1), 0.9);
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        assert_eq!(cache.len().unwrap(), 0);
        let hit = cache.get("a", vec![1.0, 0.0].as_slice()).unwrap();
        assert_eq!(hit, None);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn exact_match_hits() {
        let cache = cache();
        cache.put("xin chào", vec![1.0, 0.0], "hello".to_string()).unwrap();
        let hit = cache.get("xin chào", vec![1.0, 0.0].as_slice()).unwrap();
        assert_eq!(hit, Some("hello".to_string()));
        assert_eq!(cache.stats().unwrap().hits, 1);
    }

    #[test]
    fn similarity_match_hits_above_threshold() {
        let cache = SemanticCache::new(2, Duration::from_secs(3600), 0.9);
        cache.put("câu hỏi gốc", vec![1.0, 0.0, 0.0], "answer".to_string()).unwrap();
        let hit = cache.get("câu hỏi khác", vec![0.99, 0.01, 0.0].as_slice()).unwrap();
        assert_eq!(hit, Some("answer".to_string()));
    }

    #[test]
    fn dissimilar_query_misses() {
        let cache = cache();
        cache.put("câu hỏi gốc", vec![1.0, 0.0], "answer".to_string()).unwrap();
        let hit = cache.get("câu hỏi khác", vec![0.0, 1.0].as_slice()).unwrap();
        assert_eq!(hit, None);
        assert_eq!(cache.stats().unwrap().misses, 1);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = cache();
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        cache.put("b", vec![0.0, 1.0], "vb".to_string()).unwrap();
        // touch "a" so "b" becomes the LRU entry
        cache.get("a", vec![1.0, 0.0].as_slice()).unwrap();
        cache.put("c", vec![0.5, 0.5], "vc".to_string()).unwrap();

        assert_eq!(cache.len().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().evictions, 1);
        assert_eq!(cache.get("b", vec![0.0, 1.0].as_slice()).unwrap(), None);
    }

    #[test]
    fn expired_entry_counts_as_miss_and_expired() {
        let cache = SemanticCache::new(2, Duration::from_millis(1), 0.9);
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let hit = cache.get("a", vec![1.0, 0.0].as_slice()).unwrap();
        assert_eq!(hit, None);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn clear_expired_sweeps_without_a_get_call() {
        let cache = SemanticCache::new(2, Duration::from_millis(1), 0.9);
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let removed = cache.clear_expired().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[test]
    fn hit_rate_computed_correctly() {
        let cache = cache();
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        cache.get("a", vec![1.0, 0.0].as_slice()).unwrap();
        cache.get("zzz", vec![0.0, 1.0].as_slice()).unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_queries, 2);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clear_removes_entries_but_keeps_stats() {
        let cache = cache();
        cache.put("a", vec![1.0, 0.0], "va".to_string()).unwrap();
        cache.get("a", vec![1.0, 0.0].as_slice()).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.len().unwrap(), 0);
        assert_eq!(cache.stats().unwrap().hits, 1);
    }
}
