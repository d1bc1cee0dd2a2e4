//! Bounded embedding cache keyed by exact text key.
//!
//! Eviction follows insertion order, not access order: once the cache is
//! full, inserting a new key drops the key that was inserted first. Reads
//! go through `peek` so they never promote an entry.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;

use crate::semantic::embeddings::Embedding;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct EmbeddingCache {
    /// `None` when the configured capacity is zero.
    entries: Option<LruCache<String, Embedding>>,
    stats: CacheStats,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.cap().get())
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.contains(key))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Look up an embedding, counting the hit or miss.
    pub fn get(&mut self, key: &str) -> Option<Embedding> {
        let found = self
            .entries
            .as_ref()
            .and_then(|entries| entries.peek(key))
            .cloned();

        match found {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        found
    }

    /// Insert an embedding.
    ///
    /// Re-inserting an existing key replaces the value but keeps its
    /// original position in the eviction order.
    pub fn insert(&mut self, key: String, embedding: Embedding) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };

        if let Some(existing) = entries.peek_mut(&key) {
            *existing = embedding;
            return;
        }

        if let Some((evicted, _)) = entries.push(key, embedding) {
            self.stats.evictions += 1;
            log::debug!("evicted cached embedding for {evicted:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(value: f32) -> Embedding {
        Embedding::new(vec![value, 0.0, 0.0])
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let mut cache = EmbeddingCache::new(4);
        cache.insert("a".to_string(), emb(1.0));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn test_insert_past_capacity_evicts_oldest_inserted() {
        let mut cache = EmbeddingCache::new(500);
        for i in 0..500 {
            cache.insert(format!("key-{i}"), emb(i as f32));
        }
        assert_eq!(cache.len(), 500);

        // reading the oldest key must not protect it
        assert!(cache.get("key-0").is_some());

        cache.insert("key-500".to_string(), emb(500.0));
        assert_eq!(cache.len(), 500);
        assert!(!cache.contains("key-0"));
        assert!(cache.contains("key-1"));
        assert!(cache.contains("key-500"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinsert_is_idempotent() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert("a".to_string(), emb(1.0));
        cache.insert("b".to_string(), emb(2.0));
        cache.insert("a".to_string(), emb(3.0));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a").unwrap()[0], 3.0);

        // "a" is still the oldest
        cache.insert("c".to_string(), emb(4.0));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = EmbeddingCache::new(0);
        cache.insert("a".to_string(), emb(1.0));
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_repeated_reads_do_not_reorder() {
        let mut cache = EmbeddingCache::new(3);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), emb(1.0));
        }
        for _ in 0..3 {
            assert!(cache.get("a").is_some());
            assert!(cache.get("b").is_some());
        }

        cache.insert("d".to_string(), emb(2.0));
        cache.insert("e".to_string(), emb(3.0));
        assert!(!cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.capacity(), 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
    }
}
