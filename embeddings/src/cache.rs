//! Query embedding cache.
//!
//! Questions repeat far more often than documents change, so each tier keeps
//! a bounded LRU of question embeddings keyed by model and exact text.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::Result;
use crate::provider::Embedder;

/// Bounded LRU of embeddings. A capacity of zero disables caching.
pub struct QueryEmbeddingCache {
    entries: Option<Mutex<LruCache<String, Embedding>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryEmbeddingCache {
    /// Create a cache holding at most `capacity` embeddings.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(text: &str, model: &str) -> String {
        format!("{model}\u{0}{text}")
    }

    /// Get an embedding from the cache, refreshing its recency.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().await.get(&Self::key(text, model)).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Put an embedding in the cache, evicting the least recently used entry
    /// when full.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        if let Some(entries) = &self.entries {
            entries.lock().await.put(Self::key(text, model), embedding);
            debug!("Cached embedding for text (model: {model})");
        }
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().await.clear();
            info!("Cleared query embedding cache");
        }
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let entries = match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        };
        CacheStats {
            entries,
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the query embedding cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub capacity: usize,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that went to the provider.
    pub misses: u64,
}

/// An [`Embedder`] that consults a [`QueryEmbeddingCache`] before calling
/// the wrapped provider. Batch calls bypass the cache.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: QueryEmbeddingCache,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Wrap `inner` with a cache of the given capacity.
    pub fn new(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            cache: QueryEmbeddingCache::new(capacity),
        }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &QueryEmbeddingCache {
        &self.cache
    }

    /// Get the wrapped provider.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self.inner.model();
        if let Some(embedding) = self.cache.get(text, model).await {
            debug!("Cache hit for embedding");
            return Ok(embedding);
        }
        let embedding = self.inner.embed(text).await?;
        self.cache.put(text, model, embedding.clone()).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.inner.embed_batch(texts).await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingEmbedder;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            "counting-v1"
        }

        fn dimension(&self) -> Option<usize> {
            Some(2)
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = QueryEmbeddingCache::new(100);
        let embedding = vec![1.0, 2.0, 3.0];

        cache.put("hello", "model-1", embedding.clone()).await;

        assert_eq!(cache.get("hello", "model-1").await, Some(embedding));
        assert_eq!(cache.get("hello", "model-2").await, None);
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used() {
        let cache = QueryEmbeddingCache::new(2);

        cache.put("a", "model", vec![1.0]).await;
        cache.put("b", "model", vec![2.0]).await;
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a", "model").await.is_some());
        cache.put("c", "model", vec![3.0]).await;

        assert!(cache.get("b", "model").await.is_none());
        assert!(cache.get("a", "model").await.is_some());
        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_cache() {
        let cache = QueryEmbeddingCache::new(0);
        cache.put("a", "model", vec![1.0]).await;
        assert!(cache.get("a", "model").await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_cached_embedder_calls_provider_once() {
        let embedder = CachedEmbedder::new(
            CountingEmbedder {
                calls: AtomicUsize::new(0),
            },
            8,
        );

        let first = embedder.embed("what is the policy?").await.unwrap();
        let second = embedder.embed("what is the policy?").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 1);
        let stats = embedder.cache().stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_cached_embedder_forwards_metadata() {
        let embedder = CachedEmbedder::new(HashingEmbedder::new(32), 4);
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(embedder.dimension(), Some(32));
        assert!(embedder.is_available());
    }
}
