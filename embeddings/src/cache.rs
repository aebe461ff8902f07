//! Embedding cache in front of a provider.
//!
//! Catalog descriptions repeat themselves (taglines, boilerplate, re-releases)
//! and interactive sessions repeat queries. The cache keys on model and exact
//! text, so a hit returns the same vector the provider produced.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::Embedding;
use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Statistics about the embedding cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups forwarded to the provider.
    pub misses: u64,
}

struct CacheState {
    entries: LruCache<(String, String), Embedding>,
    hits: u64,
    misses: u64,
}

/// A provider wrapper that remembers recent embeddings.
pub struct CachedProvider<P> {
    provider: P,
    state: Mutex<CacheState>,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Wrap `provider` with an LRU cache of `max_entries` embeddings.
    pub fn new(provider: P, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Get the wrapped provider.
    pub fn inner(&self) -> &P {
        &self.provider
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            max_entries: state.entries.cap().get(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Clear the cache.
    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    fn key(&self, request: &EmbeddingRequest) -> (String, String) {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let model = match request.dimensions {
            Some(dimensions) => format!("{model}@{dimensions}"),
            None => model,
        };
        (model, request.text.clone())
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn default_model(&self) -> &str {
        self.provider.default_model()
    }

    fn default_dimension(&self) -> usize {
        self.provider.default_dimension()
    }

    fn max_input_tokens(&self) -> Option<usize> {
        self.provider.max_input_tokens()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let key = self.key(&request);

        {
            let mut state = self.state.lock().await;
            if let Some(embedding) = state.entries.get(&key).cloned() {
                state.hits += 1;
                debug!("Cache hit for embedding");
                return Ok(EmbeddingResponse {
                    dimension: embedding.len(),
                    embedding,
                    model: key.0,
                    tokens_used: None,
                });
            }
            state.misses += 1;
        }

        // The lock is not held across the provider call, so concurrent
        // misses on the same text may both reach the provider.
        let response = self.provider.embed(request).await?;
        self.state
            .lock()
            .await
            .entries
            .put(key, response.embedding.clone());

        Ok(response)
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingProvider;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cache_hit_returns_same_vector() {
        let cached = CachedProvider::new(HashingProvider::new(16), 100);

        let first = cached.embed(EmbeddingRequest::new("hello")).await.unwrap();
        let second = cached.embed(EmbeddingRequest::new("hello")).await.unwrap();

        assert_eq!(first.embedding, second.embedding);
        let stats = cached.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_cache_keys_on_model() {
        let cached = CachedProvider::new(HashingProvider::new(16), 100);

        cached.embed(EmbeddingRequest::new("hello")).await.unwrap();
        cached
            .embed(EmbeddingRequest::new("hello").with_model("other"))
            .await
            .unwrap();

        assert_eq!(cached.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cached = CachedProvider::new(HashingProvider::new(4), 2);

        for text in ["a", "b", "c"] {
            cached.embed(EmbeddingRequest::new(text)).await.unwrap();
        }

        let stats = cached.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.max_entries, 2);

        // "a" was least recently used.
        cached.embed(EmbeddingRequest::new("a")).await.unwrap();
        assert_eq!(cached.stats().await.misses, 4);
    }

    #[tokio::test]
    async fn test_clear_forgets_vectors() {
        let cached = CachedProvider::new(HashingProvider::new(16), 100);
        assert_eq!(cached.inner().default_dimension(), 16);

        cached.embed(EmbeddingRequest::new("hello")).await.unwrap();
        cached.clear().await;
        assert_eq!(cached.stats().await.entries, 0);

        cached.embed(EmbeddingRequest::new("hello")).await.unwrap();
        let stats = cached.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
    }
}
