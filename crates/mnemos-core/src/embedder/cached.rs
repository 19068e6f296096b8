/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Caching wrapper for embedder clients

use async_trait::async_trait;
use std::sync::Arc;

use super::client::EmbedderClient;
use crate::cache::{generate_cache_key, Cache};
use crate::errors::MnemosResult;
use crate::helpers::semaphore_gather;

/// Wrapper that adds caching to any EmbedderClient implementation
pub struct CachedEmbedder {
    inner: Arc<dyn EmbedderClient>,
    cache: Arc<dyn Cache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbedderClient>, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl EmbedderClient for CachedEmbedder {
    async fn embed(&self, text: &str) -> MnemosResult<Vec<f32>> {
        let cache_key = generate_cache_key(&["embedding", text]);

        if let Ok(Some(cached_bytes)) = self.cache.get(&cache_key).await {
            if let Ok(cached_embedding) = serde_json::from_slice::<Vec<f32>>(&cached_bytes) {
                return Ok(cached_embedding);
            }
        }

        let embedding = self.inner.embed(text).await?;

        if let Ok(serialized) = serde_json::to_vec(&embedding) {
            let _ = self.cache.set(&cache_key, serialized).await;
        }

        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> MnemosResult<Vec<Vec<f32>>> {
        let futures: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        semaphore_gather(futures, None).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory_cache::MemoryCache, CacheConfig};
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        TestEmbedder {}

        #[async_trait]
        impl EmbedderClient for TestEmbedder {
            async fn embed(&self, text: &str) -> MnemosResult<Vec<f32>>;
            async fn embed_batch(&self, texts: &[String]) -> MnemosResult<Vec<Vec<f32>>>;
        }
    }

    #[tokio::test]
    async fn test_cached_embedder_caches_results() {
        let mut mock_embedder = MockTestEmbedder::new();
        mock_embedder
            .expect_embed()
            .with(eq("test input"))
            .times(1)
            .returning(|_| Ok(vec![1.0, 2.0, 3.0]));

        let cache = Arc::new(MemoryCache::new(CacheConfig::default()));
        let cached = CachedEmbedder::new(Arc::new(mock_embedder), cache);

        // First call hits the embedder, second the cache (mock expects one call)
        let result1 = cached.embed("test input").await.unwrap();
        assert_eq!(result1, vec![1.0, 2.0, 3.0]);

        let result2 = cached.embed("test input").await.unwrap();
        assert_eq!(result2, vec![1.0, 2.0, 3.0]);
    }
}
