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

//! In-memory cache implementation using moka

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::{Cache, CacheConfig};
use crate::errors::MnemosResult;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<u64>, // Unix millis
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| now_millis() + ttl.as_millis() as u64);
        Self { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| now_millis() > at)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as u64
}

/// In-memory cache implementation
pub struct MemoryCache {
    cache: MokaCache<String, CacheEntry>,
    config: CacheConfig,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        let cache = if let Some(max_size) = config.max_size {
            MokaCache::builder()
                .weigher(|_key: &String, entry: &CacheEntry| entry.data.len() as u32)
                .max_capacity(max_size)
                .build()
        } else {
            MokaCache::new(u64::MAX)
        };

        Self { cache, config }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> MnemosResult<Option<Vec<u8>>> {
        if let Some(entry) = self.cache.get(key).await {
            if entry.is_expired() {
                self.cache.remove(key).await;
                Ok(None)
            } else {
                Ok(Some(entry.data))
            }
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> MnemosResult<()> {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MnemosResult<()> {
        let entry = CacheEntry::new(value, Some(ttl));
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> MnemosResult<()> {
        self.cache.remove(key).await;
        Ok(())
    }

    async fn clear(&self) -> MnemosResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_basic_operations() {
        let cache = MemoryCache::new(CacheConfig::default());

        let key = "test_key";
        let value = b"test_value".to_vec();

        cache.set(key, value.clone()).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value));

        cache.remove(key).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_cache_ttl() {
        let cache = MemoryCache::new(CacheConfig::default());

        let key = "ttl_key";
        let value = b"ttl_value".to_vec();

        cache
            .set_with_ttl(key, value.clone(), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get(key).await.unwrap(), None);
    }
}
