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

//! Caching layer for expensive operations (LLM responses, embeddings).
//!
//! Supports in-memory and persistent caching; the cached client wrappers in
//! `llm_client` and `embedder` are the consumers.

pub mod disk_cache;
pub mod memory_cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::MnemosResult;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL for cache entries
    pub default_ttl: Duration,
    /// Maximum cache size in bytes (memory cache)
    pub max_size: Option<u64>,
    /// Cache directory (disk cache)
    pub cache_dir: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_size: Some(1024 * 1024 * 100),
            cache_dir: Some("./cache".to_string()),
        }
    }
}

/// Trait for cache implementations
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> MnemosResult<Option<Vec<u8>>>;

    /// Set a value with the default TTL
    async fn set(&self, key: &str, value: Vec<u8>) -> MnemosResult<()>;

    /// Set a value with a custom TTL
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MnemosResult<()>;

    /// Remove a value from the cache
    async fn remove(&self, key: &str) -> MnemosResult<()>;

    /// Clear all cache entries
    async fn clear(&self) -> MnemosResult<()>;
}

/// Generate a cache key from components
pub fn generate_cache_key(components: &[&str]) -> String {
    use sha2::{Digest, Sha256};

    let combined = components.join("|");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cache_key() {
        let key1 = generate_cache_key(&["embedding", "some text"]);
        let key2 = generate_cache_key(&["embedding", "other text"]);
        let key3 = generate_cache_key(&["embedding", "some text"]);

        assert_ne!(key1, key2);
        assert_eq!(key1, key3);
        assert_eq!(key1.len(), 64);
    }
}
