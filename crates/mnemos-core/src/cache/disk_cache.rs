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

//! Persistent disk cache implementation using sled

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::{Cache, CacheConfig};
use crate::errors::{MnemosError, MnemosResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<u64>, // Unix millis
    created_at: u64,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let created_at = now_millis();
        let expires_at = ttl.map(|ttl| created_at + ttl.as_millis() as u64);
        Self {
            data,
            expires_at,
            created_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| now_millis() > at)
    }

    fn to_bytes(&self) -> MnemosResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MnemosError::Cache {
            message: format!("Failed to serialize cache entry: {}", e),
        })
    }

    fn from_bytes(bytes: &[u8]) -> MnemosResult<Self> {
        bincode::deserialize(bytes).map_err(|e| MnemosError::Cache {
            message: format!("Failed to deserialize cache entry: {}", e),
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as u64
}

/// Persistent disk cache implementation
pub struct DiskCache {
    db: Db,
    config: CacheConfig,
}

impl DiskCache {
    pub fn new(config: CacheConfig) -> MnemosResult<Self> {
        let cache_dir = config
            .cache_dir
            .clone()
            .unwrap_or_else(|| "./cache".to_string());

        let db = sled::open(&cache_dir)?;

        let cache = Self { db, config };
        cache.start_cleanup_task();
        Ok(cache)
    }

    /// Background task sweeping expired entries
    fn start_cleanup_task(&self) {
        let db = self.db.clone();
        let cleanup_interval = Duration::from_secs(300);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                interval.tick().await;

                if let Err(e) = Self::cleanup_expired(&db) {
                    tracing::warn!("Failed to cleanup expired cache entries: {}", e);
                }
            }
        });
    }

    fn cleanup_expired(db: &Db) -> MnemosResult<()> {
        let mut keys_to_remove = Vec::new();

        for item in db.iter() {
            let (key, value) = item?;
            if let Ok(entry) = CacheEntry::from_bytes(&value) {
                if entry.is_expired() {
                    keys_to_remove.push(key);
                }
            }
        }

        for key in keys_to_remove {
            db.remove(&key)?;
        }

        db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &str) -> MnemosResult<Option<Vec<u8>>> {
        let value = self.db.get(key.as_bytes())?;

        if let Some(value) = value {
            let entry = CacheEntry::from_bytes(&value)?;
            if entry.is_expired() {
                self.db.remove(key.as_bytes())?;
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
        self.db.insert(key.as_bytes(), entry.to_bytes()?)?;
        self.db.flush()?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> MnemosResult<()> {
        self.db.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    async fn clear(&self) -> MnemosResult<()> {
        self.db.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disk_cache_basic_operations() {
        let temp_dir = tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ..CacheConfig::default()
        };

        let cache = DiskCache::new(config).unwrap();

        let key = "test_key";
        let value = b"test_value".to_vec();

        cache.set(key, value.clone()).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value));

        cache.remove(key).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disk_cache_ttl() {
        let temp_dir = tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ..CacheConfig::default()
        };

        let cache = DiskCache::new(config).unwrap();

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
