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

//! Caching wrapper for LLM clients

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::client::LlmClient;
use super::models::{JsonSchema, Message, StructuredResponse};
use crate::cache::{generate_cache_key, Cache};
use crate::errors::LlmResult;

/// Wrapper that adds caching to any LlmClient implementation
pub struct CachedLlmClient {
    inner: Arc<dyn LlmClient>,
    cache: Arc<dyn Cache>,
}

impl CachedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    fn cache_key(messages: &[Message], schema: &JsonSchema) -> String {
        let messages_json = serde_json::to_string(messages).unwrap_or_default();
        let schema_json = schema.schema.to_string();
        generate_cache_key(&["llm", &schema.name, &schema_json, &messages_json])
    }
}

#[async_trait]
impl LlmClient for CachedLlmClient {
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &JsonSchema,
    ) -> LlmResult<StructuredResponse> {
        let cache_key = Self::cache_key(messages, schema);

        if let Ok(Some(cached_bytes)) = self.cache.get(&cache_key).await {
            if let Ok(cached) = serde_json::from_slice::<StructuredResponse>(&cached_bytes) {
                debug!("LLM cache hit for {}", cache_key);
                return Ok(cached);
            }
        }

        let response = self.inner.generate_structured(messages, schema).await?;

        if let Ok(serialized) = serde_json::to_vec(&response) {
            let _ = self.cache.set(&cache_key, serialized).await;
        }

        Ok(response)
    }
}
