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

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::client::{EmbedderClient, EmbedderConfig};
use crate::errors::{MnemosError, MnemosResult};

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub base: EmbedderConfig,
    pub embedding_model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            base: EmbedderConfig::default(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            base_url: None,
        }
    }
}

impl OpenAiEmbedderConfig {
    /// Build a configuration from `OPENAI_API_KEY` / `EMBEDDING_MODEL`
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: std::env::var("EMBEDDING_BASE_URL").ok(),
            base: EmbedderConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Embedder for OpenAI-compatible embeddings endpoints
pub struct OpenAiEmbedder {
    config: OpenAiEmbedderConfig,
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> MnemosResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| MnemosError::Config {
            message: "OpenAI API key is required".to_string(),
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| MnemosError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            api_key,
            base_url,
        })
    }

    async fn request_embeddings(&self, input: Vec<String>) -> MnemosResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input,
            model: self.config.embedding_model.clone(),
        };

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(MnemosError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MnemosError::Embedder {
                message: format!("embeddings endpoint returned {}: {}", status, error_text),
            });
        }

        let embedding_response: EmbeddingResponse =
            response.json().await.map_err(MnemosError::Http)?;

        let embeddings = embedding_response
            .data
            .into_iter()
            .map(|data| {
                let max_dim = self.config.base.embedding_dim.min(data.embedding.len());
                data.embedding[..max_dim].to_vec()
            })
            .collect();

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbedderClient for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> MnemosResult<Vec<f32>> {
        let embeddings = self.request_embeddings(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MnemosError::Embedder {
                message: "No embeddings returned".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> MnemosResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts.to_vec()).await
    }
}
