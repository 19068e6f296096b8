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
use serde_json::{json, Value};

use super::client::{BaseLlmClient, LlmClient};
use super::config::LlmConfig;
use super::models::{JsonSchema, Message, StructuredResponse, TokenUsage};
use crate::errors::{LlmError, LlmResult};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

/// LLM client for OpenAI-compatible chat-completions endpoints
pub struct OpenAiClient {
    base_client: BaseLlmClient,
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Authentication {
                message: "OpenAI API key is required".to_string(),
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            base_client: BaseLlmClient::new(config),
            http_client,
            base_url,
            api_key,
        })
    }

    async fn generate_structured_internal(
        &self,
        messages: &[Message],
        schema: &JsonSchema,
    ) -> LlmResult<StructuredResponse> {
        let model = self
            .base_client
            .config
            .model
            .as_deref()
            .unwrap_or(DEFAULT_MODEL);

        let openai_messages: Vec<OpenAiMessage> = messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.clone(),
                content: self.base_client.clean_input(&m.content),
            })
            .collect();

        let request = OpenAiChatRequest {
            model: model.to_string(),
            messages: openai_messages,
            temperature: self.base_client.config.temperature,
            max_tokens: self.base_client.config.max_tokens,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                }
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(LlmError::Http)?;

        if response.status() == 429 {
            return Err(LlmError::RateLimit);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::NetworkError {
                message: format!("HTTP {} - {}", status, error_text),
            });
        }

        let chat_response: OpenAiChatResponse =
            response.json().await.map_err(|e| LlmError::NetworkError {
                message: format!("Failed to parse JSON response: {}", e),
            })?;

        let usage = chat_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse {
                message: "No choices in response".to_string(),
            })?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LlmError::Refusal { message: refusal });
        }

        let content = choice.message.content.ok_or_else(|| LlmError::EmptyResponse {
            message: "No content in response".to_string(),
        })?;

        let data: Value =
            serde_json::from_str(&content).map_err(|e| LlmError::SchemaMismatch {
                message: format!("response is not valid JSON: {}", e),
            })?;

        Ok(StructuredResponse { data, usage })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &JsonSchema,
    ) -> LlmResult<StructuredResponse> {
        self.base_client
            .execute_with_retry(|| self.generate_structured_internal(messages, schema))
            .await
    }
}
