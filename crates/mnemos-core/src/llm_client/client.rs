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
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::warn;

use super::config::LlmConfig;
use super::models::{JsonSchema, Message, StructuredResponse};
use crate::errors::{LlmError, LlmResult};

/// Trait for LLM clients that generate schema-constrained responses
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response conforming to `schema`
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &JsonSchema,
    ) -> LlmResult<StructuredResponse>;
}

/// Base implementation shared by LLM clients: input cleaning and retry logic
pub struct BaseLlmClient {
    pub config: LlmConfig,
}

impl BaseLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Clean input string of invalid unicode and control characters
    pub fn clean_input(&self, input: &str) -> String {
        // Remove zero-width characters and other invisible unicode
        let zero_width_chars = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}', '\u{2060}'];
        let mut cleaned = input.to_string();
        for char in zero_width_chars {
            cleaned = cleaned.replace(char, "");
        }

        // Remove control characters except newlines, returns, and tabs
        cleaned
            .chars()
            .filter(|&c| (c as u32) >= 32 || c == '\n' || c == '\r' || c == '\t')
            .collect()
    }

    /// Execute with retry logic on recoverable errors
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> LlmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(5000)
            .max_delay(Duration::from_secs(120))
            .take(4);

        let retry_condition = |error: &LlmError| {
            matches!(
                error,
                LlmError::RateLimit | LlmError::Http(_) | LlmError::Timeout { .. }
            )
        };

        RetryIf::spawn(retry_strategy, operation, retry_condition)
            .await
            .map_err(|e| {
                warn!("All retry attempts exhausted: {:?}", e);
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_input_strips_zero_width() {
        let client = BaseLlmClient::new(LlmConfig::default());
        let dirty = "Al\u{200b}ice\u{feff} met Bob";
        assert_eq!(client.clean_input(dirty), "Alice met Bob");
    }

    #[test]
    fn test_clean_input_keeps_whitespace() {
        let client = BaseLlmClient::new(LlmConfig::default());
        let input = "line one\nline two\ttabbed";
        assert_eq!(client.clean_input(input), input);
    }
}
