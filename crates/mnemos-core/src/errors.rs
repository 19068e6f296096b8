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

use thiserror::Error;

use crate::database::types::DriverError;

/// Base error type for Mnemos operations
#[derive(Debug, Error)]
pub enum MnemosError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedder error: {message}")]
    Embedder { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Node {uuid} not found")]
    NodeNotFound { uuid: String },

    #[error("Edge {uuid} not found")]
    EdgeNotFound { uuid: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sled::Error> for MnemosError {
    fn from(e: sled::Error) -> Self {
        MnemosError::Cache {
            message: e.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for MnemosError {
    fn from(e: validator::ValidationErrors) -> Self {
        MnemosError::Validation {
            message: e.to_string(),
        }
    }
}

/// LLM-specific error types
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("LLM refused to generate a response: {message}")]
    Refusal { message: String },

    #[error("LLM returned an empty response: {message}")]
    EmptyResponse { message: String },

    #[error("LLM payload did not match the requested schema: {message}")]
    SchemaMismatch { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },
}

/// Result type alias for Mnemos operations
pub type MnemosResult<T> = Result<T, MnemosError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;
