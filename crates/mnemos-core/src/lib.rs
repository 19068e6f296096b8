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

//! # Mnemos Core
//!
//! A temporal knowledge-graph memory engine for LLM agents.
//!
//! Episodes of unstructured text are ingested continuously; entities and
//! typed relations are extracted via an LLM and stored in a bi-temporal
//! property graph with embeddings. Retrieval combines embedding similarity
//! with community routing, graph expansion, and temporal re-ranking. A
//! background sleep cycle consolidates summaries, merges duplicates, and
//! detects communities.

pub mod cache;
pub mod database;
pub mod edges;
pub mod embedder;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod helpers;
pub mod ingest;
pub mod llm_client;
pub mod nodes;
pub mod prompts;
pub mod resolver;
pub mod search;
pub mod sleep;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use errors::{LlmError, MnemosError, MnemosResult};
pub use types::{Clients, DEFAULT_GROUP_ID};

// Re-export traits
pub use cache::Cache;
pub use database::GraphDriver;
pub use embedder::EmbedderClient;
pub use llm_client::LlmClient;

// Re-export concrete types
pub use database::{DatabaseConfig, QueryParameter};
pub use edges::{CommunityEdge, EntityEdge, EpisodicEdge};
pub use embedder::{CachedEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig};
pub use engine::{EngineConfig, Mnemos};
pub use graph::{Direction, GraphStore, ScoredNode};
pub use ingest::{AddEpisodeResults, EpisodeParams};
pub use llm_client::{
    config::LlmConfig,
    models::{JsonSchema, Message, StructuredResponse, TokenUsage},
    CachedLlmClient, OpenAiClient,
};
pub use nodes::{CommunityNode, EntityNode, EntityType, EpisodeType, EpisodicNode, Node};
pub use search::{SearchParams, TraverseParams, TraverseResult};
pub use sleep::{
    AutoSleepConfig, SleepOptions, SleepReport, SleepScheduler, SleepTarget,
};
