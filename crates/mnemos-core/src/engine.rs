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

//! The engine façade.
//!
//! `Mnemos` owns the graph store, the ingestion pipeline, the retrieval
//! engine, the sleep engine, and the auto-sleep scheduler. There is no
//! global state: multiple engines may coexist, each with its own clients.

use std::sync::Arc;

use crate::cache::{memory_cache::MemoryCache, Cache, CacheConfig};
use crate::database::{create_driver, DatabaseConfig};
use crate::edges::EntityEdge;
use crate::embedder::{CachedEmbedder, EmbedderClient, OpenAiEmbedder, OpenAiEmbedderConfig};
use crate::errors::MnemosResult;
use crate::graph::{GraphStore, ScoredNode};
use crate::ingest::{AddEpisodeResults, EpisodeParams, IngestionPipeline};
use crate::llm_client::{CachedLlmClient, LlmClient, LlmConfig, OpenAiClient};
use crate::nodes::{EpisodicNode, Node};
use crate::search::{RetrievalEngine, SearchParams, TraverseParams, TraverseResult};
use crate::sleep::{AutoSleepConfig, SleepEngine, SleepOptions, SleepReport, SleepScheduler, SleepTarget};
use crate::types::{Clients, DEFAULT_GROUP_ID};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embedder: OpenAiEmbedderConfig,
    pub cache: Option<CacheConfig>,
    pub default_group_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            embedder: OpenAiEmbedderConfig::default(),
            cache: Some(CacheConfig::default()),
            default_group_id: DEFAULT_GROUP_ID.to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            llm: LlmConfig::from_env(),
            embedder: OpenAiEmbedderConfig::from_env(),
            cache: Some(CacheConfig::default()),
            default_group_id: DEFAULT_GROUP_ID.to_string(),
        }
    }
}

/// Temporal knowledge-graph memory engine
pub struct Mnemos {
    clients: Clients,
    store: GraphStore,
    pipeline: IngestionPipeline,
    retrieval: RetrievalEngine,
    sleep_engine: SleepEngine,
    scheduler: SleepScheduler,
    default_group_id: String,
}

impl Mnemos {
    /// Initialize an engine with the default OpenAI-backed clients
    pub async fn new(config: EngineConfig) -> MnemosResult<Self> {
        let driver = create_driver(config.database.clone()).await?;

        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(
            config.cache.clone().unwrap_or_default(),
        ));

        let llm_client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config.llm.clone())?);
        let llm_client: Arc<dyn LlmClient> =
            Arc::new(CachedLlmClient::new(llm_client, cache.clone()));

        let embedder: Arc<dyn EmbedderClient> =
            Arc::new(OpenAiEmbedder::new(config.embedder.clone())?);
        let embedder: Arc<dyn EmbedderClient> =
            Arc::new(CachedEmbedder::new(embedder, cache.clone()));

        let clients = Clients::new(driver, llm_client, embedder, cache);
        Ok(Self::with_clients(clients, config.default_group_id))
    }

    /// Initialize with caller-supplied clients
    pub fn with_clients(clients: Clients, default_group_id: impl Into<String>) -> Self {
        let store = GraphStore::new(clients.driver.clone());
        let pipeline = IngestionPipeline::new(clients.clone());
        let retrieval = RetrievalEngine::new(clients.clone());
        let sleep_engine = SleepEngine::new(clients.clone());

        Self {
            clients,
            store,
            pipeline,
            retrieval,
            sleep_engine,
            scheduler: SleepScheduler::new(),
            default_group_id: default_group_id.into(),
        }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Create the indexes and constraints the engine relies on
    pub async fn build_indices_and_constraints(&self) -> MnemosResult<()> {
        self.store.build_indices_and_constraints().await
    }

    /// Ingest one episode and return its node
    pub async fn add_episode(&self, params: EpisodeParams) -> MnemosResult<EpisodicNode> {
        let results = self
            .pipeline
            .add_episode(params, &self.default_group_id)
            .await?;
        Ok(results.episode)
    }

    /// Ingest one episode and return everything it touched
    pub async fn add_episode_detailed(
        &self,
        params: EpisodeParams,
    ) -> MnemosResult<AddEpisodeResults> {
        self.pipeline
            .add_episode(params, &self.default_group_id)
            .await
    }

    /// Semantic retrieval; nodes ordered by adjusted score
    pub async fn search(&self, params: SearchParams) -> MnemosResult<Vec<Node>> {
        let scored = self.retrieval.search(&params, &self.default_group_id).await?;
        Ok(scored.into_iter().map(|s| s.node).collect())
    }

    /// Semantic retrieval keeping the scores ("truthful-now" filtering is
    /// the caller's choice; disputed and historical nodes are returned)
    pub async fn search_scored(&self, params: SearchParams) -> MnemosResult<Vec<ScoredNode>> {
        self.retrieval.search(&params, &self.default_group_id).await
    }

    /// Induced subgraph around a start entity
    pub async fn traverse(&self, params: TraverseParams) -> MnemosResult<TraverseResult> {
        self.retrieval.traverse(&params, &self.default_group_id).await
    }

    pub async fn get_node(&self, uuid: &str) -> MnemosResult<Option<Node>> {
        self.store.get_node(uuid).await
    }

    /// Most recently ingested episodes in a group
    pub async fn recent_episodes(
        &self,
        group_id: Option<&str>,
        limit: i64,
    ) -> MnemosResult<Vec<EpisodicNode>> {
        self.store
            .recent_episodes(group_id.unwrap_or(&self.default_group_id), limit)
            .await
    }

    pub async fn get_edge(&self, uuid: &str) -> MnemosResult<Option<EntityEdge>> {
        self.store.get_edge(uuid).await
    }

    pub async fn delete_node(&self, uuid: &str) -> MnemosResult<()> {
        self.store.detach_delete(uuid).await
    }

    pub async fn delete_edge(&self, uuid: &str) -> MnemosResult<()> {
        self.store.delete_edge(uuid).await
    }

    /// Clear one group partition
    pub async fn delete_group(&self, group_id: &str) -> MnemosResult<()> {
        self.store.delete_group(group_id).await
    }

    /// Run one sleep cycle
    pub async fn sleep(
        &self,
        target: SleepTarget,
        options: SleepOptions,
    ) -> MnemosResult<SleepReport> {
        self.sleep_engine.sleep(target, options).await
    }

    /// Start the daily auto-sleep task
    pub fn start_auto_sleep(&self, config: AutoSleepConfig) -> MnemosResult<()> {
        self.scheduler.start(self.sleep_engine.clone(), config)
    }

    /// Cancel the auto-sleep task
    pub fn stop_auto_sleep(&self) {
        self.scheduler.stop();
    }
}
