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

//! Episode ingestion pipeline.
//!
//! Per episode: embed, persist the episode node, build known-entity context,
//! run one structured extraction call, resolve entities, link the episode to
//! them with `MENTIONS` edges, then upsert `RELATES_TO` edges under the
//! negation/temporal/conflict rules. The episode node always exists before
//! any edge that references it; a failed extraction leaves the episode
//! persisted and a retry re-enters the same path idempotently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use validator::Validate;

use crate::edges::{EntityEdge, EpisodicEdge};
use crate::errors::MnemosResult;
use crate::graph::GraphStore;
use crate::helpers::utc_now;
use crate::llm_client::LlmClient;
use crate::nodes::{EntityNode, EpisodeType, EpisodicNode};
use crate::prompts::extract::{
    extraction_messages, extraction_schema, ExtractedRelation, ExtractionPayload,
    TemporalValidity,
};
use crate::resolver::EntityResolver;
use crate::types::Clients;

/// Entities and relations below this confidence are dropped
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Caller-facing parameters for `add_episode`
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct EpisodeParams {
    #[validate(length(min = 1))]
    pub content: String,
    #[serde(default)]
    pub episode_type: Option<EpisodeType>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub valid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl EpisodeParams {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            episode_type: None,
            group_id: None,
            reference_id: None,
            valid_at: None,
            metadata: None,
        }
    }
}

/// Results from adding an episode
#[derive(Debug, Clone)]
pub struct AddEpisodeResults {
    pub episode: EpisodicNode,
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EntityEdge>,
}

/// The ingestion pipeline
#[derive(Clone)]
pub struct IngestionPipeline {
    clients: Clients,
    store: GraphStore,
    resolver: EntityResolver,
}

impl IngestionPipeline {
    pub fn new(clients: Clients) -> Self {
        let store = GraphStore::new(clients.driver.clone());
        let resolver = EntityResolver::new(clients.clone());
        Self {
            clients,
            store,
            resolver,
        }
    }

    /// Ingest one episode
    pub async fn add_episode(
        &self,
        params: EpisodeParams,
        default_group: &str,
    ) -> MnemosResult<AddEpisodeResults> {
        params.validate()?;
        let group_id = params
            .group_id
            .clone()
            .unwrap_or_else(|| default_group.to_string());

        // 1. Embed the content
        let embedding = self.clients.embedder.embed(&params.content).await?;

        // 2. Persist the episode before anything references it
        let metadata = params.metadata.as_ref().map(|m| m.to_string());
        let mut episode = EpisodicNode::new(
            group_id.clone(),
            params.episode_type.unwrap_or_default(),
            params.content.clone(),
            params.valid_at,
        )
        .with_reference_id(params.reference_id.clone())
        .with_embedding(embedding.clone())
        .with_metadata(metadata);
        self.store.upsert_episode(&episode).await?;

        // 3. Known-entity context so the LLM reuses canonical names
        let known = self.resolver.candidate_pool(&group_id, &embedding).await?;

        // 4. One structured extraction call
        let messages = extraction_messages(&params.content, episode.episode_type, &known);
        let response = self
            .clients
            .llm_client
            .generate_structured(&messages, &extraction_schema())
            .await?;
        let payload: ExtractionPayload = response.parse()?;

        debug!(
            entities = payload.entities.len(),
            relations = payload.relations.len(),
            "extraction complete"
        );

        // 5-6. Filter by confidence, resolve, merge summaries
        let mut resolved: HashMap<String, EntityNode> = HashMap::new();
        let mut nodes = Vec::new();
        for extracted in &payload.entities {
            if extracted.confidence < MIN_CONFIDENCE {
                debug!(name = %extracted.name, confidence = extracted.confidence, "entity dropped");
                continue;
            }
            let entity = self.resolver.resolve(extracted, &group_id).await?;
            resolved.insert(extracted.name.clone(), entity.clone());
            nodes.push(entity);
        }

        // 7. Link the episode to every resolved entity
        for entity in &nodes {
            let mention =
                EpisodicEdge::new(group_id.clone(), episode.uuid.clone(), entity.uuid.clone());
            self.store.upsert_episodic_edge(&mention).await?;
        }

        // 8. Relation upserts
        let mut edges = Vec::new();
        let mut episode_dirty = false;
        for relation in &payload.relations {
            if relation.confidence < MIN_CONFIDENCE {
                continue;
            }
            let (Some(source), Some(target)) = (
                resolved.get(&relation.source_name),
                resolved.get(&relation.target_name),
            ) else {
                debug!(
                    source = %relation.source_name,
                    target = %relation.target_name,
                    "relation dropped: unresolved endpoint"
                );
                continue;
            };

            if relation.is_negated {
                if self
                    .resolve_conflict(source, target, relation, &mut episode, &group_id)
                    .await?
                {
                    episode_dirty = true;
                }
                continue;
            }

            let edge = self
                .upsert_relation(source, target, relation, &episode, &group_id)
                .await?;
            edges.push(edge);
        }

        if episode_dirty {
            self.store.upsert_episode(&episode).await?;
        }

        info!(
            episode = %episode.uuid,
            group = %group_id,
            entities = nodes.len(),
            relations = edges.len(),
            "episode ingested"
        );

        Ok(AddEpisodeResults {
            episode,
            nodes,
            edges,
        })
    }

    async fn upsert_relation(
        &self,
        source: &EntityNode,
        target: &EntityNode,
        relation: &ExtractedRelation,
        episode: &EpisodicNode,
        group_id: &str,
    ) -> MnemosResult<EntityEdge> {
        let now = utc_now();

        match self
            .store
            .fetch_edge_between(&source.uuid, &target.uuid, &relation.relation_name, group_id)
            .await?
        {
            Some(mut edge) => {
                match relation.temporal_validity {
                    TemporalValidity::Historical => {
                        if edge.invalid_at.is_none() {
                            edge.invalid_at = Some(now);
                        }
                    }
                    TemporalValidity::Current => {
                        edge.add_episode(&episode.uuid);
                        edge.valid_at = now;
                    }
                }
                self.store.upsert_entity_edge(&edge).await?;
                Ok(edge)
            }
            None => {
                let mut edge = EntityEdge::new(
                    group_id.to_string(),
                    source.uuid.clone(),
                    target.uuid.clone(),
                    relation.relation_name.clone(),
                    now,
                )
                .with_episodes(vec![episode.uuid.clone()]);
                // Historical-on-arrival edges are stored but immediately closed
                if relation.temporal_validity == TemporalValidity::Historical {
                    edge.invalid_at = Some(now);
                }
                self.store.upsert_entity_edge(&edge).await?;
                Ok(edge)
            }
        }
    }

    /// A negated relation never creates an edge. When an active positive
    /// counterpart exists, both sides get cross-marked: the edge records the
    /// disputing episode, the episode records the edge's supporting episodes.
    /// Returns whether the episode node was mutated.
    async fn resolve_conflict(
        &self,
        source: &EntityNode,
        target: &EntityNode,
        relation: &ExtractedRelation,
        episode: &mut EpisodicNode,
        group_id: &str,
    ) -> MnemosResult<bool> {
        let Some(mut edge) = self
            .store
            .fetch_active_edge_between(
                &source.uuid,
                &target.uuid,
                &relation.relation_name,
                group_id,
            )
            .await?
        else {
            debug!(
                relation = %relation.relation_name,
                "negated relation without positive counterpart: no-op"
            );
            return Ok(false);
        };

        edge.add_dispute(&episode.uuid);
        for supporting in edge.episodes.clone() {
            episode.add_dispute(&supporting);
        }
        self.store.upsert_entity_edge(&edge).await?;

        info!(
            edge = %edge.uuid,
            episode = %episode.uuid,
            "conflict recorded; positive edge kept"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory_cache::MemoryCache, CacheConfig};
    use crate::database::param_to_json;
    use crate::embedder::EmbedderClient;
    use crate::errors::LlmResult;
    use crate::llm_client::{JsonSchema, Message, StructuredResponse, TokenUsage};
    use crate::testing::FakeDriver;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::sync::Arc;

    mock! {
        pub Llm {}

        #[async_trait]
        impl LlmClient for Llm {
            async fn generate_structured(
                &self,
                messages: &[Message],
                schema: &JsonSchema,
            ) -> LlmResult<StructuredResponse>;
        }
    }

    mock! {
        pub Embedder {}

        #[async_trait]
        impl EmbedderClient for Embedder {
            async fn embed(&self, text: &str) -> MnemosResult<Vec<f32>>;
            async fn embed_batch(&self, texts: &[String]) -> MnemosResult<Vec<Vec<f32>>>;
        }
    }

    fn stub_embedder() -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2]));
        embedder
    }

    fn llm_returning(payload: serde_json::Value) -> MockLlm {
        let mut llm = MockLlm::new();
        llm.expect_generate_structured().returning(move |_, _| {
            Ok(StructuredResponse {
                data: payload.clone(),
                usage: TokenUsage::default(),
            })
        });
        llm
    }

    fn pipeline(driver: Arc<FakeDriver>, llm: MockLlm, embedder: MockEmbedder) -> IngestionPipeline {
        IngestionPipeline::new(Clients::new(
            driver,
            Arc::new(llm),
            Arc::new(embedder),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        ))
    }

    fn extraction(entities: serde_json::Value, relations: serde_json::Value) -> serde_json::Value {
        json!({"entities": entities, "relations": relations})
    }

    fn two_people_payload(relation: serde_json::Value) -> serde_json::Value {
        extraction(
            json!([
                {"name": "Alice", "entity_type": "Person", "summary": "Met Bob.", "confidence": 0.9},
                {"name": "Bob", "entity_type": "Person", "summary": "Met Alice.", "confidence": 0.9}
            ]),
            json!([relation]),
        )
    }

    #[tokio::test]
    async fn test_add_episode_persists_episode_and_mentions() {
        let driver = Arc::new(FakeDriver::new());
        // The merge-summary schema is never requested: both entities are new
        let llm = llm_returning(two_people_payload(json!({
            "source_name": "Alice", "target_name": "Bob", "relation_name": "KNOWS",
            "confidence": 0.9, "is_negated": false, "temporal_validity": "current"
        })));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice met Bob at the conference."), "g")
            .await
            .unwrap();

        assert_eq!(results.nodes.len(), 2);
        assert_eq!(results.edges.len(), 1);
        assert_eq!(results.edges[0].name, "KNOWS");
        assert_eq!(results.edges[0].episodes, vec![results.episode.uuid.clone()]);
        assert!(results.edges[0].invalid_at.is_none());

        assert_eq!(driver.calls_matching("MERGE (n:Episodic").len(), 1);
        assert_eq!(driver.calls_matching("MERGE (episode)-[r:MENTIONS").len(), 2);
        assert_eq!(
            driver
                .calls_matching("MERGE (a)-[r:RELATES_TO {uuid: $uuid}]")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_low_confidence_entities_and_relations_dropped() {
        let driver = Arc::new(FakeDriver::new());
        let llm = llm_returning(extraction(
            json!([
                {"name": "Alice", "entity_type": "Person", "summary": "s", "confidence": 0.9},
                {"name": "Maybe", "entity_type": "Concept", "summary": "s", "confidence": 0.3}
            ]),
            json!([{
                "source_name": "Alice", "target_name": "Maybe", "relation_name": "LIKES",
                "confidence": 0.9, "is_negated": false, "temporal_validity": "current"
            }]),
        ));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice maybe likes something."), "g")
            .await
            .unwrap();

        // "Maybe" was filtered, so the relation loses its endpoint and drops
        assert_eq!(results.nodes.len(), 1);
        assert!(results.edges.is_empty());
        assert_eq!(
            driver
                .calls_matching("MERGE (a)-[r:RELATES_TO {uuid: $uuid}]")
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn test_negated_relation_without_counterpart_is_noop() {
        let driver = Arc::new(FakeDriver::new());
        let llm = llm_returning(two_people_payload(json!({
            "source_name": "Alice", "target_name": "Bob", "relation_name": "WORKS_WITH",
            "confidence": 0.9, "is_negated": true, "temporal_validity": "current"
        })));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice does not work with Bob."), "g")
            .await
            .unwrap();

        // Entities exist, but no edge was created and nothing was disputed
        assert_eq!(results.nodes.len(), 2);
        assert!(results.edges.is_empty());
        assert!(results.episode.disputed_by.is_empty());
        assert_eq!(
            driver
                .calls_matching("MERGE (a)-[r:RELATES_TO {uuid: $uuid}]")
                .len(),
            0
        );
        // Episode written once: no dispute rewrite happened
        assert_eq!(driver.calls_matching("MERGE (n:Episodic").len(), 1);
    }

    #[tokio::test]
    async fn test_negated_relation_cross_marks_existing_edge() {
        let driver = Arc::new(FakeDriver::new());

        let mut positive = EntityEdge::new(
            "g".to_string(),
            "src-uuid".to_string(),
            "tgt-uuid".to_string(),
            "WORKS_AT".to_string(),
            utc_now(),
        );
        positive.add_episode("ep-old");
        driver.push_response(
            "AND r.invalid_at IS NULL",
            vec![FakeDriver::row(&[(
                "edge",
                serde_json::to_value(&positive).unwrap(),
            )])],
        );

        let llm = llm_returning(two_people_payload(json!({
            "source_name": "Alice", "target_name": "Bob", "relation_name": "WORKS_AT",
            "confidence": 0.9, "is_negated": true, "temporal_validity": "current"
        })));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice does not work at Bob's."), "g")
            .await
            .unwrap();

        // The new episode carries the edge's supporting episodes
        assert_eq!(results.episode.disputed_by, vec!["ep-old"]);

        // The positive edge was rewritten with the disputing episode, not deleted
        let edge_upserts = driver.calls_matching("MERGE (a)-[r:RELATES_TO {uuid: $uuid}]");
        assert_eq!(edge_upserts.len(), 1);
        let props = param_to_json(edge_upserts[0].1.get("props").unwrap());
        assert_eq!(
            props["disputed_by"],
            json!([results.episode.uuid.clone()])
        );
        assert!(props.get("invalid_at").is_none());

        // Episode rewritten with its dispute marks
        assert_eq!(driver.calls_matching("MERGE (n:Episodic").len(), 2);
    }

    #[tokio::test]
    async fn test_historical_relation_created_invalid() {
        let driver = Arc::new(FakeDriver::new());
        let llm = llm_returning(extraction(
            json!([
                {"name": "Alice", "entity_type": "Person", "summary": "s", "confidence": 0.9},
                {"name": "OldCo", "entity_type": "Organization", "summary": "s", "confidence": 0.9}
            ]),
            json!([{
                "source_name": "Alice", "target_name": "OldCo", "relation_name": "WORKED_AT",
                "confidence": 0.9, "is_negated": false, "temporal_validity": "historical"
            }]),
        ));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice used to work at OldCo."), "g")
            .await
            .unwrap();

        assert_eq!(results.edges.len(), 1);
        assert!(results.edges[0].invalid_at.is_some());
        assert!(results.edges[0].invalid_at.unwrap() >= results.edges[0].valid_at);
    }

    #[tokio::test]
    async fn test_existing_current_relation_appends_episode() {
        let driver = Arc::new(FakeDriver::new());

        let mut existing = EntityEdge::new(
            "g".to_string(),
            "src-uuid".to_string(),
            "tgt-uuid".to_string(),
            "KNOWS".to_string(),
            utc_now(),
        );
        existing.add_episode("ep-1");
        driver.push_response(
            "MATCH (:Entity {uuid: $src})-[r:RELATES_TO {name: $name}]",
            vec![FakeDriver::row(&[(
                "edge",
                serde_json::to_value(&existing).unwrap(),
            )])],
        );

        let llm = llm_returning(two_people_payload(json!({
            "source_name": "Alice", "target_name": "Bob", "relation_name": "KNOWS",
            "confidence": 0.9, "is_negated": false, "temporal_validity": "current"
        })));

        let results = pipeline(driver.clone(), llm, stub_embedder())
            .add_episode(EpisodeParams::new("Alice and Bob had lunch together."), "g")
            .await
            .unwrap();

        assert_eq!(results.edges.len(), 1);
        assert_eq!(results.edges[0].uuid, existing.uuid);
        assert_eq!(
            results.edges[0].episodes,
            vec!["ep-1".to_string(), results.episode.uuid.clone()]
        );
        assert!(results.edges[0].valid_at > existing.valid_at);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let driver = Arc::new(FakeDriver::new());
        let result = pipeline(driver, MockLlm::new(), MockEmbedder::new())
            .add_episode(EpisodeParams::new(""), "g")
            .await;
        assert!(matches!(
            result,
            Err(crate::errors::MnemosError::Validation { .. })
        ));
    }
}
