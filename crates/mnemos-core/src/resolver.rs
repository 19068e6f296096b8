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

//! Entity resolution.
//!
//! A mention extracted from an episode maps to a canonical entity in three
//! steps: exact case-sensitive name match, then (for prompt context only) a
//! semantic candidate pool re-ranked by recency, then creation. On a name
//! match the stored summary is merged with the new context through the LLM
//! and re-embedded.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::graph::GraphStore;
use crate::helpers::utc_now;
use crate::llm_client::LlmClient;
use crate::nodes::{EntityNode, EntityType};
use crate::prompts::extract::{ExtractedEntity, KnownEntity};
use crate::prompts::merge::{merge_summary_messages, merge_summary_schema, MergedSummary};
use crate::types::Clients;
use crate::errors::MnemosResult;

/// Pool size fetched from the store before re-ranking
pub const CANDIDATE_POOL_LIMIT: i64 = 50;
/// Cosine floor for pool membership
pub const CANDIDATE_MIN_SIMILARITY: f64 = 0.65;
/// Candidates handed to the LLM as known-entity context
pub const CONTEXT_LIMIT: usize = 20;

const SEMANTIC_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.3;
const RECENCY_DECAY_PER_DAY: f64 = 0.1;

/// Combined semantic + recency score used to re-rank pool candidates
pub fn candidate_score(similarity: f64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now.signed_duration_since(created_at).num_seconds() as f64 / 86_400.0).max(0.0);
    let recency = (-RECENCY_DECAY_PER_DAY * age_days).exp();
    SEMANTIC_WEIGHT * similarity + RECENCY_WEIGHT * recency
}

/// Re-rank `(entity, similarity)` pairs and keep the top of the pool
pub fn rerank_candidates(
    mut candidates: Vec<(EntityNode, f64)>,
    now: DateTime<Utc>,
) -> Vec<EntityNode> {
    candidates.sort_by(|a, b| {
        let score_a = candidate_score(a.1, a.0.created_at, now);
        let score_b = candidate_score(b.1, b.0.created_at, now);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
        .into_iter()
        .take(CONTEXT_LIMIT)
        .map(|(entity, _)| entity)
        .collect()
}

/// Maps extracted mentions to canonical entities
#[derive(Clone)]
pub struct EntityResolver {
    clients: Clients,
    store: GraphStore,
}

impl EntityResolver {
    pub fn new(clients: Clients) -> Self {
        let store = GraphStore::new(clients.driver.clone());
        Self { clients, store }
    }

    /// Semantic candidate pool for prompt context. This is candidate
    /// generation, not merging: the entities returned are handed to the
    /// extraction prompt so the LLM reuses exact canonical names.
    pub async fn candidate_pool(
        &self,
        group_id: &str,
        episode_embedding: &[f32],
    ) -> MnemosResult<Vec<KnownEntity>> {
        let scored = self
            .store
            .similarity_search(
                group_id,
                episode_embedding,
                &["Entity"],
                CANDIDATE_POOL_LIMIT,
                Some(CANDIDATE_MIN_SIMILARITY),
                None,
                None,
            )
            .await?;

        let candidates: Vec<(EntityNode, f64)> = scored
            .into_iter()
            .filter_map(|s| {
                let score = s.score;
                s.node.as_entity().cloned().map(|e| (e, score))
            })
            .collect();

        let ranked = rerank_candidates(candidates, utc_now());
        Ok(ranked
            .into_iter()
            .map(|e| KnownEntity {
                name: e.name,
                entity_type: e.entity_type.to_string(),
                summary: e.summary,
            })
            .collect())
    }

    /// Resolve one extracted mention: exact-name match wins, otherwise a new
    /// entity is created. On a match the summaries are merged via the LLM
    /// and the result re-embedded; errors propagate and abort the caller.
    pub async fn resolve(
        &self,
        extracted: &ExtractedEntity,
        group_id: &str,
    ) -> MnemosResult<EntityNode> {
        match self
            .store
            .fetch_entity_by_name(&extracted.name, group_id)
            .await?
        {
            Some(existing) => self.merge_into_existing(existing, extracted).await,
            None => self.create_entity(extracted, group_id).await,
        }
    }

    async fn merge_into_existing(
        &self,
        mut existing: EntityNode,
        extracted: &ExtractedEntity,
    ) -> MnemosResult<EntityNode> {
        debug!(name = %existing.name, "merging summary into existing entity");

        let messages = merge_summary_messages(
            &existing.name,
            existing.entity_type.as_str(),
            &existing.summary,
            &extracted.summary,
        );
        let response = self
            .clients
            .llm_client
            .generate_structured(&messages, &merge_summary_schema())
            .await?;
        let merged: MergedSummary = response.parse()?;

        let embedding = self.clients.embedder.embed(&merged.merged_summary).await?;

        existing.summary = merged.merged_summary;
        existing.summary_embedding = Some(embedding);

        // The stored classification stands unless it carries no information
        let extracted_type = extracted.entity_type();
        if existing.entity_type == EntityType::Other && extracted_type != EntityType::Other {
            existing.entity_type = extracted_type;
        }

        self.store.upsert_entity(&existing).await?;
        Ok(existing)
    }

    async fn create_entity(
        &self,
        extracted: &ExtractedEntity,
        group_id: &str,
    ) -> MnemosResult<EntityNode> {
        debug!(name = %extracted.name, "creating entity");

        let embedding = self.clients.embedder.embed(&extracted.summary).await?;
        let entity = EntityNode::new(
            extracted.name.clone(),
            group_id.to_string(),
            extracted.entity_type(),
            extracted.summary.clone(),
        )
        .with_summary_embedding(embedding);

        self.store.upsert_entity(&entity).await?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory_cache::MemoryCache, CacheConfig};
    use crate::embedder::EmbedderClient;
    use crate::errors::{LlmResult, MnemosResult};
    use crate::llm_client::{JsonSchema, Message, StructuredResponse, TokenUsage};
    use crate::testing::FakeDriver;
    use async_trait::async_trait;
    use chrono::Duration;
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

    fn clients(driver: Arc<FakeDriver>, llm: MockLlm, embedder: MockEmbedder) -> Clients {
        Clients::new(
            driver,
            Arc::new(llm),
            Arc::new(embedder),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        )
    }

    fn extracted(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: "Person".to_string(),
            summary: "Works at ACME.".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_candidate_score_prefers_recent() {
        let now = utc_now();
        let fresh = candidate_score(0.8, now, now);
        let stale = candidate_score(0.8, now - Duration::days(30), now);
        assert!(fresh > stale);
    }

    #[test]
    fn test_rerank_recency_breaks_semantic_ties() {
        let now = utc_now();
        let mut old = EntityNode::new(
            "Old".to_string(),
            "g".to_string(),
            EntityType::Person,
            "s".to_string(),
        );
        old.created_at = now - Duration::days(60);
        let recent = EntityNode::new(
            "Recent".to_string(),
            "g".to_string(),
            EntityType::Person,
            "s".to_string(),
        );

        let ranked = rerank_candidates(vec![(old, 0.8), (recent, 0.8)], now);
        assert_eq!(ranked[0].name, "Recent");
    }

    #[test]
    fn test_rerank_caps_at_context_limit() {
        let now = utc_now();
        let candidates: Vec<(EntityNode, f64)> = (0..30)
            .map(|i| {
                (
                    EntityNode::new(
                        format!("e{}", i),
                        "g".to_string(),
                        EntityType::Other,
                        String::new(),
                    ),
                    0.7,
                )
            })
            .collect();
        assert_eq!(rerank_candidates(candidates, now).len(), CONTEXT_LIMIT);
    }

    #[tokio::test]
    async fn test_resolve_creates_when_absent() {
        let driver = Arc::new(FakeDriver::new());
        let llm = MockLlm::new(); // must not be called

        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Ok(vec![0.1, 0.2]));

        let resolver = EntityResolver::new(clients(driver.clone(), llm, embedder));
        let entity = resolver.resolve(&extracted("Alice"), "g").await.unwrap();

        assert_eq!(entity.name, "Alice");
        assert_eq!(entity.entity_type, EntityType::Person);
        assert!(entity.summary_embedding.is_some());
        assert_eq!(driver.calls_matching("MERGE (n:Entity").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_merges_when_present() {
        let driver = Arc::new(FakeDriver::new());

        let existing = EntityNode::new(
            "Alice".to_string(),
            "g".to_string(),
            EntityType::Person,
            "A researcher.".to_string(),
        );
        driver.push_response(
            "MATCH (n:Entity {name: $name, group_id: $group_id})",
            vec![FakeDriver::row(&[(
                "node",
                serde_json::to_value(&existing).unwrap(),
            )])],
        );

        let mut llm = MockLlm::new();
        llm.expect_generate_structured().times(1).returning(|_, _| {
            Ok(StructuredResponse {
                data: json!({"merged_summary": "A researcher who works at ACME."}),
                usage: TokenUsage::default(),
            })
        });

        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Ok(vec![0.3, 0.4]));

        let resolver = EntityResolver::new(clients(driver.clone(), llm, embedder));
        let entity = resolver.resolve(&extracted("Alice"), "g").await.unwrap();

        assert_eq!(entity.uuid, existing.uuid);
        assert_eq!(entity.summary, "A researcher who works at ACME.");
        assert_eq!(entity.summary_embedding.as_deref(), Some(&[0.3f32, 0.4][..]));
        assert_eq!(driver.calls_matching("MERGE (n:Entity").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_keeps_established_entity_type() {
        let driver = Arc::new(FakeDriver::new());

        let existing = EntityNode::new(
            "ACME".to_string(),
            "g".to_string(),
            EntityType::Organization,
            "A company.".to_string(),
        );
        driver.push_response(
            "MATCH (n:Entity {name: $name, group_id: $group_id})",
            vec![FakeDriver::row(&[(
                "node",
                serde_json::to_value(&existing).unwrap(),
            )])],
        );

        let mut llm = MockLlm::new();
        llm.expect_generate_structured().returning(|_, _| {
            Ok(StructuredResponse {
                data: json!({"merged_summary": "merged"}),
                usage: TokenUsage::default(),
            })
        });

        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.0]));

        let resolver = EntityResolver::new(clients(driver, llm, embedder));

        let mention = ExtractedEntity {
            name: "ACME".to_string(),
            entity_type: "Concept".to_string(),
            summary: "mentioned".to_string(),
            confidence: 0.9,
        };
        let entity = resolver.resolve(&mention, "g").await.unwrap();

        // Organization is established; Concept does not replace it
        assert_eq!(entity.entity_type, EntityType::Organization);
    }
}
