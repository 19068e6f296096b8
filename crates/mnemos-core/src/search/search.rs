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

//! Retrieval engine.
//!
//! Similarity search over the Entity/Episodic/Community label union, with
//! communities acting as a routing tier (their members join the result set),
//! optional k-hop graph expansion from the entity seeds, and temporal
//! re-ranking of episodic results around a query time.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::config::{
    SearchParams, TraverseParams, DEFAULT_EXPAND_HOPS, DEFAULT_HALF_LIFE_DAYS,
    DEFAULT_SEARCH_LIMIT, DEFAULT_TEMPORAL_ALPHA, DEFAULT_TRAVERSE_HOPS, DEFAULT_TRAVERSE_LIMIT,
};
use crate::cache::generate_cache_key;
use crate::edges::EntityEdge;
use crate::errors::{MnemosError, MnemosResult};
use crate::graph::{Direction, GraphStore, ScoredNode};
use crate::nodes::{EntityNode, Node};
use crate::types::Clients;

/// Induced subgraph returned by `traverse`
#[derive(Debug, Clone)]
pub struct TraverseResult {
    pub start: EntityNode,
    pub nodes: Vec<Node>,
    pub edges: Vec<EntityEdge>,
}

/// Score multiplier for an episodic node at `query_time`.
///
/// `proximity` decays with distance between the episode's `valid_at` and the
/// query time; `contemporaneity` dampens the bonus for back-dated episodes.
pub fn temporal_multiplier(
    valid_at: DateTime<Utc>,
    retroactive_days: i64,
    query_time: DateTime<Utc>,
    alpha: f64,
    half_life_days: f64,
) -> f64 {
    let distance_days =
        query_time.signed_duration_since(valid_at).num_seconds().abs() as f64 / 86_400.0;
    let proximity = (-distance_days / half_life_days).exp();
    let contemporaneity = (-(retroactive_days.max(0) as f64) / 30.0).exp();
    1.0 + alpha * proximity * contemporaneity
}

/// Apply temporal re-ranking in place and resort descending. Only episodic
/// nodes are adjusted; everything else keeps its base similarity.
pub fn rerank_temporal(
    results: &mut Vec<ScoredNode>,
    query_time: DateTime<Utc>,
    alpha: f64,
    half_life_days: f64,
) {
    for scored in results.iter_mut() {
        if let Node::Episodic(episode) = &scored.node {
            scored.score *= temporal_multiplier(
                episode.valid_at,
                episode.retroactive_days,
                query_time,
                alpha,
                half_life_days,
            );
        }
    }
    sort_by_score(results);
}

fn sort_by_score(results: &mut [ScoredNode]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// The retrieval engine
#[derive(Clone)]
pub struct RetrievalEngine {
    clients: Clients,
    store: GraphStore,
}

impl RetrievalEngine {
    pub fn new(clients: Clients) -> Self {
        let store = GraphStore::new(clients.driver.clone());
        Self { clients, store }
    }

    /// Semantic retrieval with expansion and re-ranking; results are ordered
    /// by adjusted score and may exceed `limit` because of the expansions.
    pub async fn search(
        &self,
        params: &SearchParams,
        default_group: &str,
    ) -> MnemosResult<Vec<ScoredNode>> {
        params.validate()?;
        let group_id = params.group_id.as_deref().unwrap_or(default_group);
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let cache_key = generate_cache_key(&[
            "search",
            group_id,
            &serde_json::to_string(params).unwrap_or_default(),
        ]);
        if let Ok(Some(cached_bytes)) = self.clients.cache.get(&cache_key).await {
            if let Ok(cached) = serde_json::from_slice::<Vec<ScoredNode>>(&cached_bytes) {
                return Ok(cached);
            }
        }

        // 1. Embed the query
        let query_embedding = self.clients.embedder.embed(&params.query).await?;

        // 2. Similarity over the label union; the window filters episodes only
        let mut results = self
            .store
            .similarity_search(
                group_id,
                &query_embedding,
                &[Node::ENTITY_LABEL, Node::EPISODIC_LABEL, Node::COMMUNITY_LABEL],
                limit,
                None,
                params.valid_from,
                params.valid_to,
            )
            .await?;

        let mut seen: HashSet<String> = results.iter().map(|r| r.node.uuid().to_string()).collect();

        // 3. Community-guided expansion: members of matched communities join
        //    the result set, carrying the best community score
        let community_uuids: Vec<String> = results
            .iter()
            .filter(|r| matches!(r.node, Node::Community(_)))
            .map(|r| r.node.uuid().to_string())
            .collect();
        if !community_uuids.is_empty() {
            let best_community_score = results
                .iter()
                .filter(|r| matches!(r.node, Node::Community(_)))
                .map(|r| r.score)
                .fold(f64::MIN, f64::max);
            let members = self
                .store
                .community_members(&community_uuids, group_id)
                .await?;
            debug!(members = members.len(), "community expansion");
            for member in members {
                if seen.insert(member.uuid().to_string()) {
                    results.push(ScoredNode {
                        node: member,
                        score: best_community_score,
                    });
                }
            }
        }

        // 4. Graph expansion from the entity seeds
        if params.graph_expand {
            let seeds: Vec<String> = results
                .iter()
                .filter(|r| matches!(r.node, Node::Entity(_)))
                .map(|r| r.node.uuid().to_string())
                .collect();
            let hops = params.expand_hops.unwrap_or(DEFAULT_EXPAND_HOPS);
            let neighbours = self
                .store
                .variable_length_match(&seeds, hops, Direction::Both, group_id, 2 * limit)
                .await?;
            debug!(neighbours = neighbours.len(), "graph expansion");
            for neighbour in neighbours {
                if seen.insert(neighbour.uuid().to_string()) {
                    results.push(ScoredNode {
                        node: neighbour,
                        score: 0.0,
                    });
                }
            }
        }

        // 5. Temporal re-ranking around the query time
        if let Some(query_time) = params.query_time {
            rerank_temporal(
                &mut results,
                query_time,
                params.temporal_alpha.unwrap_or(DEFAULT_TEMPORAL_ALPHA),
                params.half_life_days.unwrap_or(DEFAULT_HALF_LIFE_DAYS),
            );
        } else {
            sort_by_score(&mut results);
        }

        if let Ok(serialized) = serde_json::to_vec(&results) {
            let _ = self.clients.cache.set(&cache_key, serialized).await;
        }

        Ok(results)
    }

    /// Resolve a start entity and return the induced subgraph reachable
    /// within `max_hops`
    pub async fn traverse(
        &self,
        params: &TraverseParams,
        default_group: &str,
    ) -> MnemosResult<TraverseResult> {
        params.validate()?;
        let group_id = params.group_id.as_deref().unwrap_or(default_group);

        let start = match (&params.start_entity_uuid, &params.start_entity_name) {
            (Some(uuid), _) => match self.store.get_node(uuid).await? {
                Some(Node::Entity(entity)) => entity,
                Some(_) => {
                    return Err(MnemosError::Validation {
                        message: format!("node {} is not an entity", uuid),
                    })
                }
                None => {
                    return Err(MnemosError::NodeNotFound {
                        uuid: uuid.clone(),
                    })
                }
            },
            (None, Some(name)) => self
                .store
                .fetch_entity_by_name(name, group_id)
                .await?
                .ok_or_else(|| MnemosError::NodeNotFound { uuid: name.clone() })?,
            (None, None) => {
                return Err(MnemosError::Validation {
                    message: "traverse requires start_entity_uuid or start_entity_name".to_string(),
                })
            }
        };

        let hops = params.max_hops.unwrap_or(DEFAULT_TRAVERSE_HOPS);
        let direction = params.direction.unwrap_or(Direction::Both);
        let limit = params.limit.unwrap_or(DEFAULT_TRAVERSE_LIMIT);

        let nodes = self
            .store
            .variable_length_match(
                &[start.uuid.clone()],
                hops,
                direction,
                group_id,
                limit,
            )
            .await?;

        let mut uuids: Vec<String> = nodes.iter().map(|n| n.uuid().to_string()).collect();
        uuids.push(start.uuid.clone());
        let edges = self.store.edges_among(&uuids, group_id).await?;

        Ok(TraverseResult {
            start,
            nodes,
            edges,
        })
    }
}
