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

//! Phase 3: community detection.
//!
//! Single-pass Louvain local modularity optimisation over the undirected
//! entity graph (uniform edge weight, no multi-level contraction), followed
//! by Jaccard-based UUID reuse so stable clusters keep their identity across
//! cycles, an LLM digest per retained community, and a `HAS_MEMBER` rebuild.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::report::Phase3Report;
use super::SleepOptions;
use crate::edges::CommunityEdge;
use crate::errors::MnemosResult;
use crate::graph::GraphStore;
use crate::helpers::utc_now;
use crate::llm_client::LlmClient;
use crate::nodes::{CommunityNode, EntityNode};
use crate::prompts::community::{
    community_digest_messages, community_digest_schema, CommunityDigest,
};
use crate::types::Clients;

/// Jaccard overlap at or above which an existing community keeps its UUID
pub const UUID_REUSE_JACCARD: f64 = 0.7;

/// Undirected weighted graph over entity uuids
#[derive(Debug, Default)]
pub struct EntityGraph {
    /// Sorted for deterministic iteration
    nodes: Vec<String>,
    adjacency: HashMap<String, HashMap<String, f64>>,
    degrees: HashMap<String, f64>,
    total_weight: f64,
}

/// Build the undirected graph: uniform weight 1 per edge, self-loops and
/// edges with unknown endpoints skipped, parallel edges accumulated.
pub fn build_graph(entity_uuids: &[String], edges: &[(String, String)]) -> EntityGraph {
    let known: HashSet<&str> = entity_uuids.iter().map(|s| s.as_str()).collect();

    let mut graph = EntityGraph {
        nodes: entity_uuids.to_vec(),
        ..EntityGraph::default()
    };
    graph.nodes.sort();
    graph.nodes.dedup();

    for uuid in &graph.nodes {
        graph.adjacency.insert(uuid.clone(), HashMap::new());
        graph.degrees.insert(uuid.clone(), 0.0);
    }

    for (src, tgt) in edges {
        if src == tgt || !known.contains(src.as_str()) || !known.contains(tgt.as_str()) {
            continue;
        }
        *graph
            .adjacency
            .get_mut(src)
            .expect("node present")
            .entry(tgt.clone())
            .or_insert(0.0) += 1.0;
        *graph
            .adjacency
            .get_mut(tgt)
            .expect("node present")
            .entry(src.clone())
            .or_insert(0.0) += 1.0;
        *graph.degrees.get_mut(src).expect("node present") += 1.0;
        *graph.degrees.get_mut(tgt).expect("node present") += 1.0;
        graph.total_weight += 1.0;
    }

    graph
}

/// Single-pass Louvain: every entity starts in its own community; nodes move
/// to the neighbouring community with the largest positive modularity gain
/// until a full pass makes no move. An edgeless graph stays all-singletons.
pub fn louvain_communities(graph: &EntityGraph) -> Vec<Vec<String>> {
    let mut community: HashMap<String, String> = graph
        .nodes
        .iter()
        .map(|uuid| (uuid.clone(), uuid.clone()))
        .collect();

    let m = graph.total_weight;
    if m > 0.0 {
        let mut sigma_tot: HashMap<String, f64> = graph
            .nodes
            .iter()
            .map(|uuid| (uuid.clone(), graph.degrees[uuid]))
            .collect();

        loop {
            let mut moved = false;

            for node in &graph.nodes {
                let k_i = graph.degrees[node];
                let c_old = community[node].clone();

                // Link weights from this node into each neighbouring community
                let mut k_to: HashMap<String, f64> = HashMap::new();
                for (neighbour, weight) in &graph.adjacency[node] {
                    *k_to.entry(community[neighbour].clone()).or_insert(0.0) += weight;
                }
                let k_old = k_to.get(&c_old).copied().unwrap_or(0.0);

                let mut best: Option<(String, f64)> = None;
                let mut candidates: Vec<&String> = k_to.keys().collect();
                candidates.sort();
                for candidate in candidates {
                    if *candidate == c_old {
                        continue;
                    }
                    let k_new = k_to[candidate];
                    let delta = (k_new - k_old) / m
                        - k_i * (sigma_tot[candidate] - sigma_tot[&c_old] + k_i)
                            / (2.0 * m * m);
                    if delta > 0.0 && best.as_ref().map_or(true, |(_, b)| delta > *b) {
                        best = Some((candidate.clone(), delta));
                    }
                }

                if let Some((c_new, _)) = best {
                    *sigma_tot.get_mut(&c_old).expect("community tracked") -= k_i;
                    *sigma_tot.get_mut(&c_new).expect("community tracked") += k_i;
                    community.insert(node.clone(), c_new);
                    moved = true;
                }
            }

            if !moved {
                break;
            }
        }
    }

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for node in &graph.nodes {
        grouped
            .entry(community[node].clone())
            .or_default()
            .push(node.clone());
    }

    let mut result: Vec<Vec<String>> = grouped.into_values().collect();
    for members in &mut result {
        members.sort();
    }
    result.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
    result
}

/// Jaccard overlap of two member sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Match new member sets against existing communities; a best overlap at or
/// above the threshold reuses that community's UUID, each existing UUID
/// claimed at most once per cycle.
pub fn assign_uuids(
    new_communities: &[Vec<String>],
    existing: &[CommunityNode],
) -> Vec<Option<String>> {
    let existing_sets: Vec<(String, HashSet<String>)> = existing
        .iter()
        .map(|c| {
            (
                c.uuid.clone(),
                c.member_entity_ids.iter().cloned().collect(),
            )
        })
        .collect();

    let mut claimed: HashSet<String> = HashSet::new();
    let mut assignments = Vec::with_capacity(new_communities.len());

    for members in new_communities {
        let member_set: HashSet<String> = members.iter().cloned().collect();
        let best = existing_sets
            .iter()
            .filter(|(uuid, _)| !claimed.contains(uuid))
            .map(|(uuid, set)| (uuid, jaccard(&member_set, set)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((uuid, overlap)) if overlap >= UUID_REUSE_JACCARD => {
                claimed.insert(uuid.clone());
                assignments.push(Some(uuid.clone()));
            }
            _ => assignments.push(None),
        }
    }

    assignments
}

/// Run Phase 3 on one group
pub(crate) async fn run(
    clients: &Clients,
    store: &GraphStore,
    group_id: &str,
    options: &SleepOptions,
) -> MnemosResult<Phase3Report> {
    let entities = store.load_entities(group_id).await?;
    let entity_count = entities.len();

    if entity_count < options.min_graph_size {
        debug!(entity_count, "community detection skipped: graph too small");
        return Ok(Phase3Report::skipped("graph below minimum size", entity_count));
    }

    let existing = store.load_communities(group_id).await?;
    let last_count = existing
        .iter()
        .map(|c| c.entity_count_at_last_rebuild)
        .max()
        .unwrap_or(0);
    if (entity_count as i64) - last_count < options.rebuild_threshold {
        debug!(
            entity_count,
            last_count, "community detection skipped: growth below rebuild threshold"
        );
        return Ok(Phase3Report::skipped(
            "entity growth below rebuild threshold",
            entity_count,
        ));
    }

    let entity_uuids: Vec<String> = entities.iter().map(|e| e.uuid.clone()).collect();
    let edges = store.load_relation_pairs(group_id).await?;
    let graph = build_graph(&entity_uuids, &edges);

    let detected: Vec<Vec<String>> = louvain_communities(&graph)
        .into_iter()
        .filter(|members| members.len() >= options.min_community_size)
        .collect();
    let assignments = assign_uuids(&detected, &existing);

    if options.dry_run {
        let reused: usize = assignments.iter().flatten().count();
        return Ok(Phase3Report {
            skipped: false,
            reason: None,
            communities_built: detected.len(),
            communities_removed: existing.len() - reused,
            entity_count,
        });
    }

    let entity_by_uuid: HashMap<&str, &EntityNode> =
        entities.iter().map(|e| (e.uuid.as_str(), e)).collect();
    let existing_by_uuid: HashMap<&str, &CommunityNode> =
        existing.iter().map(|c| (c.uuid.as_str(), c)).collect();

    let now = utc_now();
    // Every Jaccard-matched uuid survives this cycle, even if its rebuild
    // fails below; only communities no detected cluster matched are stale.
    let kept: HashSet<String> = assignments.iter().flatten().cloned().collect();
    let mut report = Phase3Report {
        entity_count,
        ..Phase3Report::default()
    };

    for (members, assigned_uuid) in detected.iter().zip(&assignments) {
        let member_summaries: Vec<String> = members
            .iter()
            .filter_map(|uuid| entity_by_uuid.get(uuid.as_str()))
            .map(|e| format!("{}: {}", e.name, e.summary))
            .collect();

        let messages = community_digest_messages(&member_summaries);
        let response = match clients
            .llm_client
            .generate_structured(&messages, &community_digest_schema())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "community digest failed; community skipped");
                continue;
            }
        };
        let digest: CommunityDigest = match response.parse() {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "community digest payload rejected; community skipped");
                continue;
            }
        };

        let embedding = match clients.embedder.embed(&digest.summary).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "community embedding failed; community skipped");
                continue;
            }
        };

        let mut node = CommunityNode::new(digest.name, group_id.to_string(), digest.summary);
        if let Some(reused_uuid) = assigned_uuid {
            node.uuid = reused_uuid.clone();
            if let Some(previous) = existing_by_uuid.get(reused_uuid.as_str()) {
                node.created_at = previous.created_at;
            }
        }
        node.summary_embedding = Some(embedding);
        node.member_entity_ids = members.clone();
        node.member_count = members.len() as i64;
        node.domain_hints = digest.domain_hints;
        node.importance_score = digest.importance_score.clamp(0.0, 1.0);
        node.entity_count_at_last_rebuild = entity_count as i64;
        node.last_full_rebuild = Some(now);

        store.upsert_community(&node).await?;
        store.delete_has_member_edges(&node.uuid).await?;
        for member_uuid in members {
            let edge = CommunityEdge::new(
                group_id.to_string(),
                node.uuid.clone(),
                member_uuid.clone(),
            );
            store.upsert_community_edge(&edge).await?;
        }

        report.communities_built += 1;
    }

    // Anything whose UUID was not carried forward is stale
    for stale in existing.iter().filter(|c| !kept.contains(&c.uuid)) {
        store.detach_delete(&stale.uuid).await?;
        report.communities_removed += 1;
    }

    info!(
        built = report.communities_built,
        removed = report.communities_removed,
        "community detection complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory_cache::MemoryCache, CacheConfig};
    use crate::embedder::EmbedderClient;
    use crate::errors::LlmResult;
    use crate::llm_client::{JsonSchema, Message, StructuredResponse, TokenUsage};
    use crate::nodes::EntityType;
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

    fn uuids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn edge_list(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_edgeless_graph_stays_singletons() {
        let graph = build_graph(&uuids(&["a", "b", "c"]), &[]);
        let communities = louvain_communities(&graph);
        assert_eq!(communities.len(), 3);
        assert!(communities.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_build_graph_skips_self_loops_and_unknown_endpoints() {
        let graph = build_graph(
            &uuids(&["a", "b"]),
            &edge_list(&[("a", "a"), ("a", "ghost"), ("a", "b")]),
        );
        assert_eq!(graph.total_weight, 1.0);
        assert_eq!(graph.degrees["a"], 1.0);
    }

    #[test]
    fn test_louvain_separates_two_cliques() {
        // Two triangles joined by a single bridge edge
        let nodes = uuids(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let edges = edge_list(&[
            ("a1", "a2"),
            ("a2", "a3"),
            ("a1", "a3"),
            ("b1", "b2"),
            ("b2", "b3"),
            ("b1", "b3"),
            ("a1", "b1"),
        ]);

        let communities = louvain_communities(&build_graph(&nodes, &edges));

        assert_eq!(communities.len(), 2);
        let sets: Vec<HashSet<&str>> = communities
            .iter()
            .map(|c| c.iter().map(|s| s.as_str()).collect())
            .collect();
        assert!(sets.contains(&HashSet::from(["a1", "a2", "a3"])));
        assert!(sets.contains(&HashSet::from(["b1", "b2", "b3"])));
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = uuids(&["x", "y", "z"]).into_iter().collect();
        let b: HashSet<String> = uuids(&["x", "y", "w"]).into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_assign_uuids_reuses_on_high_overlap() {
        let mut stable = CommunityNode::new(
            "cluster".to_string(),
            "g".to_string(),
            "summary".to_string(),
        );
        stable.member_entity_ids = uuids(&["a", "b", "c", "d"]);

        // Same members plus one newcomer: overlap 4/5 = 0.8
        let detected = vec![uuids(&["a", "b", "c", "d", "e"])];
        let assignments = assign_uuids(&detected, &[stable.clone()]);
        assert_eq!(assignments[0].as_deref(), Some(stable.uuid.as_str()));

        // Disjoint members: fresh uuid
        let detected = vec![uuids(&["x", "y", "z"])];
        let assignments = assign_uuids(&detected, &[stable]);
        assert_eq!(assignments[0], None);
    }

    #[test]
    fn test_assign_uuids_claims_each_existing_once() {
        let mut existing = CommunityNode::new("c".to_string(), "g".to_string(), "s".to_string());
        existing.member_entity_ids = uuids(&["a", "b", "c"]);

        let detected = vec![uuids(&["a", "b", "c"]), uuids(&["a", "b", "c"])];
        let assignments = assign_uuids(&detected, &[existing]);
        assert!(assignments[0].is_some());
        assert_eq!(assignments[1], None);
    }

    fn seeded_entities(count: usize) -> Vec<EntityNode> {
        (0..count)
            .map(|i| {
                let mut e = EntityNode::new(
                    format!("entity-{:02}", i),
                    "g".to_string(),
                    EntityType::Concept,
                    format!("summary {}", i),
                );
                e.uuid = format!("uuid-{:02}", i);
                e
            })
            .collect()
    }

    fn entities_response(entities: &[EntityNode]) -> Vec<crate::database::QueryRow> {
        entities
            .iter()
            .map(|e| FakeDriver::row(&[("node", serde_json::to_value(e).unwrap())]))
            .collect()
    }

    #[tokio::test]
    async fn test_run_skips_small_graphs() {
        let driver = Arc::new(FakeDriver::new());
        driver.push_response(
            "MATCH (n:Entity {group_id: $group_id})",
            entities_response(&seeded_entities(5)),
        );

        let clients = Clients::new(
            driver.clone(),
            Arc::new(MockLlm::new()),
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        );
        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);

        let report = run(&clients, &store, "g", &SleepOptions::default())
            .await
            .unwrap();

        assert!(report.skipped);
        assert_eq!(report.entity_count, 5);
        assert!(driver.calls_matching("MERGE (n:Community").is_empty());
    }

    #[tokio::test]
    async fn test_run_skips_when_growth_below_threshold() {
        let driver = Arc::new(FakeDriver::new());
        let entities = seeded_entities(20);
        driver.push_response(
            "MATCH (n:Entity {group_id: $group_id})",
            entities_response(&entities),
        );

        let mut existing =
            CommunityNode::new("old".to_string(), "g".to_string(), "s".to_string());
        existing.entity_count_at_last_rebuild = 19;
        driver.push_response(
            "MATCH (n:Community {group_id: $group_id})",
            vec![FakeDriver::row(&[(
                "node",
                serde_json::to_value(&existing).unwrap(),
            )])],
        );

        let clients = Clients::new(
            driver.clone(),
            Arc::new(MockLlm::new()),
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        );
        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);

        let report = run(&clients, &store, "g", &SleepOptions::default())
            .await
            .unwrap();

        assert!(report.skipped);
        assert_eq!(report.reason.as_deref(), Some("entity growth below rebuild threshold"));
        assert!(driver.calls_matching("DETACH DELETE").is_empty());
    }

    #[tokio::test]
    async fn test_run_builds_communities_and_removes_stale() {
        let driver = Arc::new(FakeDriver::new());
        let entities = seeded_entities(15);
        driver.push_response(
            "MATCH (n:Entity {group_id: $group_id})",
            entities_response(&entities),
        );

        // One stale existing community that will not be matched
        let mut stale = CommunityNode::new("stale".to_string(), "g".to_string(), "s".to_string());
        stale.member_entity_ids = uuids(&["gone-1", "gone-2", "gone-3"]);
        driver.push_response(
            "MATCH (n:Community {group_id: $group_id})",
            vec![FakeDriver::row(&[(
                "node",
                serde_json::to_value(&stale).unwrap(),
            )])],
        );

        // Three 5-cliques: uuid-00..04, uuid-05..09, uuid-10..14
        let mut pairs = Vec::new();
        for block in 0..3usize {
            for i in 0..5usize {
                for j in (i + 1)..5usize {
                    pairs.push((
                        format!("uuid-{:02}", block * 5 + i),
                        format!("uuid-{:02}", block * 5 + j),
                    ));
                }
            }
        }
        let edge_rows: Vec<crate::database::QueryRow> = pairs
            .iter()
            .map(|(a, b)| FakeDriver::row(&[("src", json!(a)), ("tgt", json!(b))]))
            .collect();
        driver.push_response("RETURN {src: a.uuid, tgt: b.uuid}", edge_rows);

        let mut llm = MockLlm::new();
        llm.expect_generate_structured().returning(|_, _| {
            Ok(StructuredResponse {
                data: json!({
                    "name": "a cluster",
                    "summary": "entities that belong together",
                    "domain_hints": ["knowledge-graph"],
                    "importance_score": 0.6,
                }),
                usage: TokenUsage::default(),
            })
        });
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1]));

        let clients = Clients::new(
            driver.clone(),
            Arc::new(llm),
            Arc::new(embedder),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        );
        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);

        let report = run(&clients, &store, "g", &SleepOptions::default())
            .await
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.communities_built, 3);
        assert_eq!(report.communities_removed, 1);
        assert_eq!(report.entity_count, 15);

        assert_eq!(driver.calls_matching("MERGE (n:Community").len(), 3);
        // 15 HAS_MEMBER edges rebuilt, stale community dropped
        assert_eq!(
            driver
                .calls_matching("MERGE (community)-[r:HAS_MEMBER")
                .len(),
            15
        );
        let deletes = driver.calls_matching("DETACH DELETE");
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            crate::database::param_to_json(deletes[0].1.get("uuid").unwrap()),
            json!(stale.uuid)
        );
    }

    #[tokio::test]
    async fn test_run_keeps_reused_community_when_digest_fails() {
        let driver = Arc::new(FakeDriver::new());
        let entities = seeded_entities(15);
        driver.push_response(
            "MATCH (n:Entity {group_id: $group_id})",
            entities_response(&entities),
        );

        // One community that the first detected cluster will Jaccard-match,
        // one whose members are gone
        let mut reused =
            CommunityNode::new("reused".to_string(), "g".to_string(), "s".to_string());
        reused.member_entity_ids = uuids(&["uuid-00", "uuid-01", "uuid-02", "uuid-03", "uuid-04"]);
        let mut stale = CommunityNode::new("stale".to_string(), "g".to_string(), "s".to_string());
        stale.member_entity_ids = uuids(&["gone-1", "gone-2", "gone-3"]);
        driver.push_response(
            "MATCH (n:Community {group_id: $group_id})",
            vec![
                FakeDriver::row(&[("node", serde_json::to_value(&reused).unwrap())]),
                FakeDriver::row(&[("node", serde_json::to_value(&stale).unwrap())]),
            ],
        );

        let mut pairs = Vec::new();
        for block in 0..3usize {
            for i in 0..5usize {
                for j in (i + 1)..5usize {
                    pairs.push((
                        format!("uuid-{:02}", block * 5 + i),
                        format!("uuid-{:02}", block * 5 + j),
                    ));
                }
            }
        }
        let edge_rows: Vec<crate::database::QueryRow> = pairs
            .iter()
            .map(|(a, b)| FakeDriver::row(&[("src", json!(a)), ("tgt", json!(b))]))
            .collect();
        driver.push_response("RETURN {src: a.uuid, tgt: b.uuid}", edge_rows);

        // Every digest call fails this cycle
        let mut llm = MockLlm::new();
        llm.expect_generate_structured().returning(|_, _| {
            Err(crate::errors::LlmError::EmptyResponse {
                message: "nothing".to_string(),
            })
        });

        let clients = Clients::new(
            driver.clone(),
            Arc::new(llm),
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryCache::new(CacheConfig::default())),
        );
        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);

        let report = run(&clients, &store, "g", &SleepOptions::default())
            .await
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.communities_built, 0);
        assert_eq!(report.communities_removed, 1);

        // The matched community survives the failed rebuild; only the
        // unmatched one is removed
        let deletes = driver.calls_matching("DETACH DELETE");
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            crate::database::param_to_json(deletes[0].1.get("uuid").unwrap()),
            json!(stale.uuid)
        );
    }
}
