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

//! Graph store facade.
//!
//! The facade owns the Cypher vocabulary of the engine: node and edge
//! upserts (each a single `MERGE ... SET` statement), cosine similarity
//! expressed as a `reduce()` fragment over list-valued embedding properties,
//! and the variable-length path queries retrieval and maintenance run.
//! Every bounded quantity (LIMIT, hop count) travels as an integer.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::database::{json_to_param, param_to_json, GraphDriver, QueryParameter, QueryRow};
use crate::edges::{CommunityEdge, EntityEdge, EpisodicEdge};
use crate::errors::{MnemosError, MnemosResult};
use crate::helpers::{format_db_time, l2_norm};
use crate::nodes::{CommunityNode, EntityNode, EpisodicNode, Node};

/// Traversal direction for neighbour queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn from_str(s: &str) -> MnemosResult<Self> {
        match s.to_lowercase().as_str() {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            _ => Err(MnemosError::InvalidInput(format!(
                "Direction: {} not implemented",
                s
            ))),
        }
    }

    fn arrows(&self) -> (&'static str, &'static str) {
        match self {
            Direction::Outgoing => ("-", "->"),
            Direction::Incoming => ("<-", "-"),
            Direction::Both => ("-", "-"),
        }
    }
}

/// A node with its similarity score
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
}

/// A candidate duplicate pair with node degrees
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub a: EntityNode,
    pub b: EntityNode,
    pub degree_a: i64,
    pub degree_b: i64,
}

/// Typed facade over the graph driver
#[derive(Clone)]
pub struct GraphStore {
    driver: Arc<dyn GraphDriver>,
}

fn props_param<T: Serialize>(value: &T) -> MnemosResult<QueryParameter> {
    let json = serde_json::to_value(value)?;
    Ok(json_to_param(json)?)
}

fn typed_from_param<T: DeserializeOwned>(param: &QueryParameter) -> MnemosResult<T> {
    Ok(serde_json::from_value(param_to_json(param))?)
}

fn embedding_param(embedding: &[f32]) -> QueryParameter {
    QueryParameter::List(
        embedding
            .iter()
            .map(|&x| QueryParameter::Float(x as f64))
            .collect(),
    )
}

fn string_list_param(items: &[String]) -> QueryParameter {
    QueryParameter::List(
        items
            .iter()
            .map(|s| QueryParameter::String(s.clone()))
            .collect(),
    )
}

fn opt_time_param(dt: Option<DateTime<Utc>>) -> QueryParameter {
    match dt {
        Some(dt) => QueryParameter::String(format_db_time(dt)),
        None => QueryParameter::Null,
    }
}

fn node_from_row(row: &QueryRow) -> MnemosResult<Node> {
    let labels: Vec<String> = row
        .get("labels")
        .map(|p| typed_from_param(p))
        .transpose()?
        .unwrap_or_default();
    let props = row
        .get("node")
        .ok_or_else(|| MnemosError::InvalidInput("row missing `node` column".to_string()))?;
    Node::from_parts(&labels, param_to_json(props))
}

/// The cosine-similarity query fragment. Expects `vec` bound in scope and
/// the parameters `$query_vec` / `$query_norm`; yields `similarity`.
const COSINE_FRAGMENT: &str = "\
    WITH n, labels(n) AS node_labels, vec, \
         reduce(dot = 0.0, i IN range(0, size(vec) - 1) | dot + vec[i] * $query_vec[i]) AS dot, \
         sqrt(reduce(sq = 0.0, x IN vec | sq + x * x)) AS norm \
    WHERE norm > 0.0 \
    WITH n, node_labels, dot / (norm * $query_norm) AS similarity ";

impl GraphStore {
    pub fn new(driver: Arc<dyn GraphDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn GraphDriver> {
        &self.driver
    }

    async fn run(
        &self,
        query: &str,
        params: HashMap<String, QueryParameter>,
    ) -> MnemosResult<Vec<QueryRow>> {
        Ok(self.driver.execute(query, params).await?)
    }

    // ── Upserts ──────────────────────────────────────────────────────────

    /// Merge an entity by uuid, setting all properties in one statement
    pub async fn upsert_entity(&self, node: &EntityNode) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(node.uuid.clone())),
            ("props".to_string(), props_param(node)?),
        ]);
        self.run(
            "MERGE (n:Entity {uuid: $uuid}) SET n += $props",
            params,
        )
        .await?;
        Ok(())
    }

    pub async fn upsert_episode(&self, node: &EpisodicNode) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(node.uuid.clone())),
            ("props".to_string(), props_param(node)?),
        ]);
        self.run(
            "MERGE (n:Episodic {uuid: $uuid}) SET n += $props",
            params,
        )
        .await?;
        Ok(())
    }

    pub async fn upsert_community(&self, node: &CommunityNode) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(node.uuid.clone())),
            ("props".to_string(), props_param(node)?),
        ]);
        self.run(
            "MERGE (n:Community {uuid: $uuid}) SET n += $props",
            params,
        )
        .await?;
        Ok(())
    }

    /// Merge a `RELATES_TO` edge by uuid between existing entities
    pub async fn upsert_entity_edge(&self, edge: &EntityEdge) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(edge.uuid.clone())),
            (
                "src".to_string(),
                QueryParameter::String(edge.source_node_uuid.clone()),
            ),
            (
                "tgt".to_string(),
                QueryParameter::String(edge.target_node_uuid.clone()),
            ),
            ("props".to_string(), props_param(edge)?),
        ]);
        self.run(
            "MATCH (a:Entity {uuid: $src}) \
             MATCH (b:Entity {uuid: $tgt}) \
             MERGE (a)-[r:RELATES_TO {uuid: $uuid}]->(b) \
             SET r += $props",
            params,
        )
        .await?;
        Ok(())
    }

    /// Merge a `MENTIONS` edge by uuid from an episode to an entity
    pub async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(edge.uuid.clone())),
            (
                "episode_uuid".to_string(),
                QueryParameter::String(edge.source_node_uuid.clone()),
            ),
            (
                "entity_uuid".to_string(),
                QueryParameter::String(edge.target_node_uuid.clone()),
            ),
            ("props".to_string(), props_param(edge)?),
        ]);
        self.run(
            "MATCH (episode:Episodic {uuid: $episode_uuid}) \
             MATCH (entity:Entity {uuid: $entity_uuid}) \
             MERGE (episode)-[r:MENTIONS {uuid: $uuid}]->(entity) \
             SET r += $props",
            params,
        )
        .await?;
        Ok(())
    }

    /// Merge a `HAS_MEMBER` edge by uuid from a community to an entity
    pub async fn upsert_community_edge(&self, edge: &CommunityEdge) -> MnemosResult<()> {
        let params = HashMap::from([
            ("uuid".to_string(), QueryParameter::String(edge.uuid.clone())),
            (
                "community_uuid".to_string(),
                QueryParameter::String(edge.source_node_uuid.clone()),
            ),
            (
                "entity_uuid".to_string(),
                QueryParameter::String(edge.target_node_uuid.clone()),
            ),
            ("props".to_string(), props_param(edge)?),
        ]);
        self.run(
            "MATCH (community:Community {uuid: $community_uuid}) \
             MATCH (entity:Entity {uuid: $entity_uuid}) \
             MERGE (community)-[r:HAS_MEMBER {uuid: $uuid}]->(entity) \
             SET r += $props",
            params,
        )
        .await?;
        Ok(())
    }

    /// Tiered migration upsert: merge by `(src, tgt, name, group_id)`.
    /// On create the edge takes the migrated properties wholesale; on match
    /// only the episode list is concatenated (duplicates tolerated).
    pub async fn upsert_migrated_edge(&self, edge: &EntityEdge) -> MnemosResult<()> {
        let params = HashMap::from([
            (
                "src".to_string(),
                QueryParameter::String(edge.source_node_uuid.clone()),
            ),
            (
                "tgt".to_string(),
                QueryParameter::String(edge.target_node_uuid.clone()),
            ),
            ("name".to_string(), QueryParameter::String(edge.name.clone())),
            (
                "group_id".to_string(),
                QueryParameter::String(edge.group_id.clone()),
            ),
            ("props".to_string(), props_param(edge)?),
            ("episodes".to_string(), string_list_param(&edge.episodes)),
        ]);
        self.run(
            "MATCH (a:Entity {uuid: $src}) \
             MATCH (b:Entity {uuid: $tgt}) \
             MERGE (a)-[r:RELATES_TO {name: $name, group_id: $group_id}]->(b) \
             ON CREATE SET r += $props \
             ON MATCH SET r.episodes = coalesce(r.episodes, []) + $episodes",
            params,
        )
        .await?;
        Ok(())
    }

    // ── Lookups ──────────────────────────────────────────────────────────

    /// Exact case-sensitive name lookup within `(group_id, Entity)`
    pub async fn fetch_entity_by_name(
        &self,
        name: &str,
        group_id: &str,
    ) -> MnemosResult<Option<EntityNode>> {
        let params = HashMap::from([
            ("name".to_string(), QueryParameter::String(name.to_string())),
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
        ]);
        let rows = self
            .run(
                "MATCH (n:Entity {name: $name, group_id: $group_id}) \
                 RETURN {node: properties(n)} AS row LIMIT 1",
                params,
            )
            .await?;

        match rows.first().and_then(|r| r.get("node")) {
            Some(props) => Ok(Some(typed_from_param(props)?)),
            None => Ok(None),
        }
    }

    async fn fetch_edge_inner(
        &self,
        src: &str,
        tgt: &str,
        name: &str,
        group_id: &str,
        active_only: bool,
    ) -> MnemosResult<Option<EntityEdge>> {
        let filter = if active_only {
            "AND r.invalid_at IS NULL"
        } else {
            ""
        };
        let query = format!(
            "MATCH (:Entity {{uuid: $src}})-[r:RELATES_TO {{name: $name}}]->(:Entity {{uuid: $tgt}}) \
             WHERE r.group_id = $group_id {filter} \
             RETURN {{edge: properties(r)}} AS row LIMIT 1"
        );
        let params = HashMap::from([
            ("src".to_string(), QueryParameter::String(src.to_string())),
            ("tgt".to_string(), QueryParameter::String(tgt.to_string())),
            ("name".to_string(), QueryParameter::String(name.to_string())),
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
        ]);
        let rows = self.run(&query, params).await?;

        match rows.first().and_then(|r| r.get("edge")) {
            Some(props) => Ok(Some(typed_from_param(props)?)),
            None => Ok(None),
        }
    }

    /// Fetch the `(src)-[RELATES_TO {name}]->(tgt)` edge regardless of validity
    pub async fn fetch_edge_between(
        &self,
        src: &str,
        tgt: &str,
        name: &str,
        group_id: &str,
    ) -> MnemosResult<Option<EntityEdge>> {
        self.fetch_edge_inner(src, tgt, name, group_id, false).await
    }

    /// Fetch the active (`invalid_at IS NULL`) edge only
    pub async fn fetch_active_edge_between(
        &self,
        src: &str,
        tgt: &str,
        name: &str,
        group_id: &str,
    ) -> MnemosResult<Option<EntityEdge>> {
        self.fetch_edge_inner(src, tgt, name, group_id, true).await
    }

    /// Fetch any node by uuid, materialised by label
    pub async fn get_node(&self, uuid: &str) -> MnemosResult<Option<Node>> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(uuid.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH (n {uuid: $uuid}) \
                 RETURN {node: properties(n), labels: labels(n)} AS row LIMIT 1",
                params,
            )
            .await?;

        match rows.first() {
            Some(row) => Ok(Some(node_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch a `RELATES_TO` edge by uuid
    pub async fn get_edge(&self, uuid: &str) -> MnemosResult<Option<EntityEdge>> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(uuid.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH ()-[r:RELATES_TO {uuid: $uuid}]->() \
                 RETURN {edge: properties(r)} AS row LIMIT 1",
                params,
            )
            .await?;

        match rows.first().and_then(|r| r.get("edge")) {
            Some(props) => Ok(Some(typed_from_param(props)?)),
            None => Ok(None),
        }
    }

    /// Most recently ingested episodes in a group
    pub async fn recent_episodes(
        &self,
        group_id: &str,
        limit: i64,
    ) -> MnemosResult<Vec<EpisodicNode>> {
        let params = HashMap::from([
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
            ("limit".to_string(), QueryParameter::Integer(limit)),
        ]);
        let rows = self
            .run(
                "MATCH (n:Episodic {group_id: $group_id}) \
                 RETURN {node: properties(n)} AS row \
                 ORDER BY n.created_at DESC LIMIT $limit",
                params,
            )
            .await?;

        rows.iter()
            .filter_map(|r| r.get("node"))
            .map(typed_from_param)
            .collect()
    }

    // ── Similarity & traversal ───────────────────────────────────────────

    /// Cosine-similarity search over the label union, ordered descending.
    ///
    /// The date window constrains Episodic nodes only; Entity and Community
    /// rows pass through it untouched.
    pub async fn similarity_search(
        &self,
        group_id: &str,
        query_embedding: &[f32],
        labels: &[&str],
        limit: i64,
        min_score: Option<f64>,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> MnemosResult<Vec<ScoredNode>> {
        let query_norm = l2_norm(query_embedding);
        if query_norm < 1e-12 {
            return Ok(Vec::new());
        }

        let query = format!(
            "MATCH (n) \
             WHERE n.group_id = $group_id \
               AND any(l IN labels(n) WHERE l IN $labels) \
               AND (NOT 'Episodic' IN labels(n) OR \
                    (($valid_from IS NULL OR n.valid_at >= $valid_from) AND \
                     ($valid_to IS NULL OR n.valid_at <= $valid_to))) \
             WITH n, coalesce(n.embedding, n.summary_embedding) AS vec \
             WHERE vec IS NOT NULL AND size(vec) = size($query_vec) \
             {COSINE_FRAGMENT} \
             WHERE similarity > $min_score \
             RETURN {{node: properties(n), labels: node_labels, similarity: similarity}} AS row \
             ORDER BY similarity DESC LIMIT $limit"
        );

        let params = HashMap::from([
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
            (
                "labels".to_string(),
                QueryParameter::List(
                    labels
                        .iter()
                        .map(|l| QueryParameter::String(l.to_string()))
                        .collect(),
                ),
            ),
            ("query_vec".to_string(), embedding_param(query_embedding)),
            ("query_norm".to_string(), QueryParameter::Float(query_norm)),
            (
                "min_score".to_string(),
                QueryParameter::Float(min_score.unwrap_or(-1.0)),
            ),
            ("valid_from".to_string(), opt_time_param(valid_from)),
            ("valid_to".to_string(), opt_time_param(valid_to)),
            ("limit".to_string(), QueryParameter::Integer(limit)),
        ]);

        let rows = self.run(&query, params).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let score = row
                .get("similarity")
                .and_then(|p| p.as_f64())
                .unwrap_or(0.0);
            results.push(ScoredNode {
                node: node_from_row(row)?,
                score,
            });
        }
        Ok(results)
    }

    /// Entities reachable within `hops` `RELATES_TO` edges of the seeds.
    ///
    /// Cypher does not parameterise variable-length bounds, so the clamped
    /// hop count is formatted into the pattern; LIMIT stays a parameter.
    pub async fn variable_length_match(
        &self,
        src_uuids: &[String],
        hops: i64,
        direction: Direction,
        group_id: &str,
        limit: i64,
    ) -> MnemosResult<Vec<Node>> {
        if src_uuids.is_empty() {
            return Ok(Vec::new());
        }

        let hops = hops.clamp(1, 10);
        let (left, right) = direction.arrows();
        let query = format!(
            "MATCH (s:Entity) WHERE s.uuid IN $uuids AND s.group_id = $group_id \
             MATCH (s){left}[:RELATES_TO*1..{hops}]{right}(m:Entity) \
             WHERE m.group_id = $group_id AND NOT m.uuid IN $uuids \
             RETURN DISTINCT {{node: properties(m), labels: labels(m)}} AS row \
             LIMIT $limit"
        );

        let params = HashMap::from([
            ("uuids".to_string(), string_list_param(src_uuids)),
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
            ("limit".to_string(), QueryParameter::Integer(limit)),
        ]);

        let rows = self.run(&query, params).await?;
        rows.iter().map(node_from_row).collect()
    }

    /// Entity members of the given communities
    pub async fn community_members(
        &self,
        community_uuids: &[String],
        group_id: &str,
    ) -> MnemosResult<Vec<Node>> {
        if community_uuids.is_empty() {
            return Ok(Vec::new());
        }

        let params = HashMap::from([
            ("uuids".to_string(), string_list_param(community_uuids)),
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
        ]);
        let rows = self
            .run(
                "MATCH (c:Community)-[:HAS_MEMBER]->(m:Entity) \
                 WHERE c.uuid IN $uuids AND m.group_id = $group_id \
                 RETURN DISTINCT {node: properties(m), labels: labels(m)} AS row",
                params,
            )
            .await?;

        rows.iter().map(node_from_row).collect()
    }

    /// `RELATES_TO` edges whose endpoints are both inside the uuid set
    pub async fn edges_among(
        &self,
        uuids: &[String],
        group_id: &str,
    ) -> MnemosResult<Vec<EntityEdge>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let params = HashMap::from([
            ("uuids".to_string(), string_list_param(uuids)),
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
        ]);
        let rows = self
            .run(
                "MATCH (a:Entity)-[r:RELATES_TO]->(b:Entity) \
                 WHERE a.uuid IN $uuids AND b.uuid IN $uuids AND r.group_id = $group_id \
                 RETURN {edge: properties(r)} AS row",
                params,
            )
            .await?;

        rows.iter()
            .filter_map(|r| r.get("edge"))
            .map(typed_from_param)
            .collect()
    }

    /// Active `RELATES_TO` edges incident to one entity, with peer names.
    /// Returns `(edge, peer_name, outgoing)` triples.
    pub async fn entity_relations_with_peers(
        &self,
        entity_uuid: &str,
    ) -> MnemosResult<Vec<(EntityEdge, String, bool)>> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(entity_uuid.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH (e:Entity {uuid: $uuid})-[r:RELATES_TO]-(p:Entity) \
                 WHERE r.invalid_at IS NULL AND r.expired_at IS NULL \
                 RETURN {edge: properties(r), peer_name: p.name, \
                         outgoing: startNode(r).uuid = e.uuid} AS row",
                params,
            )
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let edge: EntityEdge = match row.get("edge") {
                Some(props) => typed_from_param(props)?,
                None => continue,
            };
            let peer_name = row
                .get("peer_name")
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string();
            let outgoing = row
                .get("outgoing")
                .and_then(|p| p.as_bool())
                .unwrap_or(true);
            results.push((edge, peer_name, outgoing));
        }
        Ok(results)
    }

    /// 1-hop neighbourhood lines for an entity, capped per direction.
    /// Lines look like `WORKS_AT -> ACME` / `FOUNDED_BY <- Alice`.
    pub async fn neighbourhood_lines(
        &self,
        entity_uuid: &str,
        outgoing_limit: i64,
        incoming_limit: i64,
    ) -> MnemosResult<Vec<String>> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(entity_uuid.to_string()),
        )]);

        let out_rows = self
            .run(
                &format!(
                    "MATCH (e:Entity {{uuid: $uuid}})-[r:RELATES_TO]->(o:Entity) \
                     WHERE r.invalid_at IS NULL AND r.expired_at IS NULL \
                     RETURN {{relation: r.name, peer: o.name}} AS row \
                     ORDER BY r.created_at DESC LIMIT {outgoing_limit}"
                ),
                params.clone(),
            )
            .await?;

        let in_rows = self
            .run(
                &format!(
                    "MATCH (e:Entity {{uuid: $uuid}})<-[r:RELATES_TO]-(o:Entity) \
                     WHERE r.invalid_at IS NULL AND r.expired_at IS NULL \
                     RETURN {{relation: r.name, peer: o.name}} AS row \
                     ORDER BY r.created_at DESC LIMIT {incoming_limit}"
                ),
                params,
            )
            .await?;

        let mut lines = Vec::with_capacity(out_rows.len() + in_rows.len());
        for row in &out_rows {
            let relation = row.get("relation").and_then(|p| p.as_str()).unwrap_or("");
            let peer = row.get("peer").and_then(|p| p.as_str()).unwrap_or("");
            lines.push(format!("{} -> {}", relation, peer));
        }
        for row in &in_rows {
            let relation = row.get("relation").and_then(|p| p.as_str()).unwrap_or("");
            let peer = row.get("peer").and_then(|p| p.as_str()).unwrap_or("");
            lines.push(format!("{} <- {}", relation, peer));
        }
        Ok(lines)
    }

    // ── Maintenance queries ──────────────────────────────────────────────

    /// Entities with enough distinct unconsolidated episodes older than the
    /// cooldown cutoff, ordered by episode count descending.
    pub async fn consolidation_clusters(
        &self,
        group_id: &str,
        cutoff: DateTime<Utc>,
        min_episodes: i64,
        max_entities: i64,
    ) -> MnemosResult<Vec<(EntityNode, Vec<EpisodicNode>)>> {
        let params = HashMap::from([
            (
                "group_id".to_string(),
                QueryParameter::String(group_id.to_string()),
            ),
            (
                "cutoff".to_string(),
                QueryParameter::String(format_db_time(cutoff)),
            ),
            (
                "min_episodes".to_string(),
                QueryParameter::Integer(min_episodes),
            ),
            (
                "max_entities".to_string(),
                QueryParameter::Integer(max_entities),
            ),
        ]);

        let rows = self
            .run(
                "MATCH (ep:Episodic)-[:MENTIONS]->(e:Entity) \
                 WHERE e.group_id = $group_id AND ep.group_id = $group_id \
                   AND ep.consolidated_at IS NULL AND ep.created_at <= $cutoff \
                 WITH e, collect(DISTINCT properties(ep)) AS eps \
                 WHERE size(eps) >= $min_episodes \
                 WITH e, eps ORDER BY size(eps) DESC LIMIT $max_entities \
                 RETURN {entity: properties(e), episodes: eps} AS row",
                params,
            )
            .await?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity: EntityNode = match row.get("entity") {
                Some(props) => typed_from_param(props)?,
                None => continue,
            };
            let episodes: Vec<EpisodicNode> = match row.get("episodes") {
                Some(props) => typed_from_param(props)?,
                None => Vec::new(),
            };
            clusters.push((entity, episodes));
        }
        Ok(clusters)
    }

    /// Stamp `consolidated_at` on a set of episodes
    pub async fn mark_episodes_consolidated(
        &self,
        episode_uuids: &[String],
        at: DateTime<Utc>,
    ) -> MnemosResult<()> {
        if episode_uuids.is_empty() {
            return Ok(());
        }
        let params = HashMap::from([
            ("uuids".to_string(), string_list_param(episode_uuids)),
            ("at".to_string(), QueryParameter::String(format_db_time(at))),
        ]);
        self.run(
            "MATCH (ep:Episodic) WHERE ep.uuid IN $uuids \
             SET ep.consolidated_at = $at",
            params,
        )
        .await?;
        Ok(())
    }

    /// Candidate duplicate pairs: distinct names where one contains the
    /// other case-insensitively, with incident-edge degrees.
    pub async fn dedup_candidate_pairs(&self, group_id: &str) -> MnemosResult<Vec<CandidatePair>> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);

        let rows = self
            .run(
                "MATCH (a:Entity), (b:Entity) \
                 WHERE a.group_id = $group_id AND b.group_id = $group_id \
                   AND a.uuid < b.uuid AND a.name <> b.name \
                   AND (toLower(a.name) CONTAINS toLower(b.name) \
                        OR toLower(b.name) CONTAINS toLower(a.name)) \
                 OPTIONAL MATCH (a)-[ra:RELATES_TO|MENTIONS]-() \
                 WITH a, b, count(ra) AS degree_a \
                 OPTIONAL MATCH (b)-[rb:RELATES_TO|MENTIONS]-() \
                 WITH a, b, degree_a, count(rb) AS degree_b \
                 RETURN {a: properties(a), b: properties(b), \
                         degree_a: degree_a, degree_b: degree_b} AS row",
                params,
            )
            .await?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let a: EntityNode = match row.get("a") {
                Some(props) => typed_from_param(props)?,
                None => continue,
            };
            let b: EntityNode = match row.get("b") {
                Some(props) => typed_from_param(props)?,
                None => continue,
            };
            let degree_a = row.get("degree_a").and_then(|p| p.as_i64()).unwrap_or(0);
            let degree_b = row.get("degree_b").and_then(|p| p.as_i64()).unwrap_or(0);
            pairs.push(CandidatePair {
                a,
                b,
                degree_a,
                degree_b,
            });
        }
        Ok(pairs)
    }

    /// Redirect the duplicate's outgoing `RELATES_TO` edges to the canonical
    /// node, carrying over all properties. Originals die with the duplicate.
    pub async fn redirect_outgoing_edges(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> MnemosResult<()> {
        let params = HashMap::from([
            (
                "dup".to_string(),
                QueryParameter::String(duplicate_uuid.to_string()),
            ),
            (
                "canonical".to_string(),
                QueryParameter::String(canonical_uuid.to_string()),
            ),
        ]);
        self.run(
            "MATCH (dup:Entity {uuid: $dup})-[r:RELATES_TO]->(o) \
             WHERE o.uuid <> $canonical \
             MATCH (c:Entity {uuid: $canonical}) \
             MERGE (c)-[nr:RELATES_TO {uuid: r.uuid}]->(o) \
             SET nr += properties(r)",
            params,
        )
        .await?;
        Ok(())
    }

    /// Symmetric redirection for incoming `RELATES_TO` edges
    pub async fn redirect_incoming_edges(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> MnemosResult<()> {
        let params = HashMap::from([
            (
                "dup".to_string(),
                QueryParameter::String(duplicate_uuid.to_string()),
            ),
            (
                "canonical".to_string(),
                QueryParameter::String(canonical_uuid.to_string()),
            ),
        ]);
        self.run(
            "MATCH (o)-[r:RELATES_TO]->(dup:Entity {uuid: $dup}) \
             WHERE o.uuid <> $canonical \
             MATCH (c:Entity {uuid: $canonical}) \
             MERGE (o)-[nr:RELATES_TO {uuid: r.uuid}]->(c) \
             SET nr += properties(r)",
            params,
        )
        .await?;
        Ok(())
    }

    /// Re-point `MENTIONS` edges from the duplicate to the canonical node
    pub async fn redirect_mentions(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> MnemosResult<()> {
        let params = HashMap::from([
            (
                "dup".to_string(),
                QueryParameter::String(duplicate_uuid.to_string()),
            ),
            (
                "canonical".to_string(),
                QueryParameter::String(canonical_uuid.to_string()),
            ),
        ]);
        self.run(
            "MATCH (ep:Episodic)-[r:MENTIONS]->(dup:Entity {uuid: $dup}) \
             MATCH (c:Entity {uuid: $canonical}) \
             MERGE (ep)-[nr:MENTIONS {uuid: r.uuid}]->(c) \
             SET nr += properties(r)",
            params,
        )
        .await?;
        Ok(())
    }

    /// Delete every evidence-less `RELATES_TO` edge in the group; returns
    /// the number removed
    pub async fn delete_orphan_edges(&self, group_id: &str) -> MnemosResult<i64> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH ()-[r:RELATES_TO]->() \
                 WHERE r.group_id = $group_id \
                   AND (r.episodes IS NULL OR size(r.episodes) = 0) \
                 DELETE r \
                 RETURN {count: count(r)} AS row",
                params,
            )
            .await?;

        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(|p| p.as_i64())
            .unwrap_or(0))
    }

    /// Count evidence-less `RELATES_TO` edges without touching them
    pub async fn count_orphan_edges(&self, group_id: &str) -> MnemosResult<i64> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH ()-[r:RELATES_TO]->() \
                 WHERE r.group_id = $group_id \
                   AND (r.episodes IS NULL OR size(r.episodes) = 0) \
                 RETURN {count: count(r)} AS row",
                params,
            )
            .await?;

        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(|p| p.as_i64())
            .unwrap_or(0))
    }

    /// All entities in a group
    pub async fn load_entities(&self, group_id: &str) -> MnemosResult<Vec<EntityNode>> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH (n:Entity {group_id: $group_id}) \
                 RETURN {node: properties(n)} AS row",
                params,
            )
            .await?;

        rows.iter()
            .filter_map(|r| r.get("node"))
            .map(typed_from_param)
            .collect()
    }

    /// All `RELATES_TO` endpoint pairs in a group
    pub async fn load_relation_pairs(&self, group_id: &str) -> MnemosResult<Vec<(String, String)>> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH (a:Entity)-[r:RELATES_TO]->(b:Entity) \
                 WHERE a.group_id = $group_id AND b.group_id = $group_id \
                 RETURN {src: a.uuid, tgt: b.uuid} AS row",
                params,
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let src = row.get("src")?.as_str()?.to_string();
                let tgt = row.get("tgt")?.as_str()?.to_string();
                Some((src, tgt))
            })
            .collect())
    }

    /// All communities in a group
    pub async fn load_communities(&self, group_id: &str) -> MnemosResult<Vec<CommunityNode>> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        let rows = self
            .run(
                "MATCH (n:Community {group_id: $group_id}) \
                 RETURN {node: properties(n)} AS row",
                params,
            )
            .await?;

        rows.iter()
            .filter_map(|r| r.get("node"))
            .map(typed_from_param)
            .collect()
    }

    /// Drop a community's `HAS_MEMBER` edges ahead of a rebuild
    pub async fn delete_has_member_edges(&self, community_uuid: &str) -> MnemosResult<()> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(community_uuid.to_string()),
        )]);
        self.run(
            "MATCH (c:Community {uuid: $uuid})-[r:HAS_MEMBER]->() DELETE r",
            params,
        )
        .await?;
        Ok(())
    }

    // ── Deletion ─────────────────────────────────────────────────────────

    /// Remove a node and all its relationships
    pub async fn detach_delete(&self, uuid: &str) -> MnemosResult<()> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(uuid.to_string()),
        )]);
        self.run("MATCH (n {uuid: $uuid}) DETACH DELETE n", params)
            .await?;
        Ok(())
    }

    /// Remove a relationship of any type by uuid
    pub async fn delete_edge(&self, uuid: &str) -> MnemosResult<()> {
        let params = HashMap::from([(
            "uuid".to_string(),
            QueryParameter::String(uuid.to_string()),
        )]);
        self.run("MATCH ()-[r {uuid: $uuid}]-() DELETE r", params)
            .await?;
        Ok(())
    }

    /// Clear an entire group partition
    pub async fn delete_group(&self, group_id: &str) -> MnemosResult<()> {
        let params = HashMap::from([(
            "group_id".to_string(),
            QueryParameter::String(group_id.to_string()),
        )]);
        self.run(
            "MATCH (n {group_id: $group_id}) DETACH DELETE n",
            params,
        )
        .await?;
        Ok(())
    }

    /// Create the indexes the engine relies on
    pub async fn build_indices_and_constraints(&self) -> MnemosResult<()> {
        Ok(self.driver.build_indices_and_constraints().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::EntityType;

    #[test]
    fn test_direction_from_str() {
        assert_eq!(Direction::from_str("outgoing").unwrap(), Direction::Outgoing);
        assert_eq!(Direction::from_str("Both").unwrap(), Direction::Both);
        assert!(Direction::from_str("sideways").is_err());
    }

    #[test]
    fn test_direction_arrows() {
        assert_eq!(Direction::Outgoing.arrows(), ("-", "->"));
        assert_eq!(Direction::Incoming.arrows(), ("<-", "-"));
        assert_eq!(Direction::Both.arrows(), ("-", "-"));
    }

    #[test]
    fn test_props_param_keeps_embedding_as_list() {
        let entity = EntityNode::new(
            "Alice".to_string(),
            "g".to_string(),
            EntityType::Person,
            "s".to_string(),
        )
        .with_summary_embedding(vec![0.25, -0.5]);

        let param = props_param(&entity).unwrap();
        let map = param.as_map().unwrap();
        let embedding = map.get("summary_embedding").unwrap().as_list().unwrap();
        assert_eq!(embedding.len(), 2);
        assert_eq!(embedding[0].as_f64(), Some(0.25));
    }

    #[test]
    fn test_node_from_row_dispatches_on_labels() {
        let entity = EntityNode::new(
            "Alice".to_string(),
            "g".to_string(),
            EntityType::Person,
            "s".to_string(),
        );
        let row: QueryRow = HashMap::from([
            (
                "labels".to_string(),
                QueryParameter::List(vec![QueryParameter::String("Entity".to_string())]),
            ),
            ("node".to_string(), props_param(&entity).unwrap()),
        ]);

        let node = node_from_row(&row).unwrap();
        assert_eq!(node.label(), "Entity");
        assert_eq!(node.name(), "Alice");
    }
}
