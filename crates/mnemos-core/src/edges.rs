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

//! Edge types of the graph.
//!
//! Edges refer to nodes and episodes by uuid only, never by pointer; the
//! episode list on a `RELATES_TO` edge is set-logical but stored as an
//! ordered list, deduplicated on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::helpers::{db_time, db_time_opt, utc_now};

/// `RELATES_TO`: a typed relation between two entities.
///
/// `(source_uuid, target_uuid, name)` is unique within a `group_id`. An edge
/// with `invalid_at` set is historical (past-true). A non-empty `disputed_by`
/// means at least one episode contradicts the edge; it stays visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEdge {
    pub uuid: String,
    pub group_id: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    /// UPPER_SNAKE_CASE relation label, e.g. `WORKS_AT`
    pub name: String,
    #[serde(default)]
    pub fact_ids: Vec<String>,
    /// Episodes that introduced or confirmed the edge
    #[serde(default)]
    pub episodes: Vec<String>,
    #[serde(with = "db_time")]
    pub valid_at: DateTime<Utc>,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// Episodes contradicting the edge
    #[serde(default)]
    pub disputed_by: Vec<String>,
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
}

impl EntityEdge {
    pub fn new(
        group_id: String,
        source_node_uuid: String,
        target_node_uuid: String,
        name: String,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            source_node_uuid,
            target_node_uuid,
            name,
            fact_ids: Vec::new(),
            episodes: Vec::new(),
            valid_at,
            invalid_at: None,
            expired_at: None,
            disputed_by: Vec::new(),
            created_at: utc_now(),
        }
    }

    pub fn with_uuid(mut self, uuid: String) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_episodes(mut self, episodes: Vec<String>) -> Self {
        self.episodes = episodes;
        self
    }

    /// Append an episode uuid, deduplicated
    pub fn add_episode(&mut self, episode_uuid: &str) {
        if !self.episodes.iter().any(|u| u == episode_uuid) {
            self.episodes.push(episode_uuid.to_string());
        }
    }

    /// Record a contradicting episode, deduplicated
    pub fn add_dispute(&mut self, episode_uuid: &str) {
        if !self.disputed_by.iter().any(|u| u == episode_uuid) {
            self.disputed_by.push(episode_uuid.to_string());
        }
    }
}

impl PartialEq for EntityEdge {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl std::hash::Hash for EntityEdge {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

/// `MENTIONS`: episode → entity link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEdge {
    pub uuid: String,
    pub group_id: String,
    /// Episode uuid
    pub source_node_uuid: String,
    /// Entity uuid
    pub target_node_uuid: String,
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
}

impl EpisodicEdge {
    pub fn new(group_id: String, episode_uuid: String, entity_uuid: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            source_node_uuid: episode_uuid,
            target_node_uuid: entity_uuid,
            created_at: utc_now(),
        }
    }
}

/// `HAS_MEMBER`: community → entity link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityEdge {
    pub uuid: String,
    pub group_id: String,
    /// Community uuid
    pub source_node_uuid: String,
    /// Entity uuid
    pub target_node_uuid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
}

impl CommunityEdge {
    pub fn new(group_id: String, community_uuid: String, entity_uuid: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            source_node_uuid: community_uuid,
            target_node_uuid: entity_uuid,
            name: "HAS_MEMBER".to_string(),
            description: None,
            created_at: utc_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> EntityEdge {
        EntityEdge::new(
            "group1".to_string(),
            "src".to_string(),
            "tgt".to_string(),
            "WORKS_AT".to_string(),
            utc_now(),
        )
    }

    #[test]
    fn test_add_episode_deduplicates() {
        let mut e = edge();
        e.add_episode("ep-1");
        e.add_episode("ep-2");
        e.add_episode("ep-1");
        assert_eq!(e.episodes, vec!["ep-1", "ep-2"]);
    }

    #[test]
    fn test_edge_round_trip_through_properties() {
        let mut e = edge();
        e.add_episode("ep-1");
        e.add_dispute("ep-9");

        let props = serde_json::to_value(&e).unwrap();
        let back: EntityEdge = serde_json::from_value(props).unwrap();

        assert_eq!(back, e);
        assert_eq!(back.episodes, vec!["ep-1"]);
        assert_eq!(back.disputed_by, vec!["ep-9"]);
        assert_eq!(back.valid_at.timestamp_micros(), e.valid_at.timestamp_micros());
    }
}
