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

//! Node types of the bi-temporal property graph.
//!
//! Three variants share the uuid/group_id/name/created_at header; the tagged
//! [`Node`] enum is how driver rows become typed values, dispatching on the
//! node's labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::MnemosError;
use crate::helpers::{
    db_time, db_time_opt, episode_display_name, retroactive_days, utc_now,
};

/// Enumeration of different types of episodes that can be processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    /// Represents a standard message-type episode, formatted as
    /// "actor: content". For example, "user: Hello, how are you?"
    Message,
    /// Represents an episode containing a JSON string object with structured data.
    Json,
    /// Represents a plain text episode.
    Text,
}

impl EpisodeType {
    pub fn from_str(s: &str) -> Result<Self, MnemosError> {
        match s.to_lowercase().as_str() {
            "message" => Ok(EpisodeType::Message),
            "json" => Ok(EpisodeType::Json),
            "text" => Ok(EpisodeType::Text),
            _ => Err(MnemosError::InvalidInput(format!(
                "Episode type: {} not implemented",
                s
            ))),
        }
    }
}

impl Default for EpisodeType {
    fn default() -> Self {
        EpisodeType::Text
    }
}

/// The closed set of entity classifications the extraction prompt allows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Product,
    Event,
    Concept,
    Technology,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Product,
        EntityType::Event,
        EntityType::Concept,
        EntityType::Technology,
        EntityType::Other,
    ];

    pub fn from_str(s: &str) -> Result<Self, MnemosError> {
        match s {
            "Person" => Ok(EntityType::Person),
            "Organization" => Ok(EntityType::Organization),
            "Location" => Ok(EntityType::Location),
            "Product" => Ok(EntityType::Product),
            "Event" => Ok(EntityType::Event),
            "Concept" => Ok(EntityType::Concept),
            "Technology" => Ok(EntityType::Technology),
            "Other" => Ok(EntityType::Other),
            _ => Err(MnemosError::InvalidInput(format!(
                "Entity type: {} not implemented",
                s
            ))),
        }
    }

    /// Read-side mapping: anything the store holds that is not in the enum
    /// collapses to `Other` instead of failing materialisation.
    pub fn parse_lossy(s: &str) -> Self {
        Self::from_str(s).unwrap_or(EntityType::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Organization => "Organization",
            EntityType::Location => "Location",
            EntityType::Product => "Product",
            EntityType::Event => "Event",
            EntityType::Concept => "Concept",
            EntityType::Technology => "Technology",
            EntityType::Other => "Other",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for EntityType {
    fn default() -> Self {
        EntityType::Other
    }
}

/// Episodic node represents a single ingested observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicNode {
    pub uuid: String,
    pub group_id: String,
    /// First 50 chars of content; display only
    pub name: String,
    pub episode_type: EpisodeType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// When the observed event occurred
    #[serde(with = "db_time")]
    pub valid_at: DateTime<Utc>,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    /// Ingestion time
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Days between event and recording, clamped at zero
    pub retroactive_days: i64,
    /// Episodes that contradict this one
    #[serde(default)]
    pub disputed_by: Vec<String>,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub consolidated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl EpisodicNode {
    pub fn new(
        group_id: String,
        episode_type: EpisodeType,
        content: String,
        valid_at: Option<DateTime<Utc>>,
    ) -> Self {
        let created_at = utc_now();
        let valid_at = valid_at.unwrap_or(created_at);
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            name: episode_display_name(&content),
            episode_type,
            content,
            embedding: None,
            valid_at,
            invalid_at: None,
            created_at,
            reference_id: None,
            retroactive_days: retroactive_days(created_at, valid_at),
            disputed_by: Vec::new(),
            consolidated_at: None,
            metadata: None,
        }
    }

    pub fn with_reference_id(mut self, reference_id: Option<String>) -> Self {
        self.reference_id = reference_id;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record that `episode_uuid` contradicts this episode (deduplicated)
    pub fn add_dispute(&mut self, episode_uuid: &str) {
        if !self.disputed_by.iter().any(|u| u == episode_uuid) {
            self.disputed_by.push(episode_uuid.to_string());
        }
    }
}

/// Entity node represents a resolved real-world entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub uuid: String,
    pub group_id: String,
    /// Canonical name; `(name, group_id)` is unique
    pub name: String,
    pub entity_type: EntityType,
    pub summary: String,
    /// Kept in sync with `summary`: both are rewritten together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub fact_ids: Vec<String>,
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub consolidated_at: Option<DateTime<Utc>>,
}

impl EntityNode {
    pub fn new(name: String, group_id: String, entity_type: EntityType, summary: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            name,
            entity_type,
            summary,
            summary_embedding: None,
            fact_ids: Vec::new(),
            created_at: utc_now(),
            consolidated_at: None,
        }
    }

    pub fn with_summary_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.summary_embedding = Some(embedding);
        self
    }
}

/// Community node represents a detected cluster of entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityNode {
    pub uuid: String,
    pub group_id: String,
    pub name: String,
    /// 0 = base level
    pub community_level: i64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub member_entity_ids: Vec<String>,
    pub member_count: i64,
    /// Lowercase kebab-case tags
    #[serde(default)]
    pub domain_hints: Vec<String>,
    pub importance_score: f64,
    pub entity_count_at_last_rebuild: i64,
    #[serde(default, with = "db_time_opt", skip_serializing_if = "Option::is_none")]
    pub last_full_rebuild: Option<DateTime<Utc>>,
    #[serde(with = "db_time")]
    pub created_at: DateTime<Utc>,
}

impl CommunityNode {
    pub fn new(name: String, group_id: String, summary: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id,
            name,
            community_level: 0,
            summary,
            summary_embedding: None,
            member_entity_ids: Vec::new(),
            member_count: 0,
            domain_hints: Vec::new(),
            importance_score: 0.0,
            entity_count_at_last_rebuild: 0,
            last_full_rebuild: None,
            created_at: utc_now(),
        }
    }
}

/// Tagged union of the three node variants.
///
/// Driver rows carry `properties(n)` plus `labels(n)`; [`Node::from_parts`]
/// dispatches on the label to materialise the right variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum Node {
    Episodic(EpisodicNode),
    Entity(EntityNode),
    Community(CommunityNode),
}

impl Node {
    pub const EPISODIC_LABEL: &'static str = "Episodic";
    pub const ENTITY_LABEL: &'static str = "Entity";
    pub const COMMUNITY_LABEL: &'static str = "Community";

    /// Materialise a node from its labels and property map
    pub fn from_parts(
        labels: &[String],
        properties: serde_json::Value,
    ) -> Result<Node, MnemosError> {
        if labels.iter().any(|l| l == Self::EPISODIC_LABEL) {
            Ok(Node::Episodic(serde_json::from_value(properties)?))
        } else if labels.iter().any(|l| l == Self::ENTITY_LABEL) {
            Ok(Node::Entity(serde_json::from_value(properties)?))
        } else if labels.iter().any(|l| l == Self::COMMUNITY_LABEL) {
            Ok(Node::Community(serde_json::from_value(properties)?))
        } else {
            Err(MnemosError::InvalidInput(format!(
                "unrecognised node labels: {:?}",
                labels
            )))
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            Node::Episodic(n) => &n.uuid,
            Node::Entity(n) => &n.uuid,
            Node::Community(n) => &n.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Episodic(n) => &n.name,
            Node::Entity(n) => &n.name,
            Node::Community(n) => &n.name,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Node::Episodic(n) => &n.group_id,
            Node::Entity(n) => &n.group_id,
            Node::Community(n) => &n.group_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Node::Episodic(_) => Self::EPISODIC_LABEL,
            Node::Entity(_) => Self::ENTITY_LABEL,
            Node::Community(_) => Self::COMMUNITY_LABEL,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityNode> {
        match self {
            Node::Entity(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_episodic(&self) -> Option<&EpisodicNode> {
        match self {
            Node::Episodic(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_community(&self) -> Option<&CommunityNode> {
        match self {
            Node::Community(n) => Some(n),
            _ => None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.uuid() == other.uuid()
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_episode_type_from_str() {
        assert_eq!(EpisodeType::from_str("message").unwrap(), EpisodeType::Message);
        assert_eq!(EpisodeType::from_str("json").unwrap(), EpisodeType::Json);
        assert_eq!(EpisodeType::from_str("TEXT").unwrap(), EpisodeType::Text);
        assert!(EpisodeType::from_str("invalid").is_err());
    }

    #[test]
    fn test_entity_type_parse_lossy() {
        assert_eq!(EntityType::parse_lossy("Person"), EntityType::Person);
        assert_eq!(EntityType::parse_lossy("Unknown"), EntityType::Other);
        assert_eq!(EntityType::parse_lossy(""), EntityType::Other);
    }

    #[test]
    fn test_episodic_node_defaults() {
        let node = EpisodicNode::new(
            "group1".to_string(),
            EpisodeType::Text,
            "Alice met Bob at the conference.".to_string(),
            None,
        );

        assert_eq!(node.name, "Alice met Bob at the conference.");
        assert_eq!(node.valid_at, node.created_at);
        assert_eq!(node.retroactive_days, 0);
        assert!(node.disputed_by.is_empty());
        assert!(node.consolidated_at.is_none());
    }

    #[test]
    fn test_episodic_node_retroactive() {
        let valid_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let node = EpisodicNode::new(
            "group1".to_string(),
            EpisodeType::Text,
            "backfilled".to_string(),
            Some(valid_at),
        );

        assert!(node.retroactive_days > 365);
    }

    #[test]
    fn test_add_dispute_deduplicates() {
        let mut node = EpisodicNode::new(
            "g".to_string(),
            EpisodeType::Text,
            "content".to_string(),
            None,
        );
        node.add_dispute("ep-1");
        node.add_dispute("ep-1");
        node.add_dispute("ep-2");
        assert_eq!(node.disputed_by, vec!["ep-1", "ep-2"]);
    }

    #[test]
    fn test_node_round_trip_through_properties() {
        let entity = EntityNode::new(
            "Alice".to_string(),
            "group1".to_string(),
            EntityType::Person,
            "A researcher.".to_string(),
        )
        .with_summary_embedding(vec![0.1, 0.2]);

        let props = serde_json::to_value(&entity).unwrap();
        let node = Node::from_parts(&["Entity".to_string()], props).unwrap();

        let back = node.as_entity().unwrap();
        assert_eq!(back.uuid, entity.uuid);
        assert_eq!(back.name, "Alice");
        assert_eq!(back.entity_type, EntityType::Person);
        assert_eq!(back.summary_embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
    }

    #[test]
    fn test_node_from_parts_unknown_label() {
        let result = Node::from_parts(&["Widget".to_string()], serde_json::json!({}));
        assert!(result.is_err());
    }
}
