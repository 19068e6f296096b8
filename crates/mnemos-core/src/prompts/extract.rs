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

//! Entity and relation extraction prompt

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm_client::{JsonSchema, Message};
use crate::nodes::{EntityType, EpisodeType};

/// Whether an extracted relation holds now or only held in the past
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalValidity {
    Current,
    Historical,
}

impl Default for TemporalValidity {
    fn default() -> Self {
        TemporalValidity::Current
    }
}

/// An entity mention extracted from an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
    pub confidence: f64,
}

impl ExtractedEntity {
    pub fn entity_type(&self) -> EntityType {
        EntityType::parse_lossy(&self.entity_type)
    }
}

/// A typed relation extracted from an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source_name: String,
    pub target_name: String,
    /// UPPER_SNAKE_CASE relation label
    pub relation_name: String,
    pub confidence: f64,
    #[serde(default)]
    pub is_negated: bool,
    #[serde(default)]
    pub temporal_validity: TemporalValidity,
}

/// The full extraction payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// An already-known entity passed as context so the LLM reuses exact names
#[derive(Debug, Clone, Serialize)]
pub struct KnownEntity {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
}

/// Build the extraction prompt for one episode
pub fn extraction_messages(
    content: &str,
    episode_type: EpisodeType,
    known_entities: &[KnownEntity],
) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that extracts entity nodes and typed relations \
        from text for a knowledge graph. Be precise: reuse canonical names from the known-entity \
        context, classify entities with the allowed types only, and never invent facts that are \
        not stated or strongly implied.";

    let type_hint = match episode_type {
        EpisodeType::Message => {
            "The episode is a conversational message formatted as \"actor: content\"; \
             treat the actor as an entity."
        }
        EpisodeType::Json => "The episode is a JSON document; extract entities from its values.",
        EpisodeType::Text => "The episode is plain text.",
    };

    let known = serde_json::to_string_pretty(known_entities).unwrap_or_else(|_| "[]".to_string());
    let allowed_types = EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let user_prompt = format!(
        r#"
<KNOWN ENTITIES>
{known}
</KNOWN ENTITIES>

<EPISODE>
{content}
</EPISODE>

{type_hint}

Instructions:

1. **Entity Extraction**: Extract every significant entity, concept, or actor mentioned in the EPISODE.
   - If an entity matches one in KNOWN ENTITIES, reuse its exact name verbatim.
   - Allowed entity types: {allowed_types}.
   - Write a one- or two-sentence summary of what the EPISODE says about the entity.
   - Give each entity a confidence in [0, 1].

2. **Relation Extraction**: Extract typed relations between the extracted entities.
   - Use UPPER_SNAKE_CASE relation names (e.g. WORKS_AT, KNOWS, LOCATED_IN).
   - Always extract attribution and dedication relations when present: NAMED_AFTER,
     FOUNDED_BY, DESCRIBED_BY, DISCOVERED_BY, DEDICATED_TO. These may never be dropped.
   - Set is_negated to true when the EPISODE denies the relation ("does not", "never", "no longer false").
   - Set temporal_validity to "historical" when the relation held in the past but no longer holds
     ("used to", "formerly", "was"), otherwise "current".
   - Give each relation a confidence in [0, 1].

3. **Exclusions**:
   - Do NOT extract dates or times as entities.
   - Do NOT extract relations whose endpoints you did not extract as entities.
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Schema for the extraction payload
pub fn extraction_schema() -> JsonSchema {
    let entity_types: Vec<&str> = EntityType::ALL.iter().map(|t| t.as_str()).collect();

    JsonSchema::new(
        "episode_extraction",
        json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "entity_type": {"type": "string", "enum": entity_types},
                            "summary": {"type": "string"},
                            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        },
                        "required": ["name", "entity_type", "summary", "confidence"],
                        "additionalProperties": false,
                    },
                },
                "relations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "source_name": {"type": "string"},
                            "target_name": {"type": "string"},
                            "relation_name": {"type": "string"},
                            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                            "is_negated": {"type": "boolean"},
                            "temporal_validity": {"type": "string", "enum": ["current", "historical"]},
                        },
                        "required": [
                            "source_name",
                            "target_name",
                            "relation_name",
                            "confidence",
                            "is_negated",
                            "temporal_validity"
                        ],
                        "additionalProperties": false,
                    },
                },
            },
            "required": ["entities", "relations"],
            "additionalProperties": false,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extraction_payload_parses() {
        let payload: ExtractionPayload = serde_json::from_value(json!({
            "entities": [
                {"name": "Alice", "entity_type": "Person", "summary": "Met Bob.", "confidence": 0.9}
            ],
            "relations": [
                {
                    "source_name": "Alice",
                    "target_name": "Bob",
                    "relation_name": "KNOWS",
                    "confidence": 0.8,
                    "is_negated": false,
                    "temporal_validity": "current"
                }
            ]
        }))
        .unwrap();

        assert_eq!(payload.entities.len(), 1);
        assert_eq!(payload.entities[0].entity_type(), EntityType::Person);
        assert_eq!(payload.relations[0].temporal_validity, TemporalValidity::Current);
    }

    #[test]
    fn test_extraction_payload_defaults() {
        let payload: ExtractionPayload = serde_json::from_value(json!({
            "entities": [],
            "relations": [
                {
                    "source_name": "Alice",
                    "target_name": "OldCo",
                    "relation_name": "WORKED_AT",
                    "confidence": 0.7
                }
            ]
        }))
        .unwrap();

        assert!(!payload.relations[0].is_negated);
        assert_eq!(payload.relations[0].temporal_validity, TemporalValidity::Current);
    }

    #[test]
    fn test_extraction_messages_include_known_entities() {
        let known = vec![KnownEntity {
            name: "Dr. Alan Fischer".to_string(),
            entity_type: "Person".to_string(),
            summary: "A physicist.".to_string(),
        }];

        let messages = extraction_messages("Fischer spoke.", EpisodeType::Text, &known);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("Dr. Alan Fischer"));
        assert!(messages[1].content.contains("NAMED_AFTER"));
    }
}
