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

//! Sleep-cycle consolidation prompts

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm_client::{JsonSchema, Message};

/// Payload of a consolidation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedSummary {
    pub summary: String,
    pub confidence: f64,
}

/// Build the prompt refreshing an entity summary from accumulated episodes
pub fn consolidation_messages(
    entity_name: &str,
    entity_type: &str,
    current_summary: &str,
    episode_texts: &[String],
) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that consolidates accumulated observations into \
        a single coherent entity summary for a knowledge graph.";

    let episodes_block = episode_texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        r#"
<ENTITY>
name: {entity_name}
type: {entity_type}
current summary: {current_summary}
</ENTITY>

<EPISODES>
{episodes_block}
</EPISODES>

Rewrite the entity summary so it reflects everything the EPISODES establish.

Rules:
- 2-4 sentences.
- Preserve attribution facts (who founded, named, described, discovered, or dedicated what).
- No speculation.
- Report a confidence in [0, 1] for the rewritten summary.
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Build the tiered-merge prompt: fold a short-term synthesis into a
/// long-term entity, anchored by the long-term entity's neighbourhood.
pub fn tiered_merge_messages(
    entity_name: &str,
    entity_type: &str,
    ltm_summary: &str,
    stm_summary: &str,
    neighbourhood: &[String],
) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that folds recent short-term knowledge into a \
        long-term entity summary. The long-term record is authoritative for established facts; \
        the short-term synthesis carries what is new.";

    let neighbourhood_block = if neighbourhood.is_empty() {
        "(no recorded relations)".to_string()
    } else {
        neighbourhood.join("\n")
    };

    let user_prompt = format!(
        r#"
<ENTITY>
name: {entity_name}
type: {entity_type}
</ENTITY>

<LONG-TERM SUMMARY>
{ltm_summary}
</LONG-TERM SUMMARY>

<LONG-TERM RELATIONS>
{neighbourhood_block}
</LONG-TERM RELATIONS>

<SHORT-TERM SYNTHESIS>
{stm_summary}
</SHORT-TERM SYNTHESIS>

Merge the SHORT-TERM SYNTHESIS into the LONG-TERM SUMMARY.

Rules:
- 2-4 sentences.
- Keep facts consistent with the LONG-TERM RELATIONS.
- Preserve attribution facts.
- No speculation.
- Report a confidence in [0, 1].
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Schema shared by both consolidation calls
pub fn consolidation_schema() -> JsonSchema {
    JsonSchema::new(
        "consolidated_summary",
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            },
            "required": ["summary", "confidence"],
            "additionalProperties": false,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_consolidation_messages_number_episodes() {
        let episodes = vec!["first".to_string(), "second".to_string()];
        let messages = consolidation_messages("Alice", "Person", "A researcher.", &episodes);
        assert!(messages[1].content.contains("[1] first"));
        assert!(messages[1].content.contains("[2] second"));
        assert!(messages[1].content.contains("2-4 sentences"));
    }

    #[test]
    fn test_consolidated_summary_parses() {
        let payload: ConsolidatedSummary =
            serde_json::from_value(json!({"summary": "s", "confidence": 0.8})).unwrap();
        assert_eq!(payload.confidence, 0.8);
    }
}
