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

//! Community digest prompt

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm_client::{JsonSchema, Message};

/// How many member summaries the digest prompt includes at most
pub const MAX_MEMBER_SUMMARIES: usize = 20;

/// Payload of a community digest call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityDigest {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub domain_hints: Vec<String>,
    pub importance_score: f64,
}

/// Build the prompt summarising a detected community from its members
pub fn community_digest_messages(member_summaries: &[String]) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that names and summarises clusters of related \
        entities in a knowledge graph so they can route retrieval.";

    let members_block = member_summaries
        .iter()
        .take(MAX_MEMBER_SUMMARIES)
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        r#"
<MEMBERS>
{members_block}
</MEMBERS>

Describe the cluster formed by these entities.

Rules:
- Give the cluster a short descriptive name.
- Summarise what binds the members together in 2-4 sentences.
- List domain hints as lowercase kebab-case tags (e.g. "machine-learning").
- Score how central this cluster is likely to be for retrieval, in [0, 1].
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Schema for the community digest payload
pub fn community_digest_schema() -> JsonSchema {
    JsonSchema::new(
        "community_digest",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "summary": {"type": "string"},
                "domain_hints": {
                    "type": "array",
                    "items": {"type": "string"},
                },
                "importance_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            },
            "required": ["name", "summary", "domain_hints", "importance_score"],
            "additionalProperties": false,
        }),
    )
}
