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

//! Entity summary merge prompt

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm_client::{JsonSchema, Message};

/// Payload of a summary merge call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedSummary {
    pub merged_summary: String,
}

/// Build the prompt merging an entity's stored summary with new context
pub fn merge_summary_messages(
    entity_name: &str,
    entity_type: &str,
    existing_summary: &str,
    new_context: &str,
) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that maintains entity summaries in a knowledge \
        graph. Merge new information into the existing summary without losing established facts.";

    let user_prompt = format!(
        r#"
<ENTITY>
name: {entity_name}
type: {entity_type}
</ENTITY>

<EXISTING SUMMARY>
{existing_summary}
</EXISTING SUMMARY>

<NEW CONTEXT>
{new_context}
</NEW CONTEXT>

Merge the NEW CONTEXT into the EXISTING SUMMARY.

Rules:
- Keep every fact from the existing summary unless the new context explicitly supersedes it.
- Keep the result to at most four sentences.
- Do not speculate beyond what either text states.
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Schema for the merged summary payload
pub fn merge_summary_schema() -> JsonSchema {
    JsonSchema::new(
        "merged_summary",
        json!({
            "type": "object",
            "properties": {
                "merged_summary": {"type": "string"},
            },
            "required": ["merged_summary"],
            "additionalProperties": false,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_messages_carry_both_summaries() {
        let messages = merge_summary_messages("Alice", "Person", "A researcher.", "Now at ACME.");
        assert!(messages[1].content.contains("A researcher."));
        assert!(messages[1].content.contains("Now at ACME."));
    }
}
