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

//! Phase 1: consolidation.
//!
//! Entity summaries that accumulated enough unconsolidated episodes are
//! rewritten by the LLM and re-embedded. In tiered mode the synthesis runs
//! against the short-term graph and is folded into the long-term graph:
//! counterpart lookup is by exact name only (summary embeddings within one
//! knowledge domain routinely exceed 0.92 cosine similarity, which would
//! make vector lookup destructive here; Phase 2 handles true duplicates),
//! and active relations migrate once both peers exist in long-term memory.

use chrono::Duration;
use tracing::{debug, warn};

use super::report::Phase1Report;
use super::SleepOptions;
use crate::edges::EntityEdge;
use crate::errors::MnemosResult;
use crate::graph::GraphStore;
use crate::helpers::utc_now;
use crate::llm_client::LlmClient;
use crate::nodes::{EntityNode, EpisodicNode};
use crate::prompts::consolidate::{
    consolidation_messages, consolidation_schema, tiered_merge_messages, ConsolidatedSummary,
};
use crate::types::Clients;

/// Neighbourhood caps for the tiered merge prompt
const LTM_NEIGHBOURHOOD_OUTGOING: i64 = 6;
const LTM_NEIGHBOURHOOD_INCOMING: i64 = 4;

/// Suffix deriving the long-term uuid of a migrated relation
const LTM_EDGE_SUFFIX: &str = ":ltm";

/// Synthesize a fresh summary for one cluster. LLM and embedder failures
/// are reported as `None` so the caller can skip the cluster.
async fn synthesize_summary(
    clients: &Clients,
    entity: &EntityNode,
    episodes: &[EpisodicNode],
    tokens_used: &mut u64,
) -> Option<ConsolidatedSummary> {
    let texts: Vec<String> = episodes.iter().map(|e| e.content.clone()).collect();
    let messages =
        consolidation_messages(&entity.name, entity.entity_type.as_str(), &entity.summary, &texts);

    let response = match clients
        .llm_client
        .generate_structured(&messages, &consolidation_schema())
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(entity = %entity.name, error = %e, "consolidation call failed; cluster skipped");
            return None;
        }
    };
    *tokens_used += response.usage.total_tokens as u64;

    match response.parse::<ConsolidatedSummary>() {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(entity = %entity.name, error = %e, "consolidation payload rejected; cluster skipped");
            None
        }
    }
}

/// Single-graph consolidation
pub(crate) async fn run_single(
    clients: &Clients,
    store: &GraphStore,
    group_id: &str,
    options: &SleepOptions,
) -> MnemosResult<Phase1Report> {
    let cutoff = utc_now() - Duration::minutes(options.cooldown_minutes);
    let clusters = store
        .consolidation_clusters(group_id, cutoff, options.min_episodes, options.max_entities)
        .await?;

    let mut report = Phase1Report::default();

    for (mut entity, episodes) in clusters {
        if options.dry_run {
            report.entities_refreshed += 1;
            report.episodes_consolidated += episodes.len();
            report.entities_processed.push(entity.name.clone());
            continue;
        }

        let Some(payload) =
            synthesize_summary(clients, &entity, &episodes, &mut report.tokens_used).await
        else {
            continue;
        };

        let embedding = match clients.embedder.embed(&payload.summary).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(entity = %entity.name, error = %e, "embedding failed; cluster skipped");
                continue;
            }
        };

        let now = utc_now();
        entity.summary = payload.summary;
        entity.summary_embedding = Some(embedding);
        entity.consolidated_at = Some(now);
        store.upsert_entity(&entity).await?;

        let episode_uuids: Vec<String> = episodes.iter().map(|e| e.uuid.clone()).collect();
        store.mark_episodes_consolidated(&episode_uuids, now).await?;

        report.entities_refreshed += 1;
        report.episodes_consolidated += episodes.len();
        report.entities_processed.push(entity.name.clone());
    }

    Ok(report)
}

/// Tiered STM→LTM consolidation with relation migration
pub(crate) async fn run_tiered(
    clients: &Clients,
    store: &GraphStore,
    stm_group_id: &str,
    ltm_group_id: &str,
    options: &SleepOptions,
) -> MnemosResult<Phase1Report> {
    let cutoff = utc_now() - Duration::minutes(options.cooldown_minutes);
    let clusters = store
        .consolidation_clusters(stm_group_id, cutoff, options.min_episodes, options.max_entities)
        .await?;

    let mut report = Phase1Report::default();

    for (stm_entity, episodes) in clusters {
        if options.dry_run {
            report.entities_refreshed += 1;
            report.episodes_consolidated += episodes.len();
            report.entities_processed.push(stm_entity.name.clone());
            continue;
        }

        let Some(stm_payload) =
            synthesize_summary(clients, &stm_entity, &episodes, &mut report.tokens_used).await
        else {
            continue;
        };

        // T1: counterpart lookup by exact name only
        let counterpart = store
            .fetch_entity_by_name(&stm_entity.name, ltm_group_id)
            .await?;

        let now = utc_now();
        let ltm_entity = match counterpart {
            Some(mut ltm_entity) => {
                // T2: merge anchored by the long-term neighbourhood
                let neighbourhood = store
                    .neighbourhood_lines(
                        &ltm_entity.uuid,
                        LTM_NEIGHBOURHOOD_OUTGOING,
                        LTM_NEIGHBOURHOOD_INCOMING,
                    )
                    .await?;

                let messages = tiered_merge_messages(
                    &ltm_entity.name,
                    ltm_entity.entity_type.as_str(),
                    &ltm_entity.summary,
                    &stm_payload.summary,
                    &neighbourhood,
                );
                let response = match clients
                    .llm_client
                    .generate_structured(&messages, &consolidation_schema())
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(entity = %ltm_entity.name, error = %e, "tiered merge failed; cluster skipped");
                        continue;
                    }
                };
                report.tokens_used += response.usage.total_tokens as u64;

                let merged: ConsolidatedSummary = match response.parse() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(entity = %ltm_entity.name, error = %e, "tiered payload rejected; cluster skipped");
                        continue;
                    }
                };

                let embedding = match clients.embedder.embed(&merged.summary).await {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        warn!(entity = %ltm_entity.name, error = %e, "embedding failed; cluster skipped");
                        continue;
                    }
                };

                ltm_entity.summary = merged.summary;
                ltm_entity.summary_embedding = Some(embedding);
                ltm_entity.consolidated_at = Some(now);
                store.upsert_entity(&ltm_entity).await?;
                ltm_entity
            }
            None => {
                let embedding = match clients.embedder.embed(&stm_payload.summary).await {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        warn!(entity = %stm_entity.name, error = %e, "embedding failed; cluster skipped");
                        continue;
                    }
                };

                let mut created = EntityNode::new(
                    stm_entity.name.clone(),
                    ltm_group_id.to_string(),
                    stm_entity.entity_type,
                    stm_payload.summary.clone(),
                )
                .with_summary_embedding(embedding);
                created.consolidated_at = Some(now);
                store.upsert_entity(&created).await?;
                created
            }
        };

        // T3: migrate active relations whose peer already exists in LTM
        migrate_relations(store, &stm_entity, &ltm_entity, ltm_group_id).await?;

        let episode_uuids: Vec<String> = episodes.iter().map(|e| e.uuid.clone()).collect();
        store.mark_episodes_consolidated(&episode_uuids, now).await?;

        report.entities_refreshed += 1;
        report.episodes_consolidated += episodes.len();
        report.entities_processed.push(stm_entity.name.clone());
    }

    Ok(report)
}

/// Migrate the STM entity's active relations into LTM. A peer with no
/// long-term counterpart defers the edge silently; a later cycle picks it
/// up once the peer is consolidated.
async fn migrate_relations(
    store: &GraphStore,
    stm_entity: &EntityNode,
    ltm_entity: &EntityNode,
    ltm_group_id: &str,
) -> MnemosResult<()> {
    let relations = store.entity_relations_with_peers(&stm_entity.uuid).await?;

    for (stm_edge, peer_name, outgoing) in relations {
        let Some(ltm_peer) = store.fetch_entity_by_name(&peer_name, ltm_group_id).await? else {
            debug!(
                relation = %stm_edge.name,
                peer = %peer_name,
                "migration deferred: peer not yet in long-term memory"
            );
            continue;
        };

        let (source, target) = if outgoing {
            (ltm_entity.uuid.clone(), ltm_peer.uuid.clone())
        } else {
            (ltm_peer.uuid.clone(), ltm_entity.uuid.clone())
        };

        let mut migrated = EntityEdge::new(
            ltm_group_id.to_string(),
            source,
            target,
            stm_edge.name.clone(),
            stm_edge.valid_at,
        )
        .with_uuid(format!("{}{}", stm_edge.uuid, LTM_EDGE_SUFFIX))
        .with_episodes(stm_edge.episodes.clone());
        migrated.created_at = stm_edge.created_at;

        store.upsert_migrated_edge(&migrated).await?;
    }

    Ok(())
}
