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

//! Phase 2: pruning and duplicate-entity resolution.
//!
//! Candidate pairs are names where one contains the other. Pairs scoring at
//! or above the threshold merge greedily in descending similarity: the
//! higher-degree endpoint survives (name length breaks ties), the duplicate's
//! edges are redirected, and the duplicate is detach-deleted. Evidence-less
//! `RELATES_TO` edges are swept afterwards.

use std::collections::HashSet;
use tracing::{debug, info};

use super::report::{MergedPair, Phase2Report};
use super::SleepOptions;
use crate::errors::MnemosResult;
use crate::graph::{CandidatePair, GraphStore};
use crate::helpers::cosine_similarity;
use crate::nodes::EntityNode;

/// Floor below which the name-length fallback score is discarded outright
const FALLBACK_FLOOR: f64 = 0.6;

/// Similarity for one candidate pair: cosine over summary embeddings when
/// both exist, otherwise the name-length ratio (discarded under the floor).
pub fn pair_similarity(a: &EntityNode, b: &EntityNode) -> Option<f64> {
    match (&a.summary_embedding, &b.summary_embedding) {
        (Some(embedding_a), Some(embedding_b)) => {
            Some(cosine_similarity(embedding_a, embedding_b))
        }
        _ => {
            let len_a = a.name.chars().count() as f64;
            let len_b = b.name.chars().count() as f64;
            if len_a == 0.0 || len_b == 0.0 {
                return None;
            }
            let ratio = len_a.min(len_b) / len_a.max(len_b);
            (ratio >= FALLBACK_FLOOR).then_some(ratio)
        }
    }
}

/// Pick the surviving endpoint: higher degree wins; on a degree tie the
/// longer, more specific name wins; a full tie falls back to uuid order.
pub fn choose_canonical(pair: &CandidatePair) -> (&EntityNode, &EntityNode) {
    let a_wins = match pair.degree_a.cmp(&pair.degree_b) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            let len_a = pair.a.name.chars().count();
            let len_b = pair.b.name.chars().count();
            match len_a.cmp(&len_b) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => pair.a.uuid < pair.b.uuid,
            }
        }
    };

    if a_wins {
        (&pair.a, &pair.b)
    } else {
        (&pair.b, &pair.a)
    }
}

/// Run Phase 2 on one group
pub(crate) async fn run(
    store: &GraphStore,
    group_id: &str,
    options: &SleepOptions,
) -> MnemosResult<Phase2Report> {
    let candidates = store.dedup_candidate_pairs(group_id).await?;

    let mut scored: Vec<(CandidatePair, f64)> = candidates
        .into_iter()
        .filter_map(|pair| {
            let similarity = pair_similarity(&pair.a, &pair.b)?;
            (similarity >= options.similarity_threshold).then_some((pair, similarity))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut report = Phase2Report::default();
    let mut removed: HashSet<String> = HashSet::new();

    for (pair, similarity) in &scored {
        if removed.contains(&pair.a.uuid) || removed.contains(&pair.b.uuid) {
            debug!(a = %pair.a.name, b = %pair.b.name, "pair skipped: endpoint already merged");
            continue;
        }

        let (canonical, duplicate) = choose_canonical(pair);

        if !options.dry_run {
            store
                .redirect_outgoing_edges(&duplicate.uuid, &canonical.uuid)
                .await?;
            store
                .redirect_incoming_edges(&duplicate.uuid, &canonical.uuid)
                .await?;
            store
                .redirect_mentions(&duplicate.uuid, &canonical.uuid)
                .await?;
            store.detach_delete(&duplicate.uuid).await?;
        }

        info!(
            canonical = %canonical.name,
            duplicate = %duplicate.name,
            similarity,
            "duplicate entity merged"
        );

        removed.insert(duplicate.uuid.clone());
        report.entities_merged += 1;
        report.merged_pairs.push(MergedPair {
            canonical: canonical.name.clone(),
            duplicate: duplicate.name.clone(),
            similarity: *similarity,
        });
    }

    report.edges_pruned = if options.dry_run {
        store.count_orphan_edges(group_id).await?
    } else {
        store.delete_orphan_edges(group_id).await?
    };

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::param_to_json;
    use crate::nodes::EntityType;
    use crate::testing::FakeDriver;
    use serde_json::json;
    use std::sync::Arc;

    fn entity(name: &str, embedding: Option<Vec<f32>>) -> EntityNode {
        let mut e = EntityNode::new(
            name.to_string(),
            "g".to_string(),
            EntityType::Person,
            format!("summary of {}", name),
        );
        e.summary_embedding = embedding;
        e
    }

    fn pair(a: &EntityNode, b: &EntityNode, degree_a: i64, degree_b: i64) -> CandidatePair {
        CandidatePair {
            a: a.clone(),
            b: b.clone(),
            degree_a,
            degree_b,
        }
    }

    fn pair_row(p: &CandidatePair) -> crate::database::QueryRow {
        FakeDriver::row(&[
            ("a", serde_json::to_value(&p.a).unwrap()),
            ("b", serde_json::to_value(&p.b).unwrap()),
            ("degree_a", json!(p.degree_a)),
            ("degree_b", json!(p.degree_b)),
        ])
    }

    #[test]
    fn test_pair_similarity_uses_embeddings() {
        let a = entity("Fischer", Some(vec![1.0, 0.0]));
        let b = entity("Alan Fischer", Some(vec![1.0, 0.0]));
        assert!((pair_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pair_similarity_falls_back_to_name_ratio() {
        let a = entity("Alan Fischer", None);
        let b = entity("Dr. Alan Fischer", Some(vec![1.0]));
        // 12 / 16 = 0.75
        assert!((pair_similarity(&a, &b).unwrap() - 0.75).abs() < 1e-9);

        let short = entity("Al", None);
        let long = entity("Alan Fischer III", None);
        assert_eq!(pair_similarity(&short, &long), None);
    }

    #[test]
    fn test_choose_canonical_prefers_degree() {
        let a = entity("Fischer", None);
        let b = entity("Alan Fischer", None);
        let p = pair(&a, &b, 7, 2);
        let (canonical, duplicate) = choose_canonical(&p);
        assert_eq!(canonical.name, "Fischer");
        assert_eq!(duplicate.name, "Alan Fischer");
    }

    #[test]
    fn test_choose_canonical_breaks_ties_with_name_length() {
        let a = entity("Fischer", None);
        let b = entity("Dr. Alan Fischer", None);
        let p = pair(&a, &b, 3, 3);
        let (canonical, _) = choose_canonical(&p);
        assert_eq!(canonical.name, "Dr. Alan Fischer");
    }

    #[tokio::test]
    async fn test_greedy_merge_collapses_duplicate_chain() {
        // Fischer / Alan Fischer / Dr. Alan Fischer, pairwise similar:
        // two merges, the longest name survives
        let embedding = Some(vec![0.6, 0.8]);
        let fischer = entity("Fischer", embedding.clone());
        let alan = entity("Alan Fischer", embedding.clone());
        let dr_alan = entity("Dr. Alan Fischer", embedding);

        let driver = Arc::new(FakeDriver::new());
        driver.push_response(
            "CONTAINS toLower",
            vec![
                pair_row(&pair(&fischer, &alan, 0, 0)),
                pair_row(&pair(&fischer, &dr_alan, 0, 0)),
                pair_row(&pair(&alan, &dr_alan, 0, 0)),
            ],
        );

        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);
        let options = SleepOptions {
            similarity_threshold: 0.85,
            ..SleepOptions::default()
        };

        let report = run(&store, "g", &options).await.unwrap();

        assert_eq!(report.entities_merged, 2);
        assert_eq!(report.merged_pairs.len(), 2);
        assert!(report
            .merged_pairs
            .iter()
            .all(|p| p.canonical.contains("Alan Fischer")));
        assert!(report
            .merged_pairs
            .iter()
            .all(|p| p.duplicate != "Dr. Alan Fischer"));

        // Each merge redirects three edge families then deletes the duplicate
        assert_eq!(driver.calls_matching("DETACH DELETE").len(), 2);
        assert_eq!(
            driver
                .calls_matching("MERGE (c)-[nr:RELATES_TO {uuid: r.uuid}]->(o)")
                .len(),
            2
        );
        assert_eq!(
            driver
                .calls_matching("MERGE (ep)-[nr:MENTIONS {uuid: r.uuid}]->(c)")
                .len(),
            2
        );

        let deleted: Vec<String> = driver
            .calls_matching("DETACH DELETE")
            .iter()
            .map(|(_, params)| {
                param_to_json(params.get("uuid").unwrap())
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert!(deleted.contains(&fischer.uuid));
        assert!(deleted.contains(&alan.uuid));
        assert!(!deleted.contains(&dr_alan.uuid));
    }

    #[tokio::test]
    async fn test_below_threshold_pairs_are_kept_apart() {
        let a = entity("Mercury", Some(vec![1.0, 0.0]));
        let b = entity("Mercury Records", Some(vec![0.0, 1.0]));

        let driver = Arc::new(FakeDriver::new());
        driver.push_response("CONTAINS toLower", vec![pair_row(&pair(&a, &b, 1, 1))]);

        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);
        let report = run(&store, "g", &SleepOptions::default()).await.unwrap();

        assert_eq!(report.entities_merged, 0);
        assert!(driver.calls_matching("DETACH DELETE").is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let embedding = Some(vec![1.0]);
        let a = entity("Fischer", embedding.clone());
        let b = entity("Alan Fischer", embedding);

        let driver = Arc::new(FakeDriver::new());
        driver.push_response("CONTAINS toLower", vec![pair_row(&pair(&a, &b, 0, 0))]);
        driver.push_response(
            "RETURN {count: count(r)} AS row",
            vec![FakeDriver::row(&[("count", json!(4))])],
        );

        let store = GraphStore::new(driver.clone() as Arc<dyn crate::database::GraphDriver>);
        let options = SleepOptions {
            dry_run: true,
            ..SleepOptions::default()
        };

        let report = run(&store, "g", &options).await.unwrap();

        assert_eq!(report.entities_merged, 1);
        assert_eq!(report.edges_pruned, 4);
        assert!(driver.calls_matching("DETACH DELETE").is_empty());
        assert!(driver.calls_matching("DELETE r").is_empty());
    }
}
