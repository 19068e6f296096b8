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

//! Sleep cycle reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::helpers::db_time;

/// Phase 1 (consolidation) outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase1Report {
    pub entities_refreshed: usize,
    pub episodes_consolidated: usize,
    pub tokens_used: u64,
    pub entities_processed: Vec<String>,
}

/// One merged duplicate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedPair {
    pub canonical: String,
    pub duplicate: String,
    pub similarity: f64,
}

/// Phase 2 (pruning) outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase2Report {
    pub entities_merged: usize,
    pub merged_pairs: Vec<MergedPair>,
    pub edges_pruned: i64,
}

/// Phase 3 (community detection) outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase3Report {
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub communities_built: usize,
    pub communities_removed: usize,
    pub entity_count: usize,
}

impl Phase3Report {
    pub fn skipped(reason: impl Into<String>, entity_count: usize) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.into()),
            entity_count,
            ..Self::default()
        }
    }
}

/// Outcome of one full sleep cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepReport {
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltm_group_id: Option<String>,
    pub dry_run: bool,
    #[serde(with = "db_time")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "db_time")]
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub phase1: Phase1Report,
    pub phase2: Phase2Report,
    pub phase3: Phase3Report,
}
