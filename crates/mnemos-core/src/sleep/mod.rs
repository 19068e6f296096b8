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

//! Sleep engine: the background maintenance cycle.
//!
//! One `sleep()` call runs Phase 1 (consolidation, single-graph or tiered
//! STM→LTM), Phase 2 (duplicate-entity pruning and orphan edge cleanup),
//! and Phase 3 (Louvain community detection), strictly in that order. A
//! shared lock keeps at most one cycle in flight per engine instance.

pub mod communities;
pub mod consolidation;
pub mod pruning;
pub mod report;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::errors::MnemosResult;
use crate::graph::GraphStore;
use crate::helpers::utc_now;
use crate::types::Clients;

pub use report::{MergedPair, Phase1Report, Phase2Report, Phase3Report, SleepReport};
pub use scheduler::{AutoSleepConfig, SleepScheduler};

/// What a sleep cycle operates on: one graph, or a short-term/long-term pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SleepTarget {
    Single(String),
    Tiered {
        stm_group_id: String,
        ltm_group_id: String,
    },
}

impl SleepTarget {
    /// The group the report is attributed to (STM in tiered mode)
    pub fn report_group(&self) -> &str {
        match self {
            SleepTarget::Single(group_id) => group_id,
            SleepTarget::Tiered { stm_group_id, .. } => stm_group_id,
        }
    }

    /// The group Phases 2 and 3 maintain (LTM in tiered mode; STM is transient)
    pub fn maintenance_group(&self) -> &str {
        match self {
            SleepTarget::Single(group_id) => group_id,
            SleepTarget::Tiered { ltm_group_id, .. } => ltm_group_id,
        }
    }
}

/// Sleep cycle options; defaults match the engine's standing thresholds
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct SleepOptions {
    /// Run Phase 1
    pub consolidation: bool,
    /// Run Phase 2
    pub pruning: bool,
    /// Run Phase 3
    pub communities: bool,
    /// Episodes younger than this are left alone
    #[validate(range(min = 0))]
    pub cooldown_minutes: i64,
    /// Minimum unconsolidated episodes for a Phase 1 cluster
    #[validate(range(min = 1))]
    pub min_episodes: i64,
    /// Phase 1 cluster cap per cycle
    #[validate(range(min = 1))]
    pub max_entities: i64,
    /// Phase 2 merge threshold
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f64,
    /// Phase 3 gate: minimum entity count
    #[validate(range(min = 1))]
    pub min_graph_size: usize,
    /// Phase 3 gate: minimum entity growth since the last rebuild
    #[validate(range(min = 1))]
    pub rebuild_threshold: i64,
    /// Communities smaller than this are not materialised
    #[validate(range(min = 1))]
    pub min_community_size: usize,
    /// Compute and report, write nothing
    pub dry_run: bool,
}

impl Default for SleepOptions {
    fn default() -> Self {
        Self {
            consolidation: true,
            pruning: true,
            communities: true,
            cooldown_minutes: 60,
            min_episodes: 2,
            max_entities: 50,
            similarity_threshold: 0.88,
            min_graph_size: 15,
            rebuild_threshold: 10,
            min_community_size: 3,
            dry_run: false,
        }
    }
}

/// The sleep engine
#[derive(Clone)]
pub struct SleepEngine {
    clients: Clients,
    store: GraphStore,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SleepEngine {
    pub fn new(clients: Clients) -> Self {
        let store = GraphStore::new(clients.driver.clone());
        Self {
            clients,
            store,
            cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Run one full sleep cycle. Cycles on the same engine never overlap.
    pub async fn sleep(
        &self,
        target: SleepTarget,
        options: SleepOptions,
    ) -> MnemosResult<SleepReport> {
        options.validate()?;
        let _cycle = self.cycle_lock.lock().await;

        let started_at = utc_now();
        let group_id = target.report_group().to_string();
        let ltm_group_id = match &target {
            SleepTarget::Tiered { ltm_group_id, .. } => Some(ltm_group_id.clone()),
            SleepTarget::Single(_) => None,
        };

        info!(group = %group_id, dry_run = options.dry_run, "sleep cycle starting");

        let phase1 = if options.consolidation {
            match &target {
                SleepTarget::Single(group) => {
                    consolidation::run_single(&self.clients, &self.store, group, &options).await?
                }
                SleepTarget::Tiered {
                    stm_group_id,
                    ltm_group_id,
                } => {
                    consolidation::run_tiered(
                        &self.clients,
                        &self.store,
                        stm_group_id,
                        ltm_group_id,
                        &options,
                    )
                    .await?
                }
            }
        } else {
            Phase1Report::default()
        };

        let maintenance_group = target.maintenance_group();

        let phase2 = if options.pruning {
            pruning::run(&self.store, maintenance_group, &options).await?
        } else {
            Phase2Report::default()
        };

        let phase3 = if options.communities {
            communities::run(&self.clients, &self.store, maintenance_group, &options).await?
        } else {
            Phase3Report::skipped("phase disabled", 0)
        };

        let completed_at = utc_now();
        let report = SleepReport {
            group_id,
            ltm_group_id,
            dry_run: options.dry_run,
            started_at,
            completed_at,
            duration_ms: completed_at
                .signed_duration_since(started_at)
                .num_milliseconds(),
            phase1,
            phase2,
            phase3,
        };

        info!(
            refreshed = report.phase1.entities_refreshed,
            merged = report.phase2.entities_merged,
            communities = report.phase3.communities_built,
            duration_ms = report.duration_ms,
            "sleep cycle complete"
        );

        Ok(report)
    }
}
