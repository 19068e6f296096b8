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

//! Search and traversal parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::graph::Direction;

pub const DEFAULT_SEARCH_LIMIT: i64 = 10;
pub const DEFAULT_EXPAND_HOPS: i64 = 2;
pub const DEFAULT_TEMPORAL_ALPHA: f64 = 0.3;
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;
pub const DEFAULT_TRAVERSE_HOPS: i64 = 2;
pub const DEFAULT_TRAVERSE_LIMIT: i64 = 50;

/// Parameters for semantic retrieval
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct SearchParams {
    #[validate(length(min = 1))]
    pub query: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[validate(range(min = 1, max = 200))]
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub graph_expand: bool,
    #[validate(range(min = 1, max = 10))]
    #[serde(default)]
    pub expand_hops: Option<i64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub query_time: Option<DateTime<Utc>>,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub temporal_alpha: Option<f64>,
    #[validate(range(min = 0.001))]
    #[serde(default)]
    pub half_life_days: Option<f64>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            group_id: None,
            limit: None,
            graph_expand: false,
            expand_hops: None,
            valid_from: None,
            valid_to: None,
            query_time: None,
            temporal_alpha: None,
            half_life_days: None,
        }
    }
}

/// Parameters for graph traversal from a start entity
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct TraverseParams {
    #[serde(default)]
    pub start_entity_uuid: Option<String>,
    #[serde(default)]
    pub start_entity_name: Option<String>,
    #[validate(range(min = 1, max = 10))]
    #[serde(default)]
    pub max_hops: Option<i64>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[validate(range(min = 1, max = 1000))]
    #[serde(default)]
    pub limit: Option<i64>,
}

impl TraverseParams {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            start_entity_uuid: None,
            start_entity_name: Some(name.into()),
            max_hops: None,
            direction: None,
            group_id: None,
            limit: None,
        }
    }

    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        Self {
            start_entity_uuid: Some(uuid.into()),
            start_entity_name: None,
            max_hops: None,
            direction: None,
            group_id: None,
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params_validation() {
        assert!(SearchParams::new("query").validate().is_ok());
        assert!(SearchParams::new("").validate().is_err());

        let mut params = SearchParams::new("query");
        params.limit = Some(0);
        assert!(params.validate().is_err());

        params.limit = Some(10);
        params.temporal_alpha = Some(1.5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_traverse_params_validation() {
        let mut params = TraverseParams::by_name("Alice");
        assert!(params.validate().is_ok());
        params.max_hops = Some(99);
        assert!(params.validate().is_err());
    }
}
