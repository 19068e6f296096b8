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

//! Database abstraction layer
//!
//! Provides a backend-agnostic driver interface for graph statements. The
//! engine ships a Neo4j implementation; any backend with a Cypher-like
//! dialect can stand in behind [`GraphDriver`].

use std::sync::Arc;

pub mod config;
pub mod neo4j;
pub mod traits;
pub mod types;

pub use config::DatabaseConfig;
pub use traits::{json_to_param, param_to_json, GraphDriver, QueryParameter, QueryRow};
pub use types::{DriverError, DriverResult};

/// Factory function to create a driver from configuration
pub async fn create_driver(config: DatabaseConfig) -> DriverResult<Arc<dyn GraphDriver>> {
    let driver = neo4j::Neo4jDriver::connect(config).await?;
    Ok(Arc::new(driver))
}
