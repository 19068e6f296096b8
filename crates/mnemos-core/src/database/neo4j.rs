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

//! Neo4j driver implementation

use async_trait::async_trait;
use neo4rs::{BoltList, BoltMap, BoltType, ConfigBuilder, Graph};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::config::DatabaseConfig;
use super::traits::{json_to_param, GraphDriver, QueryParameter, QueryRow};
use super::types::{DriverError, DriverResult};

/// Neo4j driver over the Bolt protocol
#[derive(Clone)]
pub struct Neo4jDriver {
    graph: Arc<Graph>,
}

impl std::fmt::Debug for Neo4jDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jDriver").finish_non_exhaustive()
    }
}

impl Neo4jDriver {
    /// Connect to a Neo4j instance
    pub async fn connect(config: DatabaseConfig) -> DriverResult<Self> {
        let mut builder = ConfigBuilder::default().uri(&config.uri);

        if let Some(username) = &config.username {
            builder = builder.user(username);
        }

        if let Some(password) = &config.password {
            builder = builder.password(password);
        }

        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }

        let graph_config = builder
            .build()
            .map_err(|e| DriverError::Configuration(e.to_string()))?;

        let graph = Graph::connect(graph_config)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(Self {
            graph: Arc::new(graph),
        })
    }

    /// Convert QueryParameter to BoltType for Neo4j
    fn param_to_bolt(param: &QueryParameter) -> DriverResult<BoltType> {
        match param {
            QueryParameter::String(s) => Ok(BoltType::String(neo4rs::BoltString::new(s))),
            QueryParameter::Integer(i) => Ok(BoltType::Integer(neo4rs::BoltInteger::new(*i))),
            QueryParameter::Float(f) => Ok(BoltType::Float(neo4rs::BoltFloat::new(*f))),
            QueryParameter::Boolean(b) => Ok(BoltType::Boolean(neo4rs::BoltBoolean::new(*b))),
            QueryParameter::Null => Ok(BoltType::Null(neo4rs::BoltNull)),
            QueryParameter::List(list) => {
                let mut bolt_list = BoltList::new();
                for item in list {
                    bolt_list.push(Self::param_to_bolt(item)?);
                }
                Ok(BoltType::List(bolt_list))
            }
            QueryParameter::Map(map) => {
                let mut bolt_map = BoltMap::new();
                for (key, value) in map {
                    bolt_map.put(neo4rs::BoltString::new(key), Self::param_to_bolt(value)?);
                }
                Ok(BoltType::Map(bolt_map))
            }
        }
    }
}

#[async_trait]
impl GraphDriver for Neo4jDriver {
    async fn execute(
        &self,
        query: &str,
        parameters: HashMap<String, QueryParameter>,
    ) -> DriverResult<Vec<QueryRow>> {
        let mut cypher = neo4rs::query(query);
        for (key, value) in &parameters {
            cypher = cypher.param(key.as_str(), Self::param_to_bolt(value)?);
        }

        debug!(query, "executing statement");

        let mut stream = self.graph.execute(cypher).await?;
        let mut rows = Vec::new();

        while let Some(row) = stream.next().await? {
            let value: serde_json::Value = row
                .get("row")
                .map_err(|e| DriverError::Deserialization(e.to_string()))?;
            match json_to_param(value)? {
                QueryParameter::Map(map) => rows.push(map),
                other => {
                    return Err(DriverError::Deserialization(format!(
                        "expected a map in the `row` column, got {:?}",
                        other
                    )))
                }
            }
        }

        Ok(rows)
    }

    async fn health_check(&self) -> DriverResult<bool> {
        let result = self
            .execute("RETURN {ok: true} AS row", HashMap::new())
            .await?;
        Ok(!result.is_empty())
    }

    async fn build_indices_and_constraints(&self) -> DriverResult<()> {
        let statements = [
            "CREATE CONSTRAINT entity_uuid IF NOT EXISTS FOR (n:Entity) REQUIRE n.uuid IS UNIQUE",
            "CREATE CONSTRAINT episodic_uuid IF NOT EXISTS FOR (n:Episodic) REQUIRE n.uuid IS UNIQUE",
            "CREATE CONSTRAINT community_uuid IF NOT EXISTS FOR (n:Community) REQUIRE n.uuid IS UNIQUE",
            "CREATE INDEX entity_name_group IF NOT EXISTS FOR (n:Entity) ON (n.name, n.group_id)",
            "CREATE INDEX entity_group IF NOT EXISTS FOR (n:Entity) ON (n.group_id)",
            "CREATE INDEX episodic_group IF NOT EXISTS FOR (n:Episodic) ON (n.group_id)",
            "CREATE INDEX community_group IF NOT EXISTS FOR (n:Community) ON (n.group_id)",
        ];

        for statement in statements {
            self.graph.run(neo4rs::query(statement)).await?;
        }

        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        // neo4rs pools connections internally; dropping the Graph releases them
        Ok(())
    }
}
