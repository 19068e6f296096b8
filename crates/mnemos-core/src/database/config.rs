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

//! Database configuration types

use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl DatabaseConfig {
    /// Create a new Neo4j configuration
    pub fn new(uri: String, username: String, password: String) -> Self {
        Self {
            uri,
            username: Some(username),
            password: Some(password),
            database: Some("neo4j".to_string()),
        }
    }

    /// Set the database name
    pub fn with_database(mut self, database: String) -> Self {
        self.database = Some(database);
        self
    }

    /// Build a configuration from `NEO4J_URI` / `NEO4J_USER` / `NEO4J_PASSWORD`
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            username: std::env::var("NEO4J_USER").ok(),
            password: std::env::var("NEO4J_PASSWORD").ok(),
            database: std::env::var("NEO4J_DATABASE").ok(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(
            "bolt://localhost:7687".to_string(),
            "neo4j".to_string(),
            "password".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.uri, "bolt://localhost:7687");
        assert_eq!(config.database.as_deref(), Some("neo4j"));
    }
}
