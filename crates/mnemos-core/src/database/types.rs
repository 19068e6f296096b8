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

//! Driver error types

use thiserror::Error;

/// Errors surfaced by graph driver implementations
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<neo4rs::Error> for DriverError {
    fn from(e: neo4rs::Error) -> Self {
        DriverError::Query(e.to_string())
    }
}

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
