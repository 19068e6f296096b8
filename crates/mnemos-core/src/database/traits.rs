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

//! Graph driver abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

use super::types::{DriverError, DriverResult};

/// Represents a query parameter value.
///
/// Integer-typed bounds (LIMIT, hop counts) must always be built with
/// [`QueryParameter::Integer`]; backends such as Neo4j reject float LIMITs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryParameter {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    List(Vec<QueryParameter>),
    Map(HashMap<String, QueryParameter>),
}

impl QueryParameter {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryParameter::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryParameter::Integer(i) => Some(*i),
            QueryParameter::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryParameter::Float(f) => Some(*f),
            QueryParameter::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryParameter::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[QueryParameter]> {
        match self {
            QueryParameter::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, QueryParameter>> {
        match self {
            QueryParameter::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryParameter::Null)
    }
}

/// Convert a serde_json::Value into a QueryParameter
pub fn json_to_param(value: serde_json::Value) -> DriverResult<QueryParameter> {
    match value {
        serde_json::Value::Null => Ok(QueryParameter::Null),
        serde_json::Value::Bool(b) => Ok(QueryParameter::Boolean(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(QueryParameter::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(QueryParameter::Float(f))
            } else {
                Err(DriverError::UnsupportedParameter(format!(
                    "number out of range: {}",
                    n
                )))
            }
        }
        serde_json::Value::String(s) => Ok(QueryParameter::String(s)),
        serde_json::Value::Array(arr) => {
            let mut list = Vec::with_capacity(arr.len());
            for item in arr {
                list.push(json_to_param(item)?);
            }
            Ok(QueryParameter::List(list))
        }
        serde_json::Value::Object(obj) => {
            let mut map = HashMap::with_capacity(obj.len());
            for (key, val) in obj {
                map.insert(key, json_to_param(val)?);
            }
            Ok(QueryParameter::Map(map))
        }
    }
}

/// Convert a QueryParameter back into a serde_json::Value
pub fn param_to_json(param: &QueryParameter) -> serde_json::Value {
    match param {
        QueryParameter::Null => serde_json::Value::Null,
        QueryParameter::Boolean(b) => serde_json::Value::Bool(*b),
        QueryParameter::Integer(i) => serde_json::Value::from(*i),
        QueryParameter::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        QueryParameter::String(s) => serde_json::Value::String(s.clone()),
        QueryParameter::List(list) => {
            serde_json::Value::Array(list.iter().map(param_to_json).collect())
        }
        QueryParameter::Map(map) => {
            let mut obj = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                obj.insert(key.clone(), param_to_json(val));
            }
            serde_json::Value::Object(obj)
        }
    }
}

/// A single result row: the map returned by the statement's `row` column
pub type QueryRow = HashMap<String, QueryParameter>;

/// Main driver trait that abstracts graph database access.
///
/// Statements that return data must project a single map column aliased
/// `row` (e.g. `RETURN {node: properties(n), labels: labels(n)} AS row`);
/// write-only statements may omit RETURN and yield no rows.
#[async_trait]
pub trait GraphDriver: Send + Sync + Debug {
    /// Execute a statement and return its rows
    async fn execute(
        &self,
        query: &str,
        parameters: HashMap<String, QueryParameter>,
    ) -> DriverResult<Vec<QueryRow>>;

    /// Check whether the backend is reachable
    async fn health_check(&self) -> DriverResult<bool>;

    /// Create the indexes and constraints the engine relies on
    async fn build_indices_and_constraints(&self) -> DriverResult<()>;

    /// Close the connection
    async fn close(&self) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_param_round_trip() {
        let value = json!({
            "name": "Alice",
            "count": 3,
            "score": 0.5,
            "flag": true,
            "none": null,
            "tags": ["a", "b"],
        });

        let param = json_to_param(value.clone()).unwrap();
        assert_eq!(param_to_json(&param), value);
    }

    #[test]
    fn test_integer_stays_integer() {
        let param = json_to_param(json!(10)).unwrap();
        assert_eq!(param, QueryParameter::Integer(10));
        assert_eq!(param.as_i64(), Some(10));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(QueryParameter::String("x".into()).as_str(), Some("x"));
        assert_eq!(QueryParameter::Float(1.5).as_f64(), Some(1.5));
        assert!(QueryParameter::Null.is_null());
        assert_eq!(QueryParameter::Boolean(true).as_bool(), Some(true));
    }
}
