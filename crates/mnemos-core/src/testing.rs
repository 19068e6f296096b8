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

//! Shared test doubles for the unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::database::{json_to_param, GraphDriver, QueryParameter, QueryRow};
use crate::database::types::DriverResult;

/// A scripted driver: responses are queued against a query substring and
/// served in FIFO order; every executed statement is recorded.
#[derive(Debug, Default)]
pub struct FakeDriver {
    responses: Mutex<Vec<(String, Vec<QueryRow>)>>,
    calls: Mutex<Vec<(String, HashMap<String, QueryParameter>)>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `rows` for the next statement containing `fragment`
    pub fn push_response(&self, fragment: &str, rows: Vec<QueryRow>) {
        self.responses
            .lock()
            .unwrap()
            .push((fragment.to_string(), rows));
    }

    /// All statements executed so far
    pub fn calls(&self) -> Vec<(String, HashMap<String, QueryParameter>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Statements whose text contains `fragment`
    pub fn calls_matching(&self, fragment: &str) -> Vec<(String, HashMap<String, QueryParameter>)> {
        self.calls()
            .into_iter()
            .filter(|(q, _)| q.contains(fragment))
            .collect()
    }

    /// Build a `row` map from serializable column values
    pub fn row(columns: &[(&str, serde_json::Value)]) -> QueryRow {
        columns
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    json_to_param(value.clone()).expect("test value converts"),
                )
            })
            .collect()
    }
}

#[async_trait]
impl GraphDriver for FakeDriver {
    async fn execute(
        &self,
        query: &str,
        parameters: HashMap<String, QueryParameter>,
    ) -> DriverResult<Vec<QueryRow>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), parameters));

        let mut responses = self.responses.lock().unwrap();
        if let Some(pos) = responses.iter().position(|(frag, _)| query.contains(frag)) {
            let (_, rows) = responses.remove(pos);
            return Ok(rows);
        }
        Ok(Vec::new())
    }

    async fn health_check(&self) -> DriverResult<bool> {
        Ok(true)
    }

    async fn build_indices_and_constraints(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}
