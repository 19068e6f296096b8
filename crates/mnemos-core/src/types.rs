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

use std::sync::Arc;

use crate::cache::Cache;
use crate::database::GraphDriver;
use crate::embedder::EmbedderClient;
use crate::llm_client::LlmClient;

/// Core clients shared by the pipeline, retrieval, and sleep components
#[derive(Clone)]
pub struct Clients {
    pub driver: Arc<dyn GraphDriver>,
    pub llm_client: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn EmbedderClient>,
    pub cache: Arc<dyn Cache>,
}

impl Clients {
    pub fn new(
        driver: Arc<dyn GraphDriver>,
        llm_client: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            driver,
            llm_client,
            embedder,
            cache,
        }
    }
}

/// Default group partition used when callers omit `group_id`
pub const DEFAULT_GROUP_ID: &str = "default";
