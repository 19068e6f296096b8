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

//! Helper utilities

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use std::env;
use tokio::sync::Semaphore;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Semaphore limit for concurrent operations
pub fn semaphore_limit() -> usize {
    env::var("SEMAPHORE_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20)
}

/// Get current UTC time
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a datetime for storage.
///
/// Fixed-width UTC with microsecond precision, so that lexicographic
/// comparison of stored values matches chronological order (the date-window
/// filters compare these strings inside the query).
pub fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime from its stored representation
pub fn parse_db_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Display name for an episode: the first 50 characters of its content,
/// cut on a char boundary.
pub fn episode_display_name(content: &str) -> String {
    content.chars().take(50).collect()
}

/// Whole days between the moment an event occurred and the moment it was
/// recorded; clamped at zero for forward-dated episodes.
pub fn retroactive_days(created_at: DateTime<Utc>, valid_at: DateTime<Utc>) -> i64 {
    let delta = created_at.signed_duration_since(valid_at).num_seconds();
    (delta / SECONDS_PER_DAY).max(0)
}

/// Cosine similarity between two embedding vectors.
///
/// Accumulates in f64 to keep scores stable for high-dimensional vectors.
/// Returns 0.0 for empty, mismatched, or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = x as f64;
        let y = y as f64;
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        return 0.0;
    }

    dot / denom
}

/// L2 norm of an embedding vector, accumulated in f64
pub fn l2_norm(embedding: &[f32]) -> f64 {
    embedding
        .iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Serde helpers for datetimes stored through the driver. All persisted
/// timestamps go through [`format_db_time`] so the stored strings stay
/// comparable.
pub mod db_time {
    use super::{format_db_time, parse_db_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_db_time(*dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_db_time(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as [`db_time`] for optional datetimes
pub mod db_time_opt {
    use super::{format_db_time, parse_db_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&format_db_time(*dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => parse_db_time(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Execute futures with semaphore-based concurrency limiting
pub async fn semaphore_gather<T, F>(futures: Vec<F>, max_concurrent: Option<usize>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send,
    T: Send,
{
    let limit = max_concurrent.unwrap_or_else(semaphore_limit);
    let semaphore = Semaphore::new(limit);

    let tasks: Vec<_> = futures
        .into_iter()
        .map(|future| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                future.await
            }
        })
        .collect();

    join_all(tasks).await
}
