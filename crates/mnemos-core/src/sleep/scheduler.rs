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

//! Auto-sleep scheduler.
//!
//! A single deferred task that fires daily at a local wall-clock time and
//! reschedules itself after each run. The delay is recomputed after every
//! cycle, which also absorbs clock jumps. Errors are reported to `on_error`
//! and the loop continues; a panicking user callback never stops it.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::report::SleepReport;
use super::{SleepEngine, SleepOptions, SleepTarget};
use crate::errors::{MnemosError, MnemosResult};

pub type CompleteCallback = Arc<dyn Fn(&SleepReport) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&MnemosError) + Send + Sync>;

/// Configuration for the recurring sleep task
#[derive(Clone)]
pub struct AutoSleepConfig {
    /// Local hour of day, 0-23
    pub hour: u32,
    /// Local minute, 0-59
    pub minute: u32,
    pub target: SleepTarget,
    pub options: SleepOptions,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl AutoSleepConfig {
    pub fn new(hour: u32, minute: u32, target: SleepTarget) -> Self {
        Self {
            hour,
            minute,
            target,
            options: SleepOptions::default(),
            on_complete: None,
            on_error: None,
        }
    }
}

/// Milliseconds until the next local `hour:minute`, computed from `now`.
/// Falls forward a day when the time already passed; DST gaps resolve to
/// the earliest valid instant.
pub fn ms_until_next(hour: u32, minute: u32, now: DateTime<Local>) -> u64 {
    for day_offset in 0..=2 {
        let date = now.date_naive() + ChronoDuration::days(day_offset);
        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
            continue;
        };
        let Some(candidate) = Local.from_local_datetime(&naive).earliest() else {
            // Skipped by a DST gap; try the next day
            continue;
        };
        if candidate > now {
            return candidate.signed_duration_since(now).num_milliseconds().max(0) as u64;
        }
    }
    // Unreachable for valid hour/minute; park for a day as a safety net
    86_400_000
}

/// Cooperative single-task scheduler: at most one recurring task, at most
/// one sleep cycle in flight (the engine's cycle lock covers the latter).
pub struct SleepScheduler {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SleepScheduler {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Start the daily task. Errors if one is already running.
    pub fn start(&self, engine: SleepEngine, config: AutoSleepConfig) -> MnemosResult<()> {
        if config.hour > 23 || config.minute > 59 {
            return Err(MnemosError::Validation {
                message: format!("invalid schedule time {:02}:{:02}", config.hour, config.minute),
            });
        }

        let mut guard = self.handle.lock().expect("scheduler lock poisoned");
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(MnemosError::Validation {
                message: "auto sleep is already running".to_string(),
            });
        }

        info!(
            hour = config.hour,
            minute = config.minute,
            "auto sleep scheduled"
        );

        let handle = tokio::spawn(async move {
            loop {
                let delay = ms_until_next(config.hour, config.minute, Local::now());
                tokio::time::sleep(Duration::from_millis(delay)).await;

                info!("auto sleep cycle firing");
                match engine
                    .sleep(config.target.clone(), config.options.clone())
                    .await
                {
                    Ok(report) => {
                        if let Some(callback) = &config.on_complete {
                            if catch_unwind(AssertUnwindSafe(|| callback(&report))).is_err() {
                                warn!("on_complete callback panicked; scheduler continues");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "auto sleep cycle failed; retrying next day");
                        if let Some(callback) = &config.on_error {
                            if catch_unwind(AssertUnwindSafe(|| callback(&e))).is_err() {
                                warn!("on_error callback panicked; scheduler continues");
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(handle);
        Ok(())
    }

    /// Cancel the recurring task. Safe to call when nothing is running.
    pub fn stop(&self) {
        let mut guard = self.handle.lock().expect("scheduler lock poisoned");
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("auto sleep stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("scheduler lock poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Default for SleepScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SleepScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
