//! Per-model health tracking with a time-windowed circuit breaker
//!
//! Every provider call attempt is recorded here. A model is skipped once it
//! has failed [`FAILURE_THRESHOLD`] times in a row and its last failure is
//! younger than [`SKIP_WINDOW`]; it becomes eligible again automatically
//! when the window has passed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::catalog::ModelId;

/// Consecutive failures after which a model counts as unhealthy
pub const FAILURE_THRESHOLD: u32 = 3;

/// How long an unhealthy model stays skipped after its last failure
pub fn skip_window() -> Duration {
    Duration::hours(1)
}

/// Source of "now" for the tracker
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Mutable usage record for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsageStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl ModelUsageStats {
    /// Success percentage, 100 when the model was never called
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 100.0;
        }
        self.success_count as f64 / total as f64 * 100.0
    }
}

/// Health summary returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHealth {
    pub healthy: bool,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Shared usage-stats store.
///
/// All mutation happens inside one lock acquisition per call, so concurrent
/// recordings for any models never lose updates.
pub struct HealthTracker {
    stats: Mutex<HashMap<ModelId, ModelUsageStats>>,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Record the outcome of one call attempt
    pub fn record_result(&self, model_id: &str, success: bool, error: Option<&str>) {
        let now = self.clock.now();
        let mut stats = self.stats.lock();
        let entry = stats.entry(model_id.to_string()).or_default();

        if success {
            entry.success_count += 1;
            entry.consecutive_failures = 0;
            entry.last_error = None;
        } else {
            entry.failure_count += 1;
            entry.consecutive_failures += 1;
            entry.last_error = error.map(str::to_string);
            entry.last_error_time = Some(now);
            if entry.consecutive_failures == FAILURE_THRESHOLD {
                log::warn!(
                    "Model '{}' reached {} consecutive failures, skipping for {} minutes",
                    model_id,
                    FAILURE_THRESHOLD,
                    skip_window().num_minutes()
                );
            }
        }
    }

    /// Whether the circuit breaker currently excludes this model
    pub fn should_skip(&self, model_id: &str) -> bool {
        let now = self.clock.now();
        let stats = self.stats.lock();
        let Some(entry) = stats.get(model_id) else {
            return false;
        };
        if entry.consecutive_failures < FAILURE_THRESHOLD {
            return false;
        }
        match entry.last_error_time {
            Some(at) => now - at < skip_window(),
            None => false,
        }
    }

    /// Health summary for a model (healthy defaults when never used)
    pub fn get_health(&self, model_id: &str) -> ModelHealth {
        let stats = self.stats.lock();
        let entry = stats.get(model_id).cloned().unwrap_or_default();
        ModelHealth {
            healthy: entry.consecutive_failures < FAILURE_THRESHOLD,
            success_rate: entry.success_rate(),
            consecutive_failures: entry.consecutive_failures,
            last_error: entry.last_error,
        }
    }

    /// Raw stats for one model
    pub fn get_stats(&self, model_id: &str) -> Option<ModelUsageStats> {
        self.stats.lock().get(model_id).cloned()
    }

    /// Clear stats for one model, or for all models when `None`
    pub fn reset(&self, model_id: Option<&str>) {
        let mut stats = self.stats.lock();
        match model_id {
            Some(id) => {
                stats.remove(id);
            }
            None => stats.clear(),
        }
    }

    /// Copy of every record, for persistence
    pub fn snapshot(&self) -> HashMap<ModelId, ModelUsageStats> {
        self.stats.lock().clone()
    }

    /// Replace all records with previously persisted ones
    pub fn restore(&self, stats: HashMap<ModelId, ModelUsageStats>) {
        *self.stats.lock() = stats;
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
