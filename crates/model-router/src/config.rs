//! Configuration types for fallback execution and job polling

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls how [`crate::FallbackExecutor`] walks the priority chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    /// Attempt slots for one request; skipped models consume a slot too
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// When false the first failure is final
    #[serde(default = "default_enable_fallback")]
    pub enable_fallback: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_enable_fallback() -> bool {
    true
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            enable_fallback: default_enable_fallback(),
        }
    }
}

impl FallbackConfig {
    /// A config that never leaves the initial model
    pub fn no_fallback() -> Self {
        Self {
            enable_fallback: false,
            ..Self::default()
        }
    }
}

/// Budget for submit-then-poll jobs.
///
/// The overall timeout is `interval * max_attempts` (10 minutes by default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    #[serde(with = "duration_ms", default = "default_poll_interval")]
    pub interval: Duration,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_attempts() -> u32 {
    120
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: default_poll_attempts(),
        }
    }
}

impl PollConfig {
    /// Total time the poller waits before giving up
    pub fn timeout(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
