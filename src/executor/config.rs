//! Execution manager configuration.
//!
//! Values come from code (builder setters), the environment
//! ([`ExecutorConfig::from_env`]) or a host's YAML config (serde, durations in
//! whole seconds).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Per-item timeout when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Queries running longer than this are logged as slow.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

pub const ENV_TIMEOUT_SECS: &str = "POLICY_EXECUTION_TIMEOUT_SECS";
pub const ENV_MEM_DEBUG: &str = "MEM_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Budget for one queued item, from dispatch until every datapoint
    /// reported.
    #[serde(
        default = "default_timeout",
        rename = "timeout_secs",
        serialize_with = "as_secs",
        deserialize_with = "from_secs"
    )]
    pub timeout: Duration,

    /// Log process memory after each item. No behavioral effect.
    #[serde(default)]
    pub mem_debug: bool,

    #[serde(
        default = "default_slow_query_threshold",
        rename = "slow_query_threshold_secs",
        serialize_with = "as_secs",
        deserialize_with = "from_secs"
    )]
    pub slow_query_threshold: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_slow_query_threshold() -> Duration {
    DEFAULT_SLOW_QUERY_THRESHOLD
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

fn from_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_secs(u64::deserialize(d)?))
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            mem_debug: false,
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
        }
    }
}

impl ExecutorConfig {
    /// Reads `POLICY_EXECUTION_TIMEOUT_SECS` and `MEM_DEBUG`, keeping defaults
    /// for anything absent or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    var = ENV_TIMEOUT_SECS,
                    value = %raw,
                    "ignoring invalid execution timeout"
                ),
            }
        }
        if let Some(raw) = lookup(ENV_MEM_DEBUG) {
            config.mem_debug = raw.trim() == "1";
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mem_debug(mut self, enabled: bool) -> Self {
        self.mem_debug = enabled;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }
}
