//! Store configuration.
//!
//! Persisted as `store.json` in the store root next to the index registry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a temporal store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When a branch's active chunk is rolled over.
    /// Default: never (explicit `rollover` only)
    #[serde(default)]
    pub rollover_policy: RolloverPolicy,

    /// Limits on concurrently open chunk environments.
    #[serde(default)]
    pub pool: PoolConfig,

    /// `fsync` the chunk log on every commit.
    /// Default: false
    #[serde(default)]
    pub sync_on_commit: bool,

    /// Sleep increment of the commit timestamp provider while waiting for the
    /// clock to move, in milliseconds.
    /// Default: 1
    #[serde(default = "default_timestamp_wait_ms")]
    pub timestamp_wait_ms: u64,
}

fn default_timestamp_wait_ms() -> u64 {
    1
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rollover_policy: RolloverPolicy::default(),
            pool: PoolConfig::default(),
            sync_on_commit: false,
            timestamp_wait_ms: default_timestamp_wait_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timestamp_wait(&self) -> Duration {
        Duration::from_millis(self.timestamp_wait_ms.max(1))
    }
}

/// Policy deciding when the active chunk of a branch rolls over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RolloverPolicy {
    /// Only on explicit request.
    Never,

    /// Once the chunk holds at least this many substrate entries.
    EntryThreshold {
        entries: u64,
    },

    /// Once the chunk log reaches this size.
    SizeThreshold {
        bytes: u64,
    },

    /// Once the chunk's validity started this long ago (in commit time).
    AgeAfter {
        millis: i64,
    },
}

impl Default for RolloverPolicy {
    fn default() -> Self {
        RolloverPolicy::Never
    }
}

/// Resource pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Environments kept open by a sweep, most recently used first.
    /// Default: 16
    pub keep_open: usize,

    /// Period of the background sweep in milliseconds; 0 disables it.
    /// Default: 10 000
    pub sweep_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keep_open: 16,
            sweep_interval_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}
