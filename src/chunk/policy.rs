//! Rollover policy evaluation.

use crate::chunk::ChunkInfo;
use crate::config::RolloverPolicy;

/// Measurements of an open chunk used by the rollover policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStats {
    /// Substrate entries written to the chunk.
    pub entries: u64,

    /// Bytes in the chunk log.
    pub size_bytes: u64,

    /// Commit time elapsed since the chunk was created.
    pub age_millis: i64,
}

/// Evaluate whether `chunk` should be rolled over under `policy`.
pub fn should_rollover(policy: &RolloverPolicy, chunk: &ChunkInfo, stats: &ChunkStats) -> bool {
    // Rolled-over chunks are read-only
    if !chunk.is_open() {
        return false;
    }

    match policy {
        RolloverPolicy::Never => false,
        RolloverPolicy::EntryThreshold { entries } => stats.entries >= *entries,
        RolloverPolicy::SizeThreshold { bytes } => stats.size_bytes >= *bytes,
        RolloverPolicy::AgeAfter { millis } => stats.age_millis >= *millis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(entries: u64, size_bytes: u64, age_millis: i64) -> ChunkStats {
        ChunkStats {
            entries,
            size_bytes,
            age_millis,
        }
    }

    #[test]
    fn test_policy_never() {
        let chunk = ChunkInfo::new(0, 0, 0);
        assert!(!should_rollover(&RolloverPolicy::Never, &chunk, &stats(u64::MAX, u64::MAX, i64::MAX)));
    }

    #[test]
    fn test_policy_entry_threshold() {
        let policy = RolloverPolicy::EntryThreshold { entries: 100 };
        let chunk = ChunkInfo::new(0, 0, 0);
        assert!(should_rollover(&policy, &chunk, &stats(100, 0, 0)));
        assert!(!should_rollover(&policy, &chunk, &stats(99, 0, 0)));
    }

    #[test]
    fn test_policy_size_threshold() {
        let policy = RolloverPolicy::SizeThreshold { bytes: 64 * 1024 };
        let chunk = ChunkInfo::new(0, 0, 0);
        assert!(should_rollover(&policy, &chunk, &stats(0, 128 * 1024, 0)));
        assert!(!should_rollover(&policy, &chunk, &stats(0, 1024, 0)));
    }

    #[test]
    fn test_policy_age_after() {
        let policy = RolloverPolicy::AgeAfter { millis: 60_000 };
        let chunk = ChunkInfo::new(0, 0, 0);
        assert!(should_rollover(&policy, &chunk, &stats(0, 0, 60_000)));
        assert!(!should_rollover(&policy, &chunk, &stats(0, 0, 59_999)));
    }

    #[test]
    fn test_rolled_over_chunk_never_rolls_again() {
        let mut chunk = ChunkInfo::new(0, 0, 0);
        chunk.valid_to = Some(10);
        let policies = vec![
            RolloverPolicy::EntryThreshold { entries: 0 },
            RolloverPolicy::SizeThreshold { bytes: 0 },
            RolloverPolicy::AgeAfter { millis: 0 },
        ];
        for policy in policies {
            assert!(!should_rollover(&policy, &chunk, &stats(10, 10, 10)));
        }
    }
}
