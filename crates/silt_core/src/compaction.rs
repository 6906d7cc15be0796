//! Compaction policy.
//!
//! Pure threshold decisions with no I/O. Execution is a total rewrite of the
//! segment's on-disk generation, performed by the segment facade inside an
//! exclusive maintenance window.

use crate::config::SegmentConfig;

/// Threshold policy deciding when a segment should consolidate its delta
/// tier into the main file.
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    max_keys_in_delta_cache: usize,
    max_keys_in_delta_cache_during_writing: usize,
    max_delta_files: usize,
}

impl CompactionPolicy {
    /// Creates a policy from the segment configuration.
    #[must_use]
    pub fn new(config: &SegmentConfig) -> Self {
        Self {
            max_keys_in_delta_cache: config.max_keys_in_delta_cache,
            max_keys_in_delta_cache_during_writing: config.max_keys_in_delta_cache_during_writing,
            max_delta_files: config.max_delta_files,
        }
    }

    /// Whether the delta cache has outgrown its limit.
    #[must_use]
    pub fn should_compact(&self, keys_in_delta_cache: usize) -> bool {
        keys_in_delta_cache > self.max_keys_in_delta_cache
    }

    /// Whether to compact while a delta file write is already in flight.
    ///
    /// True when the on-disk delta file count exceeds its hard ceiling
    /// (forced compaction to bound recovery cost), or when the delta cache
    /// plus the pending file's keys would exceed the during-writing
    /// threshold. That threshold is higher than the base one so an
    /// in-flight write does not flip-flop between flushing and compacting.
    #[must_use]
    pub fn should_compact_during_writing(
        &self,
        delta_file_count: usize,
        keys_in_delta_cache: usize,
        pending_keys_in_current_delta_file: usize,
    ) -> bool {
        delta_file_count > self.max_delta_files
            || keys_in_delta_cache + pending_keys_in_current_delta_file
                > self.max_keys_in_delta_cache_during_writing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CompactionPolicy {
        CompactionPolicy::new(
            &SegmentConfig::default()
                .max_keys_in_delta_cache(10)
                .max_keys_in_delta_cache_during_writing(20)
                .max_delta_files(3),
        )
    }

    #[test]
    fn compacts_only_above_delta_limit() {
        let policy = policy();
        assert!(!policy.should_compact(9));
        assert!(!policy.should_compact(10));
        assert!(policy.should_compact(11));
    }

    #[test]
    fn during_writing_uses_higher_threshold() {
        let policy = policy();
        // 11 keys would trigger a plain compaction but not one mid-write.
        assert!(!policy.should_compact_during_writing(1, 11, 0));
        assert!(!policy.should_compact_during_writing(1, 15, 5));
        assert!(policy.should_compact_during_writing(1, 15, 6));
    }

    #[test]
    fn delta_file_ceiling_forces_compaction() {
        let policy = policy();
        assert!(!policy.should_compact_during_writing(3, 0, 0));
        assert!(policy.should_compact_during_writing(4, 0, 0));
    }
}
