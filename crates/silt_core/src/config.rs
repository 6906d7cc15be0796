//! Segment configuration.

use crate::error::{CoreError, CoreResult};

/// Immutable thresholds for one segment. Set once at construction.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Maximum number of keys buffered in the write cache (active + frozen
    /// tiers) before `put` blocks.
    pub max_write_cache_keys: usize,

    /// Write cache limit applied while maintenance is running. Higher than
    /// `max_write_cache_keys` so writers are not starved during a
    /// compaction or split window.
    pub max_write_cache_keys_during_maintenance: usize,

    /// Delta cache key count above which the segment should compact.
    pub max_keys_in_delta_cache: usize,

    /// Delta cache limit consulted while a delta file write is already in
    /// flight. Higher than `max_keys_in_delta_cache` to avoid compaction
    /// flip-flopping.
    pub max_keys_in_delta_cache_during_writing: usize,

    /// Hard ceiling on the number of on-disk delta files. Exceeding it
    /// forces a compaction to bound recovery cost.
    pub max_delta_files: usize,

    /// Bloom filter bits allocated per stored key.
    pub bloom_bits_per_key: usize,

    /// Number of bloom filter hash probes per key.
    pub bloom_hash_count: u32,

    /// Number of main-file entries covered by one sparse index anchor.
    /// Bounds the linear scan length of a point lookup.
    pub sparse_index_page_len: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_write_cache_keys: 1024,
            max_write_cache_keys_during_maintenance: 4096,
            max_keys_in_delta_cache: 8192,
            max_keys_in_delta_cache_during_writing: 16384,
            max_delta_files: 8,
            bloom_bits_per_key: 10,
            bloom_hash_count: 4,
            sparse_index_page_len: 64,
        }
    }
}

impl SegmentConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the write cache key limit.
    #[must_use]
    pub const fn max_write_cache_keys(mut self, keys: usize) -> Self {
        self.max_write_cache_keys = keys;
        self
    }

    /// Sets the write cache key limit during maintenance.
    #[must_use]
    pub const fn max_write_cache_keys_during_maintenance(mut self, keys: usize) -> Self {
        self.max_write_cache_keys_during_maintenance = keys;
        self
    }

    /// Sets the delta cache key limit.
    #[must_use]
    pub const fn max_keys_in_delta_cache(mut self, keys: usize) -> Self {
        self.max_keys_in_delta_cache = keys;
        self
    }

    /// Sets the delta cache key limit during writing.
    #[must_use]
    pub const fn max_keys_in_delta_cache_during_writing(mut self, keys: usize) -> Self {
        self.max_keys_in_delta_cache_during_writing = keys;
        self
    }

    /// Sets the delta file count ceiling.
    #[must_use]
    pub const fn max_delta_files(mut self, files: usize) -> Self {
        self.max_delta_files = files;
        self
    }

    /// Sets the bloom filter bits per key.
    #[must_use]
    pub const fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.bloom_bits_per_key = bits;
        self
    }

    /// Sets the sparse index page length.
    #[must_use]
    pub const fn sparse_index_page_len(mut self, len: usize) -> Self {
        self.sparse_index_page_len = len;
        self
    }

    /// Validates threshold consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if any limit is zero or a
    /// during-maintenance/during-writing limit is below its base limit.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_write_cache_keys == 0 {
            return Err(CoreError::invalid_config("max_write_cache_keys must be > 0"));
        }
        if self.max_write_cache_keys_during_maintenance < self.max_write_cache_keys {
            return Err(CoreError::invalid_config(
                "max_write_cache_keys_during_maintenance must be >= max_write_cache_keys",
            ));
        }
        if self.max_keys_in_delta_cache == 0 {
            return Err(CoreError::invalid_config(
                "max_keys_in_delta_cache must be > 0",
            ));
        }
        if self.max_keys_in_delta_cache_during_writing < self.max_keys_in_delta_cache {
            return Err(CoreError::invalid_config(
                "max_keys_in_delta_cache_during_writing must be >= max_keys_in_delta_cache",
            ));
        }
        if self.max_delta_files == 0 {
            return Err(CoreError::invalid_config("max_delta_files must be > 0"));
        }
        if self.bloom_bits_per_key == 0 || self.bloom_hash_count == 0 {
            return Err(CoreError::invalid_config(
                "bloom filter sizing must be > 0",
            ));
        }
        if self.sparse_index_page_len == 0 {
            return Err(CoreError::invalid_config(
                "sparse_index_page_len must be > 0",
            ));
        }
        Ok(())
    }
}
