//! The segment facade.
//!
//! One sorted, bounded keyspace unit: a tiered write cache in front of an
//! on-disk generation (main index file, sparse index, bloom filter) plus any
//! number of flushed delta files. All public operations are admitted through
//! the concurrency gate; maintenance operations (compaction, split,
//! consistency check) take the gate exclusively via FREEZE-and-drain.

use crate::cache::{Tier, TieredCache};
use crate::compaction::CompactionPolicy;
use crate::config::SegmentConfig;
use crate::consistency::check_order;
use crate::error::{CoreError, CoreResult};
use crate::gate::{Gate, SegmentState};
use crate::iter::{tier_source, FreezeHold, MergedIter, Isolation, SegmentIterator};
use crate::mainfile::{encode_record, MainFileWriter, RecordIter};
use crate::metadata::{SegmentMetadata, SegmentStats};
use crate::resources::{bloom_file, main_file, sparse_file, temp_name, GenerationResources};
use crate::search;
use crate::split::{self, SplitOutcome, SplitPlan};
use crate::types::{Entry, SegmentId, Value};
use crate::version::VersionController;
use crate::bloom::BloomFilter;
use crate::sparse::SparseIndex;
use parking_lot::Mutex;
use silt_storage::SegmentDirectory;
use std::sync::Arc;
use std::time::Duration;

/// How long a writer parks on the cache condvar before retrying its own
/// flush. Bounded so a writer is never stranded when no other thread is
/// around to free capacity.
const CAPACITY_WAIT: Duration = Duration::from_millis(10);

/// Decrements the gate's reader count on drop.
struct ReadPass<'a>(&'a Gate);

impl Drop for ReadPass<'_> {
    fn drop(&mut self) {
        self.0.exit_read();
    }
}

/// Decrements the gate's writer count on drop.
struct WritePass<'a>(&'a Gate);

impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        self.0.exit_write();
    }
}

/// Maps a refusing gate state to the corresponding error.
fn admission_error(state: SegmentState, operation: &'static str) -> CoreError {
    match state {
        SegmentState::Closed => CoreError::Closed,
        SegmentState::Error => CoreError::Failed,
        _ => CoreError::busy(operation),
    }
}

/// A single sorted key/value segment backed by one directory namespace.
///
/// All methods take `&self`; the segment is internally synchronized and is
/// meant to be shared across threads behind an `Arc`.
pub struct Segment {
    pub(crate) id: SegmentId,
    pub(crate) config: SegmentConfig,
    pub(crate) dir: Arc<dyn SegmentDirectory>,
    pub(crate) gate: Gate,
    pub(crate) cache: TieredCache,
    pub(crate) version: VersionController,
    pub(crate) resources: GenerationResources,
    pub(crate) meta: Mutex<SegmentMetadata>,
    /// Serializes flushes so at most one delta file write is in flight.
    flush_lock: Mutex<()>,
    policy: CompactionPolicy,
}

impl Segment {
    /// Opens the segment with the given id inside `dir`, creating an empty
    /// one when the id has no on-disk artifacts yet.
    ///
    /// Replays every delta file named in the metadata document into the
    /// delta cache tier, in write order so later files win. Stale temporary
    /// files from an interrupted rewrite are swept away.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, unreadable metadata, or a corrupted
    /// delta file.
    pub fn open(
        dir: Arc<dyn SegmentDirectory>,
        id: SegmentId,
        config: SegmentConfig,
    ) -> CoreResult<Self> {
        config.validate()?;

        let prefix = id.file_prefix();
        for name in dir.list()? {
            if name.starts_with(&prefix) && name.ends_with(".tmp") {
                dir.delete(&name)?;
            }
        }

        let meta = SegmentMetadata::load(dir.as_ref(), id)?;
        let cache = TieredCache::new();
        let mut delta = Tier::new();
        for name in &meta.delta_files {
            for entry in RecordIter::new(dir.open(name)?)? {
                let entry = entry?;
                delta.insert(entry.key, entry.value);
            }
        }
        let replayed = delta.len();
        cache.load_delta(delta);

        tracing::debug!(
            segment = %id,
            delta_files = meta.delta_files.len(),
            replayed_keys = replayed,
            "opened segment"
        );

        Ok(Self {
            id,
            policy: CompactionPolicy::new(&config),
            config,
            resources: GenerationResources::new(Arc::clone(&dir), id),
            dir,
            gate: Gate::new(),
            cache,
            version: VersionController::new(),
            meta: Mutex::new(meta),
            flush_lock: Mutex::new(()),
        })
    }

    /// The segment's id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// The current mutation version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.current()
    }

    /// Point-in-time key counts.
    #[must_use]
    pub fn stats(&self) -> SegmentStats {
        let mut stats = self.meta.lock().stats;
        stats.keys_in_delta_cache = self.cache.delta_len() as u64;
        stats
    }

    fn enter_read(&self, operation: &'static str) -> CoreResult<ReadPass<'_>> {
        self.gate
            .try_enter_read()
            .map(|()| ReadPass(&self.gate))
            .map_err(|state| admission_error(state, operation))
    }

    fn enter_write(&self, operation: &'static str) -> CoreResult<WritePass<'_>> {
        self.gate
            .try_enter_write()
            .map(|()| WritePass(&self.gate))
            .map_err(|state| admission_error(state, operation))
    }

    /// Write cache limit for the current gate state. A maintenance window
    /// raises the limit so writers are not starved while flushing is
    /// unavailable.
    fn write_cache_limit(&self) -> usize {
        match self.gate.state() {
            SegmentState::MaintenanceRunning => self.config.max_write_cache_keys_during_maintenance,
            _ => self.config.max_write_cache_keys,
        }
    }

    /// Looks up a key, most recent write winning.
    ///
    /// A tombstone anywhere above the main file answers "absent" without
    /// consulting lower layers.
    ///
    /// # Errors
    ///
    /// Fails when the gate refuses admission or the on-disk generation is
    /// unreadable.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let _pass = self.enter_read("get")?;
        if let Some(value) = self.cache.write_tiers_get(key) {
            return Ok(value.into_data());
        }
        search::lookup(key, &self.cache, &self.resources, &self.config)
    }

    /// Inserts or overwrites a key with live data.
    ///
    /// When the write cache is at capacity the calling thread flushes it and
    /// retries, so `put` blocks rather than fails under write pressure. If
    /// flushing is unavailable (a maintenance window is running) the thread
    /// parks on the cache condvar until capacity frees up.
    ///
    /// # Errors
    ///
    /// Fails when the segment is closed or in the error state.
    pub fn put(&self, key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.write_value(key.into(), Value::Data(data.into()))
    }

    /// Logically deletes a key by writing a tombstone.
    ///
    /// Deleting an absent key is a no-op that still writes the tombstone,
    /// since a version of the key may live in a lower tier.
    ///
    /// # Errors
    ///
    /// Fails when the segment is closed or in the error state.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.write_value(key.into(), Value::Tombstone)
    }

    fn write_value(&self, key: Vec<u8>, value: Value) -> CoreResult<()> {
        loop {
            {
                let _pass = self.enter_write("put")?;
                let limit = self.write_cache_limit();
                if self.cache.try_put(key.clone(), value.clone(), limit) {
                    self.version.bump();
                    return Ok(());
                }
            }
            // At capacity. Flushing frees the write tiers; never block while
            // holding write admission, or a concurrent drain would never
            // finish.
            match self.flush() {
                Ok(()) => {}
                Err(CoreError::Busy { .. }) => {
                    // A maintenance window owns the segment; its rewrite
                    // frees capacity when it finishes. Park on the cache
                    // condvar instead of spinning, with a bound so the
                    // retry loop stays live if nothing signals.
                    self.cache
                        .wait_for_capacity(self.write_cache_limit(), CAPACITY_WAIT);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Freezes the active tier and persists it as a delta file, then folds
    /// it into the delta cache tier. May trigger a compaction when the
    /// during-writing policy says the delta tier has outgrown its limits.
    ///
    /// A no-op when the write tiers are empty.
    ///
    /// # Errors
    ///
    /// Fails when the gate refuses admission or the delta file cannot be
    /// written.
    pub fn flush(&self) -> CoreResult<()> {
        if self.flush_once()? {
            self.force_compact()?;
        }
        Ok(())
    }

    /// One flush cycle. Returns whether the during-writing compaction policy
    /// fired.
    fn flush_once(&self) -> CoreResult<bool> {
        let _pass = self.enter_write("flush")?;
        // Flushing mutates the delta tier, which a running maintenance
        // operation treats as stable; refuse until the window ends. The
        // check is race-free because reaching MAINTENANCE_RUNNING requires
        // draining our write pass first.
        if self.gate.state() == SegmentState::MaintenanceRunning {
            return Err(CoreError::busy("flush"));
        }
        let _serial = self.flush_lock.lock();

        let Some(snapshot) = self.cache.freeze() else {
            return Ok(false);
        };

        let mut meta = self.meta.lock();
        let name = meta.next_delta_file(self.id);
        let mut writer = self.dir.create(&name)?;
        for (key, value) in snapshot.iter() {
            let record = encode_record(&Entry {
                key: key.clone(),
                value: value.clone(),
            });
            writer.append(&record)?;
        }
        writer.flush()?;
        writer.sync()?;
        drop(writer);
        meta.delta_files.push(name);

        let should_compact = self.policy.should_compact_during_writing(
            meta.delta_files.len(),
            self.cache.delta_len(),
            snapshot.len(),
        );

        self.cache.merge_frozen_into_delta();
        meta.stats.keys_in_delta_cache = self.cache.delta_len() as u64;
        meta.persist(self.dir.as_ref(), self.id)?;

        tracing::debug!(
            segment = %self.id,
            flushed_keys = snapshot.len(),
            delta_files = meta.delta_files.len(),
            should_compact,
            "flushed write cache"
        );
        Ok(should_compact)
    }

    /// Compacts if the delta tier has outgrown its configured limit.
    ///
    /// Returns whether a compaction ran.
    ///
    /// # Errors
    ///
    /// Propagates [`Segment::force_compact`] failures.
    pub fn optionally_compact(&self) -> CoreResult<bool> {
        if self.policy.should_compact(self.cache.delta_len()) {
            self.force_compact()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Rewrites the on-disk generation from the merged main ⋈ delta view,
    /// eliding tombstones, then clears the delta tier and its files.
    ///
    /// Always a total rewrite; compacting an already-compact segment is a
    /// correct (if wasteful) no-op on content.
    ///
    /// # Errors
    ///
    /// Fails when the maintenance window cannot be acquired. Any failure
    /// during the rewrite retires the segment to the error state.
    pub fn force_compact(&self) -> CoreResult<()> {
        self.with_maintenance("compact", false, |segment| segment.compact_locked())
    }

    fn compact_locked(&self) -> CoreResult<()> {
        self.version.bump();
        tracing::debug!(segment = %self.id, "starting compaction");

        let merged = self.merged_iter(false)?;
        let main_tmp = temp_name(&main_file(self.id));
        let mut writer = MainFileWriter::new(self.dir.create(&main_tmp)?, &self.config);
        for entry in merged {
            let entry = entry?;
            if let Some(data) = entry.value.into_data() {
                writer.add(&entry.key, &data)?;
            }
        }
        let (count, bloom, sparse) = writer.finish()?;
        let sparse_len = sparse.len() as u64;

        self.install_generation(self.id, &main_tmp, &bloom, &sparse)?;
        self.finish_rewrite(count, sparse_len)?;

        tracing::debug!(segment = %self.id, keys = count, "compaction finished");
        Ok(())
    }

    /// Live key estimate for a split of this segment: main-index entries
    /// plus deduplicated cached keys whose most recent value is not a
    /// tombstone.
    #[must_use]
    pub fn split_plan(&self) -> SplitPlan {
        let main = self.meta.lock().stats.keys_in_main_index;
        let cached = self.cache.unique_key_count_live() as u64;
        SplitPlan::new(main + cached)
    }

    /// Divides the segment: roughly half the live entries move to a new
    /// segment under `new_lower_id`, the remainder stays here. When
    /// everything fits in the lower half the rewrite replaces this segment
    /// in place instead and `new_lower_id` is not consumed.
    ///
    /// # Errors
    ///
    /// [`CoreError::SplitInfeasible`] when the plan estimates too few keys,
    /// [`CoreError::EmptySplit`] when the lower half receives nothing. Any
    /// failure retires the segment to the error state.
    pub fn split(&self, new_lower_id: SegmentId, plan: SplitPlan) -> CoreResult<SplitOutcome> {
        self.with_maintenance("split", true, |segment| {
            split::run(segment, new_lower_id, plan)
        })
    }

    /// Runs `body` inside an exclusive maintenance window: FREEZE, drain
    /// in-flight operations, MAINTENANCE_RUNNING, then back to READY. A
    /// failing body retires the gate to the error state unless the segment
    /// was concurrently closed.
    ///
    /// With `fold_write_tiers` the active and frozen tiers are folded into
    /// the delta tier while the gate is still drained, so a body that
    /// rewrites from main ⋈ delta covers every write acknowledged before the
    /// window opened. Writes admitted once MAINTENANCE_RUNNING begins land
    /// in the fresh active tier and are untouched by the rewrite.
    fn with_maintenance<T>(
        &self,
        operation: &'static str,
        fold_write_tiers: bool,
        body: impl FnOnce(&Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        if !self.gate.try_enter_freeze_and_drain() {
            return Err(admission_error(self.gate.state(), operation));
        }
        if fold_write_tiers {
            // No writers in flight here, so the fold cannot race a put.
            self.cache.fold_write_tiers_into_delta();
        }
        if !self.gate.enter_maintenance_running() {
            self.gate.fail();
            return Err(admission_error(self.gate.state(), operation));
        }

        match body(self) {
            Ok(value) => {
                // Both transitions fail only if close or fail raced in, and
                // those terminal states win.
                let _ = self.gate.finish_maintenance_to_freeze();
                let _ = self.gate.finish_freeze_to_ready();
                Ok(value)
            }
            Err(e) => {
                if self.gate.state() != SegmentState::Closed {
                    self.gate.fail();
                }
                Err(e)
            }
        }
    }

    /// Builds the merged, deduplicated, key-ordered view. With
    /// `include_write_tiers` the active and frozen tiers participate.
    /// Maintenance rewrites exclude them: compaction leaves them serving
    /// writes, and a split folds them into the delta tier beforehand.
    pub(crate) fn merged_iter(&self, include_write_tiers: bool) -> CoreResult<MergedIter> {
        let snapshot = self.cache.snapshot();
        let mut sources: Vec<Box<dyn Iterator<Item = CoreResult<Entry>>>> = Vec::new();
        if include_write_tiers {
            sources.push(tier_source(snapshot.active));
            sources.push(tier_source(snapshot.frozen));
        }
        sources.push(tier_source(snapshot.delta));
        let name = main_file(self.id);
        if self.dir.exists(&name) {
            sources.push(Box::new(RecordIter::new(self.dir.open(&name)?)?));
        }
        Ok(MergedIter::new(sources))
    }

    /// Persists the bloom filter and sparse index next to an already written
    /// main file, then renames all three over `target`'s generation.
    pub(crate) fn install_generation(
        &self,
        target: SegmentId,
        main_tmp: &str,
        bloom: &BloomFilter,
        sparse: &SparseIndex,
    ) -> CoreResult<()> {
        let bloom_tmp = temp_name(&bloom_file(target));
        let mut writer = self.dir.create(&bloom_tmp)?;
        writer.append(&bloom.encode())?;
        writer.sync()?;
        drop(writer);

        let sparse_tmp = temp_name(&sparse_file(target));
        let mut writer = self.dir.create(&sparse_tmp)?;
        writer.append(&sparse.encode())?;
        writer.sync()?;
        drop(writer);

        self.dir.rename(main_tmp, &main_file(target))?;
        self.dir.rename(&bloom_tmp, &bloom_file(target))?;
        self.dir.rename(&sparse_tmp, &sparse_file(target))?;
        Ok(())
    }

    /// Completes a generation rewrite: deletes the consumed delta files,
    /// clears the consumed delta tier, persists fresh stats, and drops the
    /// lazy resource caches so the new generation is loaded on next access.
    ///
    /// Only the delta tier is cleared. The write tiers either kept serving
    /// writes (compaction) or were folded into the delta tier before the
    /// rewrite began (split); either way they hold nothing the rewrite
    /// consumed.
    pub(crate) fn finish_rewrite(
        &self,
        keys_in_main_index: u64,
        keys_in_sparse_index: u64,
    ) -> CoreResult<()> {
        let mut meta = self.meta.lock();
        for name in std::mem::take(&mut meta.delta_files) {
            self.dir.delete(&name)?;
        }
        self.cache.clear_delta();
        meta.stats = SegmentStats {
            keys_in_delta_cache: 0,
            keys_in_main_index,
            keys_in_sparse_index,
        };
        meta.persist(self.dir.as_ref(), self.id)?;
        self.resources.invalidate();
        Ok(())
    }

    /// Opens an iterator over the live entries in ascending key order.
    ///
    /// See [`Isolation`] for the two snapshot contracts.
    ///
    /// # Errors
    ///
    /// Fails when the gate refuses admission (for
    /// [`Isolation::FullIsolation`], when the exclusive window cannot be
    /// acquired).
    pub fn open_iterator(&self, isolation: Isolation) -> CoreResult<SegmentIterator<'_>> {
        match isolation {
            Isolation::FailFast => {
                let _pass = self.enter_read("iterate")?;
                Ok(SegmentIterator {
                    merged: self.merged_iter(true)?,
                    fail_fast: Some((&self.version, self.version.current())),
                    _hold: None,
                    done: false,
                })
            }
            Isolation::FullIsolation => {
                if !self.gate.try_enter_freeze_and_drain() {
                    return Err(admission_error(self.gate.state(), "iterate"));
                }
                let hold = FreezeHold::new(&self.gate);
                Ok(SegmentIterator {
                    merged: self.merged_iter(true)?,
                    fail_fast: None,
                    _hold: Some(hold),
                    done: false,
                })
            }
        }
    }

    /// Exact live key count, obtained by walking the merged view.
    ///
    /// # Errors
    ///
    /// Fails when the gate refuses admission or the main file is unreadable.
    pub fn number_of_keys(&self) -> CoreResult<u64> {
        let _pass = self.enter_read("count")?;
        let mut count = 0u64;
        for entry in self.merged_iter(true)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Scans the whole segment under full isolation and verifies that keys
    /// are strictly ascending.
    ///
    /// Returns the last key, or `None` for an empty segment. Detection only:
    /// a violation is reported but the segment stays serviceable so the
    /// caller can schedule recovery.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConsistencyViolation`] on the first out-of-order pair;
    /// admission and read errors otherwise.
    pub fn check_and_repair_consistency(&self) -> CoreResult<Option<Vec<u8>>> {
        if !self.gate.try_enter_freeze_and_drain() {
            return Err(admission_error(self.gate.state(), "consistency check"));
        }
        let _hold = FreezeHold::new(&self.gate);
        let merged = self.merged_iter(true)?;
        check_order(merged)
    }

    /// Flushes any buffered writes and permanently closes the segment.
    ///
    /// Every subsequent operation fails with [`CoreError::Closed`].
    ///
    /// # Errors
    ///
    /// Fails when the final flush fails or when the segment is not in the
    /// ready state.
    pub fn close(&self) -> CoreResult<()> {
        // Deliberately ignore the compaction hint; the segment is going
        // away, a reopen can compact.
        self.flush_once()?;
        if self.gate.close() {
            tracing::debug!(segment = %self.id, "closed segment");
            Ok(())
        } else {
            Err(admission_error(self.gate.state(), "close"))
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("state", &self.gate.state())
            .finish_non_exhaustive()
    }
}
