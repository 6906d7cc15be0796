//! Multi-tier write-buffering cache.
//!
//! Three tiers, most recent first:
//!
//! 1. **Active** - mutable, unique-by-key, bounded by the configured write
//!    cache limit.
//! 2. **Frozen** - at most one immutable snapshot of a former active tier,
//!    held while being persisted to a delta file.
//! 3. **Delta** - all flushed-but-uncompacted entries, loaded from on-disk
//!    delta files at segment open, cleared by compaction.
//!
//! Lookups consult active → frozen → delta so the most recent write wins.
//! The active/frozen pair is guarded by one mutex with a condition variable
//! for write-capacity backpressure; this pair is independent of the segment
//! gate. The delta tier has its own read/write lock since it is read on the
//! hot lookup path but written only by flush and compaction.

use crate::types::Value;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sorted key → value tier contents.
pub(crate) type Tier = BTreeMap<Vec<u8>, Value>;

#[derive(Debug, Default)]
struct WriteTiers {
    active: Tier,
    frozen: Option<Arc<Tier>>,
}

impl WriteTiers {
    fn occupancy(&self) -> usize {
        self.active.len() + self.frozen.as_ref().map_or(0, |f| f.len())
    }
}

/// The segment's in-memory cache tiers. Pure data structure, no I/O.
#[derive(Debug, Default)]
pub(crate) struct TieredCache {
    write_tiers: Mutex<WriteTiers>,
    /// Signalled on every capacity-freeing event so no waiter is missed.
    capacity: Condvar,
    delta: RwLock<Tier>,
}

impl TieredCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks the caller on the capacity condvar while active + frozen
    /// occupancy is at the limit, waking when a merge frees space or the
    /// timeout elapses.
    ///
    /// Callers must not hold gate admission while waiting here, or the
    /// capacity-freeing flush could never be admitted.
    pub(crate) fn wait_for_capacity(&self, limit: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut tiers = self.write_tiers.lock();
        while tiers.occupancy() >= limit {
            if self.capacity.wait_until(&mut tiers, deadline).timed_out() {
                return;
            }
        }
    }

    /// Inserts into the active tier unless the write tiers are at capacity.
    ///
    /// Returns `false` when at capacity and the key is not already present
    /// in the active tier (overwrites never grow occupancy).
    pub(crate) fn try_put(&self, key: Vec<u8>, value: Value, limit: usize) -> bool {
        let mut tiers = self.write_tiers.lock();
        if tiers.occupancy() >= limit && !tiers.active.contains_key(&key) {
            return false;
        }
        tiers.active.insert(key, value);
        true
    }

    /// Looks up a key across active → frozen → delta, returning the first
    /// hit. Tombstones are returned as-is; callers translate them to
    /// "absent".
    pub(crate) fn get(&self, key: &[u8]) -> Option<Value> {
        self.write_tiers_get(key).or_else(|| self.delta_get(key))
    }

    /// Looks up a key in the active and frozen tiers only.
    pub(crate) fn write_tiers_get(&self, key: &[u8]) -> Option<Value> {
        let tiers = self.write_tiers.lock();
        if let Some(value) = tiers.active.get(key) {
            return Some(value.clone());
        }
        tiers
            .frozen
            .as_ref()
            .and_then(|frozen| frozen.get(key).cloned())
    }

    /// Looks up a key in the delta tier only.
    pub(crate) fn delta_get(&self, key: &[u8]) -> Option<Value> {
        self.delta.read().get(key).cloned()
    }

    /// Freezes the active tier.
    ///
    /// If a frozen snapshot is already pending this is a no-op returning the
    /// existing snapshot (at-most-one-frozen invariant). An empty active
    /// tier yields `None`. Otherwise the active tier is swapped into the
    /// frozen slot and a fresh active tier allocated.
    pub(crate) fn freeze(&self) -> Option<Arc<Tier>> {
        let mut tiers = self.write_tiers.lock();
        if let Some(frozen) = &tiers.frozen {
            return Some(Arc::clone(frozen));
        }
        if tiers.active.is_empty() {
            return None;
        }
        let snapshot = Arc::new(std::mem::take(&mut tiers.active));
        tiers.frozen = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Folds the frozen snapshot into the delta tier and clears the frozen
    /// slot, signalling capacity waiters.
    pub(crate) fn merge_frozen_into_delta(&self) {
        let mut tiers = self.write_tiers.lock();
        if let Some(frozen) = tiers.frozen.take() {
            let mut delta = self.delta.write();
            for (key, value) in frozen.iter() {
                delta.insert(key.clone(), value.clone());
            }
        }
        self.capacity.notify_all();
    }

    /// Replaces the delta tier contents, used when loading delta files at
    /// segment open.
    pub(crate) fn load_delta(&self, entries: Tier) {
        *self.delta.write() = entries;
    }

    /// Inserts one entry directly into the delta tier.
    pub(crate) fn insert_delta(&self, key: Vec<u8>, value: Value) {
        self.delta.write().insert(key, value);
    }

    /// Clears the delta tier after a rewrite folded it into the main file.
    pub(crate) fn clear_delta(&self) {
        self.delta.write().clear();
    }

    /// Folds both write tiers into the delta tier and clears them,
    /// signalling capacity waiters.
    ///
    /// Must only be called inside a drained freeze window so no writer is
    /// mid-insert; entries admitted after the fold land in the fresh active
    /// tier and are untouched by the subsequent rewrite.
    pub(crate) fn fold_write_tiers_into_delta(&self) {
        let mut tiers = self.write_tiers.lock();
        {
            let mut delta = self.delta.write();
            if let Some(frozen) = tiers.frozen.take() {
                for (key, value) in frozen.iter() {
                    delta.insert(key.clone(), value.clone());
                }
            }
            // Active entries are newer than frozen ones, so they go last.
            for (key, value) in std::mem::take(&mut tiers.active) {
                delta.insert(key, value);
            }
        }
        self.capacity.notify_all();
    }

    /// Number of keys in the delta tier, tombstones included.
    pub(crate) fn delta_len(&self) -> usize {
        self.delta.read().len()
    }

    /// Clones the current tier contents for a point-in-time merged view.
    pub(crate) fn snapshot(&self) -> CacheSnapshot {
        let (active, frozen) = {
            let tiers = self.write_tiers.lock();
            (tiers.active.clone(), tiers.frozen.clone())
        };
        CacheSnapshot {
            active,
            frozen: frozen.map_or_else(Tier::new, |f| (*f).clone()),
            delta: self.delta.read().clone(),
        }
    }

    /// Deduplicated key count across all three tiers, tombstones included.
    ///
    /// When at most one tier holds data the answer is its length; the merged
    /// view is only materialized when tiers can overlap.
    pub(crate) fn unique_key_count(&self) -> usize {
        self.count_unique(|_| true)
    }

    /// Deduplicated count of keys whose most recent value is live.
    pub(crate) fn unique_key_count_live(&self) -> usize {
        self.count_unique(|value| !value.is_tombstone())
    }

    fn count_unique(&self, keep: impl Fn(&Value) -> bool) -> usize {
        let tiers = self.write_tiers.lock();
        let delta = self.delta.read();

        let frozen_len = tiers.frozen.as_ref().map_or(0, |f| f.len());
        let non_empty = usize::from(!tiers.active.is_empty())
            + usize::from(frozen_len > 0)
            + usize::from(!delta.is_empty());

        if non_empty <= 1 {
            return tiers
                .active
                .values()
                .chain(tiers.frozen.iter().flat_map(|f| f.values()))
                .chain(delta.values())
                .filter(|v| keep(v))
                .count();
        }

        // Most-recent-write-wins across tiers.
        let mut seen = BTreeSet::new();
        let mut count = 0usize;
        let frozen_iter = tiers.frozen.iter().flat_map(|f| f.iter());
        for (key, value) in tiers.active.iter().chain(frozen_iter).chain(delta.iter()) {
            if seen.insert(key.clone()) && keep(value) {
                count += 1;
            }
        }
        count
    }
}

/// Point-in-time clone of all three tiers.
#[derive(Debug)]
pub(crate) struct CacheSnapshot {
    pub(crate) active: Tier,
    pub(crate) frozen: Tier,
    pub(crate) delta: Tier,
}
