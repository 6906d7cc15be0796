//! Merged segment iteration.
//!
//! A segment's logical content is the key-ordered, deduplicated union of
//! its tiers: active → frozen → delta → main file, most recent tier winning
//! per key, tombstones elided. [`MergedIter`] performs that k-way merge;
//! [`SegmentIterator`] wraps it with one of two isolation contracts.

use crate::error::CoreResult;
use crate::gate::Gate;
use crate::types::Entry;
use crate::version::VersionController;
use std::iter::Peekable;

/// Isolation contract for a segment iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// The iterator captures the segment version at open. Any mutation,
    /// compaction, or split bumps the version and the iterator then behaves
    /// as exhausted on its next step.
    ///
    /// This silent truncation is a deliberate contract: callers needing
    /// guaranteed completeness must use [`Isolation::FullIsolation`].
    FailFast,
    /// The iterator holds the segment in an exclusive FREEZE window for its
    /// entire lifetime, guaranteeing a stable snapshot at the cost of
    /// blocking all writers and other iterators.
    FullIsolation,
}

type EntrySource = Peekable<Box<dyn Iterator<Item = CoreResult<Entry>>>>;

/// K-way merge over sorted entry sources ordered by tier priority.
///
/// Sources must each yield entries in strictly ascending key order. When
/// several sources hold the same key, the source with the lowest index wins
/// and the duplicates are discarded. Tombstones suppress their key entirely.
pub(crate) struct MergedIter {
    sources: Vec<EntrySource>,
}

impl MergedIter {
    /// Builds a merge over sources listed most-recent tier first.
    pub(crate) fn new(sources: Vec<Box<dyn Iterator<Item = CoreResult<Entry>>>>) -> Self {
        Self {
            sources: sources.into_iter().map(Iterator::peekable).collect(),
        }
    }

    /// Advances past and returns the next raw winning entry, tombstones
    /// included.
    fn next_raw(&mut self) -> Option<CoreResult<Entry>> {
        // Find the smallest key among the peeked heads, preferring the
        // most recent tier on ties.
        let mut winner: Option<(usize, Vec<u8>)> = None;
        for (idx, source) in self.sources.iter_mut().enumerate() {
            match source.peek() {
                None => continue,
                Some(Err(_)) => {
                    // Surface the error immediately.
                    return source.next();
                }
                Some(Ok(entry)) => match &winner {
                    Some((_, key)) if entry.key >= *key => {}
                    _ => winner = Some((idx, entry.key.clone())),
                },
            }
        }

        let (winner_idx, key) = winner?;
        let mut result = None;
        for (idx, source) in self.sources.iter_mut().enumerate() {
            let matches = matches!(source.peek(), Some(Ok(entry)) if entry.key == key);
            if matches {
                let entry = source.next();
                if idx == winner_idx {
                    result = entry;
                }
            }
        }
        result
    }
}

impl Iterator for MergedIter {
    type Item = CoreResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_raw()? {
                Ok(entry) if entry.value.is_tombstone() => continue,
                other => return Some(other),
            }
        }
    }
}

/// Restores READY when a full-isolation iterator is dropped.
pub(crate) struct FreezeHold<'a> {
    gate: &'a Gate,
}

impl<'a> FreezeHold<'a> {
    pub(crate) fn new(gate: &'a Gate) -> Self {
        Self { gate }
    }
}

impl Drop for FreezeHold<'_> {
    fn drop(&mut self) {
        // Fails only if close or fail raced in, which wins.
        let _ = self.gate.finish_freeze_to_ready();
    }
}

/// Public iterator over a segment's live entries in ascending key order.
pub struct SegmentIterator<'a> {
    pub(crate) merged: MergedIter,
    /// Present in fail-fast mode: controller plus the version captured at
    /// open time.
    pub(crate) fail_fast: Option<(&'a VersionController, u64)>,
    /// Present in full-isolation mode: keeps the gate frozen until drop.
    pub(crate) _hold: Option<FreezeHold<'a>>,
    pub(crate) done: bool,
}

impl Iterator for SegmentIterator<'_> {
    type Item = CoreResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some((controller, captured)) = self.fail_fast {
            if controller.current() != captured {
                self.done = true;
                return None;
            }
        }
        match self.merged.next() {
            Some(item) => Some(item),
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Adapts a sorted key → value map into an entry source.
pub(crate) fn tier_source(
    tier: crate::cache::Tier,
) -> Box<dyn Iterator<Item = CoreResult<Entry>>> {
    Box::new(
        tier.into_iter()
            .map(|(key, value)| Ok(Entry { key, value })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Tier;
    use crate::types::Value;

    fn tier(entries: &[(&[u8], Option<&[u8]>)]) -> Box<dyn Iterator<Item = CoreResult<Entry>>> {
        let mut map = Tier::new();
        for (key, value) in entries {
            let value = match value {
                Some(data) => Value::Data(data.to_vec()),
                None => Value::Tombstone,
            };
            map.insert(key.to_vec(), value);
        }
        tier_source(map)
    }

    fn collect_keys(iter: MergedIter) -> Vec<Vec<u8>> {
        iter.map(|e| e.unwrap().key).collect()
    }

    #[test]
    fn merges_disjoint_sources_in_order() {
        let merged = MergedIter::new(vec![
            tier(&[(b"b", Some(b"1"))]),
            tier(&[(b"a", Some(b"2")), (b"c", Some(b"3"))]),
        ]);
        assert_eq!(
            collect_keys(merged),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn most_recent_tier_wins_ties() {
        let merged = MergedIter::new(vec![
            tier(&[(b"k", Some(b"new"))]),
            tier(&[(b"k", Some(b"old"))]),
        ]);
        let entries: Vec<Entry> = merged.map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, Value::Data(b"new".to_vec()));
    }

    #[test]
    fn tombstone_suppresses_older_value() {
        let merged = MergedIter::new(vec![
            tier(&[(b"k", None)]),
            tier(&[(b"k", Some(b"old")), (b"z", Some(b"live"))]),
        ]);
        assert_eq!(collect_keys(merged), vec![b"z".to_vec()]);
    }

    #[test]
    fn empty_sources_yield_nothing() {
        let merged = MergedIter::new(vec![tier(&[]), tier(&[])]);
        assert_eq!(collect_keys(merged), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn fail_fast_truncates_on_version_bump() {
        let controller = VersionController::new();
        let merged = MergedIter::new(vec![tier(&[
            (b"a", Some(b"1")),
            (b"b", Some(b"2")),
        ])]);
        let mut iter = SegmentIterator {
            merged,
            fail_fast: Some((&controller, controller.current())),
            _hold: None,
            done: false,
        };

        assert_eq!(iter.next().unwrap().unwrap().key, b"a");
        controller.bump();
        assert!(iter.next().is_none());
        // Exhaustion is sticky.
        assert!(iter.next().is_none());
    }
}
