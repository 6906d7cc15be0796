//! Segment split pipeline.
//!
//! Divides one segment's sorted live entries into a new lower-id segment
//! and the remainder, streaming through the merged view exactly once. The
//! maintenance window folds the write tiers into the delta tier before this
//! pipeline starts, so the view covers main ⋈ delta only and writes admitted
//! while the rewrite runs land in the fresh active tier and survive. When
//! the lower fill consumes the entire iterator the split degenerates into a
//! compaction-style replace: the freshly written files are renamed over the
//! current segment's generation and the allocated lower id is not consumed.
//!
//! Entries already streamed into the lower segment before a later step fails
//! are not rolled back; the failure retires the segment through the gate's
//! error state instead.

use crate::error::{CoreError, CoreResult};
use crate::mainfile::MainFileWriter;
use crate::metadata::{SegmentMetadata, SegmentStats};
use crate::resources::{main_file, temp_name};
use crate::segment::Segment;
use crate::types::SegmentId;
use std::sync::Arc;

/// Pre-computed live key estimate driving split feasibility and the fill
/// target for the lower half.
#[derive(Debug, Clone, Copy)]
pub struct SplitPlan {
    estimated_keys: u64,
}

impl SplitPlan {
    /// Creates a plan from an estimated live key count (main index entries
    /// plus cached entries excluding tombstones).
    #[must_use]
    pub const fn new(estimated_keys: u64) -> Self {
        Self { estimated_keys }
    }

    /// The live key estimate.
    #[must_use]
    pub const fn estimated_keys(&self) -> u64 {
        self.estimated_keys
    }

    /// Fill target for the lower half.
    pub(crate) const fn half(&self) -> u64 {
        self.estimated_keys / 2
    }

    /// Whether the segment holds enough live keys to divide meaningfully.
    #[must_use]
    pub const fn is_feasible(&self) -> bool {
        self.half() > 1
    }
}

/// Outcome of a split operation.
#[derive(Debug)]
pub enum SplitOutcome {
    /// The segment was divided. `lower` holds the smaller-keyed half; the
    /// current segment retains the remainder, freshly compacted.
    Split {
        /// The new lower segment.
        lower: Segment,
        /// Smallest key observed across both halves.
        min_key: Vec<u8>,
        /// Largest key observed across both halves.
        max_key: Vec<u8>,
    },
    /// The in-progress write made the split moot: every live entry fit in
    /// the lower half, so its files replaced the current segment's
    /// generation and no new segment id was consumed.
    Compacted {
        /// Smallest key in the rewritten segment.
        min_key: Vec<u8>,
        /// Largest key in the rewritten segment.
        max_key: Vec<u8>,
    },
}

/// Runs the split pipeline. The caller holds the maintenance window.
pub(crate) fn run(
    segment: &Segment,
    lower_id: SegmentId,
    plan: SplitPlan,
) -> CoreResult<SplitOutcome> {
    // Step 1: validate feasibility before touching anything.
    if !plan.is_feasible() {
        return Err(CoreError::SplitInfeasible {
            estimated_keys: plan.estimated_keys(),
        });
    }

    segment.version.bump();
    tracing::debug!(
        segment = %segment.id,
        lower = %lower_id,
        estimated_keys = plan.estimated_keys(),
        "starting split"
    );

    // Step 2: open the merged view. The write tiers were already folded
    // into the delta tier while the gate was drained, so main ⋈ delta is
    // the whole segment at this point.
    let mut iter = segment.merged_iter(false)?;

    // Step 3: the lower segment's own full-write transaction, staged under
    // a temporary name.
    let lower_main_tmp = temp_name(&main_file(lower_id));
    let mut lower_writer =
        MainFileWriter::new(segment.dir.create(&lower_main_tmp)?, &segment.config);

    let mut min_key: Option<Vec<u8>> = None;
    let mut max_key: Option<Vec<u8>> = None;

    // Step 4: fill the lower half until the target or exhaustion.
    let half = plan.half();
    while lower_writer.count() < half {
        let Some(entry) = iter.next() else { break };
        let entry = entry?;
        // The merge elides tombstones; anything else would be a bug and
        // must not be written as a live value.
        let Some(data) = entry.value.into_data() else {
            continue;
        };
        lower_writer.add(&entry.key, &data)?;
        if min_key.is_none() {
            min_key = Some(entry.key.clone());
        }
        max_key = Some(entry.key);
    }

    // Step 5: an empty lower half means the estimate raced with concurrent
    // deletes; nothing sensible can be installed.
    if lower_writer.count() == 0 {
        return Err(CoreError::EmptySplit);
    }
    let min_key = min_key.unwrap_or_default();

    // Step 6: replace shortcut when the upper half is empty.
    let first_remaining = iter.next().transpose()?;
    let Some(first_remaining) = first_remaining else {
        let (count, bloom, sparse) = lower_writer.finish()?;
        let sparse_len = sparse.len() as u64;
        segment.install_generation(segment.id, &lower_main_tmp, &bloom, &sparse)?;
        segment.finish_rewrite(count, sparse_len)?;

        tracing::debug!(segment = %segment.id, keys = count, "split degenerated to replace");
        return Ok(SplitOutcome::Compacted {
            min_key,
            max_key: max_key.unwrap_or_default(),
        });
    };

    // Install the lower half under its own id.
    let (lower_count, lower_bloom, lower_sparse) = lower_writer.finish()?;
    let lower_sparse_len = lower_sparse.len() as u64;
    segment.install_generation(lower_id, &lower_main_tmp, &lower_bloom, &lower_sparse)?;
    let lower_meta = SegmentMetadata {
        stats: SegmentStats {
            keys_in_delta_cache: 0,
            keys_in_main_index: lower_count,
            keys_in_sparse_index: lower_sparse_len,
        },
        ..SegmentMetadata::default()
    };
    lower_meta.persist(segment.dir.as_ref(), lower_id)?;

    // Step 7: stream the remainder into a fresh generation of the current
    // segment; this doubles as a compaction of the upper half.
    let main_tmp = temp_name(&main_file(segment.id));
    let mut upper_writer =
        MainFileWriter::new(segment.dir.create(&main_tmp)?, &segment.config);

    for entry in std::iter::once(Ok(first_remaining)).chain(iter.by_ref()) {
        let entry = entry?;
        let Some(data) = entry.value.into_data() else {
            continue;
        };
        upper_writer.add(&entry.key, &data)?;
        max_key = Some(entry.key);
    }

    let (upper_count, upper_bloom, upper_sparse) = upper_writer.finish()?;
    let upper_sparse_len = upper_sparse.len() as u64;
    segment.install_generation(segment.id, &main_tmp, &upper_bloom, &upper_sparse)?;
    segment.finish_rewrite(upper_count, upper_sparse_len)?;

    let lower = Segment::open(
        Arc::clone(&segment.dir),
        lower_id,
        segment.config.clone(),
    )?;

    tracing::debug!(
        segment = %segment.id,
        lower = %lower_id,
        lower_keys = lower_count,
        upper_keys = upper_count,
        "split finished"
    );
    Ok(SplitOutcome::Split {
        lower,
        min_key,
        max_key: max_key.unwrap_or_default(),
    })
}
