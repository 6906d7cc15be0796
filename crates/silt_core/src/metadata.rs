//! Segment metadata persistence.
//!
//! Point-in-time stats plus the delta file inventory, persisted as one CBOR
//! document per segment. Written with temp-then-rename so a crash never
//! leaves a torn document behind.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use serde::{Deserialize, Serialize};
use silt_storage::SegmentDirectory;

/// Point-in-time key counts for one segment. Read-mostly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    /// Keys held in the delta cache, tombstones included.
    pub keys_in_delta_cache: u64,
    /// Live entries in the main index file.
    pub keys_in_main_index: u64,
    /// Anchors in the sparse index.
    pub keys_in_sparse_index: u64,
}

/// The durable metadata document for one segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SegmentMetadata {
    /// Current stats snapshot.
    pub(crate) stats: SegmentStats,
    /// Sequence number for naming the next delta file.
    pub(crate) delta_file_seq: u64,
    /// Delta file names in the order they were written.
    pub(crate) delta_files: Vec<String>,
}

impl SegmentMetadata {
    fn file_name(id: SegmentId) -> String {
        format!("{}.meta", id.file_prefix())
    }

    fn temp_name(id: SegmentId) -> String {
        format!("{}.meta.tmp", id.file_prefix())
    }

    /// Loads the metadata document, or a fresh empty one when the segment id
    /// has no document yet.
    pub(crate) fn load(dir: &dyn SegmentDirectory, id: SegmentId) -> CoreResult<Self> {
        let name = Self::file_name(id);
        if !dir.exists(&name) {
            return Ok(Self::default());
        }
        let reader = dir.open(&name)?;
        let size = reader.size()?;
        let data = reader.read_at(0, size as usize)?;
        ciborium::from_reader(data.as_slice())
            .map_err(|e| CoreError::metadata(format!("decode failed: {e}")))
    }

    /// Persists the document atomically.
    pub(crate) fn persist(&self, dir: &dyn SegmentDirectory, id: SegmentId) -> CoreResult<()> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::metadata(format!("encode failed: {e}")))?;

        let temp = Self::temp_name(id);
        let mut writer = dir.create(&temp)?;
        writer.append(&buf)?;
        writer.sync()?;
        drop(writer);
        dir.rename(&temp, &Self::file_name(id))?;
        Ok(())
    }

    /// Allocates the next delta file name for this segment.
    pub(crate) fn next_delta_file(&mut self, id: SegmentId) -> String {
        let name = format!("{}.delta-{:06}", id.file_prefix(), self.delta_file_seq);
        self.delta_file_seq += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_storage::MemoryDirectory;

    #[test]
    fn missing_document_loads_empty() {
        let dir = MemoryDirectory::new();
        let meta = SegmentMetadata::load(&dir, SegmentId::new(1)).unwrap();

        assert_eq!(meta.stats, SegmentStats::default());
        assert_eq!(meta.delta_file_seq, 0);
        assert!(meta.delta_files.is_empty());
    }

    #[test]
    fn persist_and_reload() {
        let dir = MemoryDirectory::new();
        let id = SegmentId::new(7);

        let mut meta = SegmentMetadata::default();
        meta.stats.keys_in_main_index = 42;
        meta.delta_files.push("seg-00000007.delta-000000".to_string());
        meta.delta_file_seq = 1;
        meta.persist(&dir, id).unwrap();

        let reloaded = SegmentMetadata::load(&dir, id).unwrap();
        assert_eq!(reloaded.stats.keys_in_main_index, 42);
        assert_eq!(reloaded.delta_file_seq, 1);
        assert_eq!(reloaded.delta_files.len(), 1);
        assert!(!dir.exists("seg-00000007.meta.tmp"));
    }

    #[test]
    fn delta_file_names_are_sequential() {
        let id = SegmentId::new(3);
        let mut meta = SegmentMetadata::default();

        assert_eq!(meta.next_delta_file(id), "seg-00000003.delta-000000");
        assert_eq!(meta.next_delta_file(id), "seg-00000003.delta-000001");
        assert_eq!(meta.delta_file_seq, 2);
    }
}
