//! Sparse (scarce) index over the main file.
//!
//! A sampled key → byte-offset index with one anchor per page of main-file
//! entries. A point lookup finds the closest preceding anchor and scans
//! forward at most one page, bounding the linear scan.

use crate::error::{CoreError, CoreResult};

/// One sampled anchor: the first key of a page and its byte offset in the
/// main file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub(crate) key: Vec<u8>,
    pub(crate) offset: u64,
}

/// Sorted anchor list over one generation of the main file.
#[derive(Debug, Default)]
pub struct SparseIndex {
    anchors: Vec<Anchor>,
}

impl SparseIndex {
    /// Builds an index from anchors already in ascending key order.
    pub(crate) fn new(anchors: Vec<Anchor>) -> Self {
        debug_assert!(anchors.windows(2).all(|w| w[0].key < w[1].key));
        Self { anchors }
    }

    /// Number of anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Returns whether the index holds no anchors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Returns the byte offset of the closest anchor whose key is ≤ `key`,
    /// or `None` when the key sorts before every anchor (the key cannot be
    /// in the main file).
    #[must_use]
    pub fn floor_offset(&self, key: &[u8]) -> Option<u64> {
        let idx = self.anchors.partition_point(|a| a.key.as_slice() <= key);
        if idx == 0 {
            return None;
        }
        Some(self.anchors[idx - 1].offset)
    }

    /// Serializes the index as length-prefixed anchor records with a
    /// trailing CRC per record: `[key_len u32][key][offset u64][crc u32]`.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for anchor in &self.anchors {
            let mut record = Vec::with_capacity(4 + anchor.key.len() + 8);
            record.extend_from_slice(&(anchor.key.len() as u32).to_le_bytes());
            record.extend_from_slice(&anchor.key);
            record.extend_from_slice(&anchor.offset.to_le_bytes());
            let crc = crc32fast::hash(&record);
            record.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&record);
        }
        buf
    }

    /// Deserializes an index, verifying each record's checksum.
    pub(crate) fn decode(data: &[u8]) -> CoreResult<Self> {
        let mut anchors = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            if pos + 4 > data.len() {
                return Err(CoreError::corrupted("sparse index record truncated"));
            }
            let key_len =
                u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap_or_default()) as usize;
            let record_len = 4 + key_len + 8;
            if pos + record_len + 4 > data.len() {
                return Err(CoreError::corrupted("sparse index record truncated"));
            }

            let body = &data[pos..pos + record_len];
            let stored_crc = u32::from_le_bytes(
                data[pos + record_len..pos + record_len + 4]
                    .try_into()
                    .unwrap_or_default(),
            );
            let computed_crc = crc32fast::hash(body);
            if stored_crc != computed_crc {
                return Err(CoreError::ChecksumMismatch {
                    expected: stored_crc,
                    actual: computed_crc,
                });
            }

            let key = body[4..4 + key_len].to_vec();
            let offset =
                u64::from_le_bytes(body[4 + key_len..].try_into().unwrap_or_default());
            anchors.push(Anchor { key, offset });
            pos += record_len + 4;
        }
        Ok(Self::new(anchors))
    }
}
