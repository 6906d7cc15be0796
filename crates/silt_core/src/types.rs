//! Core type definitions for the segment engine.

use std::fmt;

/// Unique identifier for a segment.
///
/// Segment IDs are non-negative, assigned by the registry, and immutable.
/// The ID renders to a fixed-width, zero-padded prefix used for all of the
/// segment's on-disk artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the zero-padded file name prefix for this segment.
    #[must_use]
    pub fn file_prefix(self) -> String {
        format!("seg-{:08}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// A stored value, which is either live data or a tombstone marking
/// logical deletion of its key.
///
/// Tombstones exist so that a delete can shadow an older version of the key
/// in lower tiers until compaction physically removes both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A live value.
    Data(Vec<u8>),
    /// Logical deletion marker.
    Tombstone,
}

impl Value {
    /// Returns whether this value is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    /// Returns the live payload, or `None` for a tombstone.
    #[must_use]
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Self::Data(data) => Some(data),
            Self::Tombstone => None,
        }
    }
}

/// An ordered key/value pair as stored in a segment.
///
/// Keys are byte strings compared lexicographically. Within a segment no two
/// live entries share a key at the same point in time from a reader's
/// perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key.
    pub key: Vec<u8>,
    /// The value, possibly a tombstone.
    pub value: Value,
}

impl Entry {
    /// Creates an entry holding live data.
    #[must_use]
    pub fn new(key: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            key,
            value: Value::Data(data),
        }
    }

    /// Creates a tombstone entry.
    #[must_use]
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Value::Tombstone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_file_prefix_is_zero_padded() {
        assert_eq!(SegmentId::new(7).file_prefix(), "seg-00000007");
        assert_eq!(SegmentId::new(12345678).file_prefix(), "seg-12345678");
    }

    #[test]
    fn segment_id_display() {
        assert_eq!(format!("{}", SegmentId::new(42)), "seg:42");
    }

    #[test]
    fn tombstone_has_no_data() {
        assert!(Value::Tombstone.is_tombstone());
        assert_eq!(Value::Tombstone.into_data(), None);
        assert_eq!(Value::Data(vec![1]).into_data(), Some(vec![1]));
    }
}
