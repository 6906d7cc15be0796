//! # SiltDB Core
//!
//! Single-segment LSM storage engine for SiltDB.
//!
//! A [`Segment`] is one sorted, bounded keyspace unit holding byte-string
//! keys and values:
//!
//! - A tiered write cache (active → frozen → delta) buffers mutations in
//!   memory with condition-variable backpressure.
//! - Flushes persist the frozen tier as append-only delta files.
//! - Compaction totally rewrites the on-disk generation: one sorted main
//!   index file plus a bloom filter and a sparse index for point lookups.
//! - Splitting divides a segment's keyspace into a new lower segment and the
//!   remainder, degenerating into an in-place rewrite when everything fits
//!   in the lower half.
//! - A lock-free concurrency gate admits reads and writes while giving
//!   maintenance operations exclusive, drained windows.
//!
//! Files live in a [`silt_storage::SegmentDirectory`]; use
//! [`silt_storage::MemoryDirectory`] for tests and
//! [`silt_storage::FsDirectory`] for durable storage.
//!
//! ## Example
//!
//! ```rust
//! use silt_core::{Segment, SegmentConfig, SegmentId};
//! use silt_storage::MemoryDirectory;
//! use std::sync::Arc;
//!
//! let dir = Arc::new(MemoryDirectory::new());
//! let segment = Segment::open(dir, SegmentId::new(1), SegmentConfig::default()).unwrap();
//!
//! segment.put(b"answer".to_vec(), b"42".to_vec()).unwrap();
//! assert_eq!(segment.get(b"answer").unwrap(), Some(b"42".to_vec()));
//!
//! segment.delete(b"answer".to_vec()).unwrap();
//! assert_eq!(segment.get(b"answer").unwrap(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bloom;
mod cache;
mod compaction;
mod config;
mod consistency;
mod error;
mod gate;
mod iter;
mod mainfile;
mod metadata;
mod resources;
mod search;
mod segment;
mod sparse;
mod split;
mod types;
mod version;

pub use bloom::BloomFilter;
pub use compaction::CompactionPolicy;
pub use config::SegmentConfig;
pub use error::{CoreError, CoreResult};
pub use gate::{Gate, SegmentState};
pub use iter::{Isolation, SegmentIterator};
pub use metadata::SegmentStats;
pub use segment::Segment;
pub use sparse::SparseIndex;
pub use split::{SplitOutcome, SplitPlan};
pub use types::{Entry, SegmentId, Value};
pub use version::VersionController;
