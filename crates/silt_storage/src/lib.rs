//! # SiltDB Storage
//!
//! Directory and file backend abstraction for SiltDB.
//!
//! This crate provides the lowest-level storage abstraction for the segment
//! engine. A [`SegmentDirectory`] is a flat namespace of **opaque named byte
//! files** - the directory does not interpret the data it stores.
//!
//! ## Design Principles
//!
//! - Directories are simple named byte stores (create, open, rename, delete)
//! - No knowledge of SiltDB file formats, caches, or segments
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all file format interpretation
//! - `rename` has atomic replace semantics, the engine relies on it for
//!   crash-safe file generation swaps
//!
//! ## Available Backends
//!
//! - [`MemoryDirectory`] - For testing and ephemeral storage
//! - [`FsDirectory`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use silt_storage::{SegmentDirectory, MemoryDirectory};
//!
//! let dir = MemoryDirectory::new();
//! let mut writer = dir.create("seg-00000001.main").unwrap();
//! writer.append(b"hello world").unwrap();
//! writer.sync().unwrap();
//!
//! let reader = dir.open("seg-00000001.main").unwrap();
//! let data = reader.read_at(0, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod fs;
mod memory;

pub use dir::{FileReader, FileWriter, SegmentDirectory};
pub use error::{StorageError, StorageResult};
pub use fs::FsDirectory;
pub use memory::MemoryDirectory;
