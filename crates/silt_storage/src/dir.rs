//! Directory and file trait definitions.

use crate::error::StorageResult;

/// A flat namespace of named byte files owned by one segment.
///
/// Directories are **opaque byte stores**. They provide operations for
/// creating, reading, renaming, and deleting named files. The segment engine
/// owns all file format interpretation - directories do not understand main
/// index files, delta files, or metadata documents.
///
/// # Invariants
///
/// - `create` truncates an existing file of the same name
/// - `open` returns a reader positioned over the file's full current content
/// - `rename` atomically replaces the destination when it exists
/// - Implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryDirectory`] - For testing
/// - [`super::FsDirectory`] - For persistent storage
pub trait SegmentDirectory: Send + Sync {
    /// Creates (or truncates) a named file and returns a writer for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create(&self, name: &str) -> StorageResult<Box<dyn FileWriter>>;

    /// Opens a named file for seekable reads.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the file does not exist.
    fn open(&self, name: &str) -> StorageResult<Box<dyn FileReader>>;

    /// Atomically renames `from` to `to`, replacing `to` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` does not exist or the rename fails.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Deletes a named file.
    ///
    /// Deleting a file that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete(&self, name: &str) -> StorageResult<()>;

    /// Returns whether a named file exists.
    fn exists(&self, name: &str) -> bool;

    /// Lists all file names in the directory, in unspecified order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated.
    fn list(&self) -> StorageResult<Vec<String>>;
}

/// A seekable reader over one named file.
///
/// Readers are shareable across threads; `read_at` takes `&self`.
pub trait FileReader: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the read would extend
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Returns the current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}

/// An append-only writer over one named file.
pub trait FileWriter: Send {
    /// Appends data to the end of the file.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// After this returns successfully, all previously appended data is
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;
}
