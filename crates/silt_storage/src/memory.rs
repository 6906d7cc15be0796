//! In-memory directory backend for testing.

use crate::dir::{FileReader, FileWriter, SegmentDirectory};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type FileContents = Arc<RwLock<Vec<u8>>>;

/// An in-memory directory backend.
///
/// Stores all files in memory. Suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral segments that don't need persistence
///
/// # Thread Safety
///
/// The directory is thread-safe and can be shared across threads. Writers
/// append through a shared handle, so a reader opened over a file observes
/// data appended after the open.
///
/// # Example
///
/// ```rust
/// use silt_storage::{SegmentDirectory, MemoryDirectory};
///
/// let dir = MemoryDirectory::new();
/// let mut w = dir.create("a.dat").unwrap();
/// w.append(b"test data").unwrap();
/// assert!(dir.exists("a.dat"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    files: RwLock<HashMap<String, FileContents>>,
}

impl MemoryDirectory {
    /// Creates a new empty in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a file's contents, for testing and debugging.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).map(|f| f.read().clone())
    }
}

impl SegmentDirectory for MemoryDirectory {
    fn create(&self, name: &str) -> StorageResult<Box<dyn FileWriter>> {
        let contents: FileContents = Arc::new(RwLock::new(Vec::new()));
        self.files
            .write()
            .insert(name.to_string(), Arc::clone(&contents));
        Ok(Box::new(MemoryWriter { contents }))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn FileReader>> {
        let files = self.files.read();
        let contents = files
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(Box::new(MemoryReader {
            contents: Arc::clone(contents),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut files = self.files.write();
        let contents = files
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), contents);
        Ok(())
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }
}

struct MemoryReader {
    contents: FileContents,
}

impl FileReader for MemoryReader {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.contents.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.contents.read().len() as u64)
    }
}

struct MemoryWriter {
    contents: FileContents,
}

impl FileWriter for MemoryWriter {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut contents = self.contents.write();
        let offset = contents.len() as u64;
        contents.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
