//! Lazy-loaded, invalidatable per-generation resources.
//!
//! The bloom filter, sparse index, and main-file reader all describe one
//! on-disk generation of the segment. Each is loaded on first use, cached
//! for the generation's lifetime, and dropped by [`GenerationResources::invalidate`]
//! whenever compaction, split, or replace changes the generation, forcing
//! lazy reconstruction on next access.

use crate::bloom::BloomFilter;
use crate::error::CoreResult;
use crate::sparse::SparseIndex;
use crate::types::SegmentId;
use parking_lot::Mutex;
use silt_storage::{FileReader, SegmentDirectory};
use std::sync::Arc;

/// Name of the segment's main index file.
pub(crate) fn main_file(id: SegmentId) -> String {
    format!("{}.main", id.file_prefix())
}

/// Name of the segment's sparse index file.
pub(crate) fn sparse_file(id: SegmentId) -> String {
    format!("{}.sparse", id.file_prefix())
}

/// Name of the segment's bloom filter file.
pub(crate) fn bloom_file(id: SegmentId) -> String {
    format!("{}.bloom", id.file_prefix())
}

/// Temporary-generation variant of a file name.
pub(crate) fn temp_name(name: &str) -> String {
    format!("{name}.tmp")
}

/// Caches for the current generation's heavyweight resources.
pub(crate) struct GenerationResources {
    dir: Arc<dyn SegmentDirectory>,
    id: SegmentId,
    bloom: Mutex<Option<Arc<BloomFilter>>>,
    sparse: Mutex<Option<Arc<SparseIndex>>>,
    main: Mutex<Option<Arc<dyn FileReader>>>,
}

impl GenerationResources {
    pub(crate) fn new(dir: Arc<dyn SegmentDirectory>, id: SegmentId) -> Self {
        Self {
            dir,
            id,
            bloom: Mutex::new(None),
            sparse: Mutex::new(None),
            main: Mutex::new(None),
        }
    }

    /// Returns the bloom filter, loading it on first access.
    ///
    /// `None` when the segment has no on-disk generation yet.
    pub(crate) fn bloom(&self) -> CoreResult<Option<Arc<BloomFilter>>> {
        let mut cached = self.bloom.lock();
        if let Some(bloom) = &*cached {
            return Ok(Some(Arc::clone(bloom)));
        }
        let name = bloom_file(self.id);
        if !self.dir.exists(&name) {
            return Ok(None);
        }
        let reader = self.dir.open(&name)?;
        let data = reader.read_at(0, reader.size()? as usize)?;
        let bloom = Arc::new(BloomFilter::decode(&data)?);
        *cached = Some(Arc::clone(&bloom));
        Ok(Some(bloom))
    }

    /// Returns the sparse index, loading it on first access.
    pub(crate) fn sparse(&self) -> CoreResult<Option<Arc<SparseIndex>>> {
        let mut cached = self.sparse.lock();
        if let Some(sparse) = &*cached {
            return Ok(Some(Arc::clone(sparse)));
        }
        let name = sparse_file(self.id);
        if !self.dir.exists(&name) {
            return Ok(None);
        }
        let reader = self.dir.open(&name)?;
        let data = reader.read_at(0, reader.size()? as usize)?;
        let sparse = Arc::new(SparseIndex::decode(&data)?);
        *cached = Some(Arc::clone(&sparse));
        Ok(Some(sparse))
    }

    /// Returns a seekable reader over the main file, opening it on first
    /// access.
    pub(crate) fn main_reader(&self) -> CoreResult<Option<Arc<dyn FileReader>>> {
        let mut cached = self.main.lock();
        if let Some(reader) = &*cached {
            return Ok(Some(Arc::clone(reader)));
        }
        let name = main_file(self.id);
        if !self.dir.exists(&name) {
            return Ok(None);
        }
        let reader: Arc<dyn FileReader> = Arc::from(self.dir.open(&name)?);
        *cached = Some(Arc::clone(&reader));
        Ok(Some(reader))
    }

    /// Drops all cached resources so the next access reloads the new
    /// generation.
    pub(crate) fn invalidate(&self) {
        *self.bloom.lock() = None;
        *self.sparse.lock() = None;
        *self.main.lock() = None;
    }
}

impl std::fmt::Debug for GenerationResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationResources")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_storage::MemoryDirectory;

    #[test]
    fn missing_generation_yields_none() {
        let dir: Arc<dyn SegmentDirectory> = Arc::new(MemoryDirectory::new());
        let resources = GenerationResources::new(dir, SegmentId::new(1));

        assert!(resources.bloom().unwrap().is_none());
        assert!(resources.sparse().unwrap().is_none());
        assert!(resources.main_reader().unwrap().is_none());
    }

    #[test]
    fn loaded_resource_is_cached() {
        let memory = Arc::new(MemoryDirectory::new());
        let dir: Arc<dyn SegmentDirectory> = Arc::clone(&memory) as _;
        let id = SegmentId::new(1);
        memory
            .create(&main_file(id))
            .unwrap()
            .append(b"")
            .unwrap();

        let resources = GenerationResources::new(dir, id);
        let first = resources.main_reader().unwrap().unwrap();
        let second = resources.main_reader().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn invalidate_forces_reload() {
        let memory = Arc::new(MemoryDirectory::new());
        let dir: Arc<dyn SegmentDirectory> = Arc::clone(&memory) as _;
        let id = SegmentId::new(1);
        memory.create(&main_file(id)).unwrap();

        let resources = GenerationResources::new(dir, id);
        let first = resources.main_reader().unwrap().unwrap();

        resources.invalidate();
        let second = resources.main_reader().unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
